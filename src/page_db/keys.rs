//! Key namespaces of the page database
//!
//! Each entity lives under its own prefix so a prefix scan over one
//! namespace never touches rows of another:
//!
//! ```text
//! h/<commit id>              -> head arrival timestamp (i64 BE micros)
//! c/<commit id>              -> commit storage bytes
//! m/<low id><high id>        -> merge commit id
//! o/<object id>              -> object content
//! s/<object id>              -> object status (u8)
//! y/<commit id>              -> commit sync state
//! k/<key>                    -> sync metadata value
//! g                          -> page generation counter (u64 BE)
//! p                          -> page online flag
//! ```
//!
//! Merge keys store the parent pair with the smaller id first, making
//! lookups independent of argument order.

use super::types::{CommitId, ObjectIdentifier, DIGEST_LEN};

pub const HEADS_PREFIX: &[u8] = b"h/";
pub const COMMITS_PREFIX: &[u8] = b"c/";
pub const MERGES_PREFIX: &[u8] = b"m/";
pub const OBJECTS_PREFIX: &[u8] = b"o/";
pub const OBJECT_STATUS_PREFIX: &[u8] = b"s/";
pub const COMMIT_SYNC_PREFIX: &[u8] = b"y/";
pub const SYNC_METADATA_PREFIX: &[u8] = b"k/";
pub const PAGE_GENERATION_KEY: &[u8] = b"g";
pub const PAGE_ONLINE_KEY: &[u8] = b"p";

fn prefixed(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}

pub fn head_key(commit_id: &CommitId) -> Vec<u8> {
    prefixed(HEADS_PREFIX, commit_id.as_bytes())
}

pub fn commit_key(commit_id: &CommitId) -> Vec<u8> {
    prefixed(COMMITS_PREFIX, commit_id.as_bytes())
}

/// Orders a parent pair so that `(a, b)` and `(b, a)` share one key.
pub fn normalize_parents(parent1: CommitId, parent2: CommitId) -> (CommitId, CommitId) {
    if parent1 <= parent2 {
        (parent1, parent2)
    } else {
        (parent2, parent1)
    }
}

pub fn merge_key(parent1: &CommitId, parent2: &CommitId) -> Vec<u8> {
    let (low, high) = normalize_parents(*parent1, *parent2);
    let mut key = Vec::with_capacity(MERGES_PREFIX.len() + 2 * DIGEST_LEN);
    key.extend_from_slice(MERGES_PREFIX);
    key.extend_from_slice(low.as_bytes());
    key.extend_from_slice(high.as_bytes());
    key
}

pub fn object_key(object_id: &ObjectIdentifier) -> Vec<u8> {
    prefixed(OBJECTS_PREFIX, &object_id.encode())
}

pub fn object_status_key(object_id: &ObjectIdentifier) -> Vec<u8> {
    prefixed(OBJECT_STATUS_PREFIX, &object_id.encode())
}

pub fn commit_sync_key(commit_id: &CommitId) -> Vec<u8> {
    prefixed(COMMIT_SYNC_PREFIX, commit_id.as_bytes())
}

pub fn sync_metadata_key(key: &str) -> Vec<u8> {
    prefixed(SYNC_METADATA_PREFIX, key.as_bytes())
}

/// Extracts the commit id from a key under `prefix`.
pub fn commit_id_from_key(prefix: &[u8], key: &[u8]) -> Option<CommitId> {
    CommitId::from_slice(key.strip_prefix(prefix)?)
}

/// Extracts the object id from a key under `prefix`.
pub fn object_id_from_key(prefix: &[u8], key: &[u8]) -> Option<ObjectIdentifier> {
    ObjectIdentifier::decode(key.strip_prefix(prefix)?)
}

/// Extracts the normalized parent pair from a merge key.
pub fn parents_from_merge_key(key: &[u8]) -> Option<(CommitId, CommitId)> {
    let rest = key.strip_prefix(MERGES_PREFIX)?;
    if rest.len() != 2 * DIGEST_LEN {
        return None;
    }
    let low = CommitId::from_slice(&rest[..DIGEST_LEN])?;
    let high = CommitId::from_slice(&rest[DIGEST_LEN..])?;
    Some((low, high))
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

pub fn encode_i64(value: i64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_i64(bytes: &[u8]) -> Option<i64> {
    Some(i64::from_be_bytes(bytes.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> CommitId {
        CommitId::from_bytes([byte; DIGEST_LEN])
    }

    #[test]
    fn test_merge_key_is_order_independent() {
        assert_eq!(merge_key(&id(1), &id(2)), merge_key(&id(2), &id(1)));
        assert_ne!(merge_key(&id(1), &id(2)), merge_key(&id(1), &id(3)));
    }

    #[test]
    fn test_parents_from_merge_key() {
        let key = merge_key(&id(9), &id(4));
        assert_eq!(parents_from_merge_key(&key), Some((id(4), id(9))));
        assert_eq!(parents_from_merge_key(b"m/short"), None);
    }

    #[test]
    fn test_namespaces_do_not_overlap() {
        let commit = id(7);
        let keys = [
            head_key(&commit),
            commit_key(&commit),
            commit_sync_key(&commit),
        ];
        assert!(keys[0].starts_with(HEADS_PREFIX));
        assert!(!keys[1].starts_with(HEADS_PREFIX));
        assert!(!keys[2].starts_with(COMMITS_PREFIX));
        assert_eq!(commit_id_from_key(HEADS_PREFIX, &keys[0]), Some(commit));
        assert_eq!(commit_id_from_key(COMMITS_PREFIX, &keys[0]), None);
    }

    #[test]
    fn test_object_keys_round_trip_identifier() {
        let object = ObjectIdentifier::for_content(b"content");
        let key = object_status_key(&object);
        assert_eq!(object_id_from_key(OBJECT_STATUS_PREFIX, &key), Some(object));
    }
}
