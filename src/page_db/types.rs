//! Identities and states stored by a page
//!
//! Commit and object identities are SHA-256 content hashes. An
//! [`ObjectChunk`] can only be built from its content, so the identifier it
//! carries always matches the bytes it carries.

use std::fmt;

use sha2::{Digest, Sha256};

/// Length of every content hash in bytes.
pub const DIGEST_LEN: usize = 32;

fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// Content hash identifying an immutable commit.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CommitId([u8; DIGEST_LEN]);

impl CommitId {
    /// Wraps an already computed digest.
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Decodes an id from a stored key fragment.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let digest: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(digest))
    }

    /// Computes the id of serialized commit bytes.
    pub fn for_storage_bytes(storage_bytes: &[u8]) -> Self {
        Self(sha256(storage_bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId(")?;
        write_hex(f, &self.0[..8])?;
        write!(f, ")")
    }
}

/// Content hash plus size identifying an immutable object chunk.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectIdentifier {
    digest: [u8; DIGEST_LEN],
    size: u64,
}

impl ObjectIdentifier {
    /// Encoded length: digest followed by big-endian size.
    pub const ENCODED_LEN: usize = DIGEST_LEN + 8;

    /// Derives the identifier of `content`.
    pub fn for_content(content: &[u8]) -> Self {
        Self {
            digest: sha256(content),
            size: content.len() as u64,
        }
    }

    /// Rebuilds an identifier from stored parts. Nothing is verified here;
    /// reads verify content against the identifier instead.
    pub fn from_parts(digest: [u8; DIGEST_LEN], size: u64) -> Self {
        Self { digest, size }
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether `content` is the content this identifier names.
    pub fn matches(&self, content: &[u8]) -> bool {
        content.len() as u64 == self.size && sha256(content) == self.digest
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..DIGEST_LEN].copy_from_slice(&self.digest);
        out[DIGEST_LEN..].copy_from_slice(&self.size.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let digest: [u8; DIGEST_LEN] = bytes[..DIGEST_LEN].try_into().ok()?;
        let size = u64::from_be_bytes(bytes[DIGEST_LEN..].try_into().ok()?);
        Some(Self { digest, size })
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.digest)?;
        write!(f, ":{}", self.size)
    }
}

impl fmt::Debug for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectIdentifier(")?;
        write_hex(f, &self.digest[..8])?;
        write!(f, ", {})", self.size)
    }
}

/// Object content bound to its identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectChunk {
    identifier: ObjectIdentifier,
    content: Vec<u8>,
}

impl ObjectChunk {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            identifier: ObjectIdentifier::for_content(&content),
            content,
        }
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        self.identifier
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}

impl fmt::Debug for ObjectChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectChunk")
            .field("identifier", &self.identifier)
            .field("len", &self.content.len())
            .finish()
    }
}

/// Upload status of a stored object. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectStatus {
    /// Created locally, not yet confirmed by the cloud
    Local = 1,
    /// Present in the cloud
    Synced = 2,
}

impl ObjectStatus {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(ObjectStatus::Local),
            2 => Some(ObjectStatus::Synced),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStatus::Local => "LOCAL",
            ObjectStatus::Synced => "SYNCED",
        }
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronization state of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    /// Waiting for upload; lower generations upload first.
    Unsynced { generation: u64 },
}

impl SyncState {
    const TAG_SYNCED: u8 = 0;
    const TAG_UNSYNCED: u8 = 1;

    pub fn encode(&self) -> Vec<u8> {
        match self {
            SyncState::Synced => vec![Self::TAG_SYNCED],
            SyncState::Unsynced { generation } => {
                let mut out = Vec::with_capacity(9);
                out.push(Self::TAG_UNSYNCED);
                out.extend_from_slice(&generation.to_be_bytes());
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes.split_first()? {
            (&Self::TAG_SYNCED, []) => Some(SyncState::Synced),
            (&Self::TAG_UNSYNCED, rest) => {
                let generation = u64::from_be_bytes(rest.try_into().ok()?);
                Some(SyncState::Unsynced { generation })
            }
            _ => None,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SyncState::Synced)
    }
}
