//! Batch log record format
//!
//! One record holds every operation of one `write_batch` call, so a batch is
//! either fully present in the log or not at all.
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, includes itself and the checksum)
//! +------------------+
//! | Sequence Number  | (u64 LE)
//! +------------------+
//! | Operation Count  | (u32 LE)
//! +------------------+
//! | Operations       | tag (u8: 1 = put, 2 = delete)
//! |                  | key (length-prefixed bytes)
//! |                  | value (length-prefixed bytes, puts only)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! Checksum covers all bytes except the checksum itself.

use std::io;

use super::checksum::{compute_checksum, verify_checksum};

const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;

/// Smallest valid record: length + sequence + op count + checksum.
pub const MIN_RECORD_SIZE: usize = 4 + 8 + 4 + 4;

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl KvOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        KvOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        KvOp::Delete { key: key.into() }
    }

    /// Payload bytes carried by this operation.
    pub fn encoded_len(&self) -> usize {
        match self {
            KvOp::Put { key, value } => 1 + 4 + key.len() + 4 + value.len(),
            KvOp::Delete { key } => 1 + 4 + key.len(),
        }
    }
}

/// One durable batch as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub sequence: u64,
    pub ops: Vec<KvOp>,
}

impl BatchRecord {
    pub fn new(sequence: u64, ops: Vec<KvOp>) -> Self {
        Self { sequence, ops }
    }

    /// Serialize the complete record, length prefix and checksum included.
    ///
    /// Fails with `InvalidInput` if the record, or any key or value in it,
    /// does not fit the u32 length fields.
    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        let body_len: usize = 8 + 4 + self.ops.iter().map(KvOp::encoded_len).sum::<usize>();
        let record_length = checked_len(4 + body_len + 4)?;
        let op_count = checked_len(self.ops.len())?;

        let mut record = Vec::with_capacity(record_length as usize);
        record.extend_from_slice(&record_length.to_le_bytes());
        record.extend_from_slice(&self.sequence.to_le_bytes());
        record.extend_from_slice(&op_count.to_le_bytes());

        for op in &self.ops {
            match op {
                KvOp::Put { key, value } => {
                    record.push(TAG_PUT);
                    write_bytes(&mut record, key)?;
                    write_bytes(&mut record, value)?;
                }
                KvOp::Delete { key } => {
                    record.push(TAG_DELETE);
                    write_bytes(&mut record, key)?;
                }
            }
        }

        let checksum = compute_checksum(&record);
        record.extend_from_slice(&checksum.to_le_bytes());
        Ok(record)
    }

    /// Deserialize a record from the front of `data`, verifying its checksum.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Truncated record: {} bytes remaining, minimum record size is {}",
                    data.len(),
                    MIN_RECORD_SIZE
                ),
            ));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid record length: {}", record_length),
            ));
        }
        if record_length > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Record length {} exceeds remaining size {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored_checksum = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        if !verify_checksum(&data[..checksum_offset], stored_checksum) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Record checksum mismatch",
            ));
        }

        let mut cursor = Cursor::new(&data[4..checksum_offset]);
        let sequence = cursor.read_u64()?;
        let op_count = cursor.read_u32()? as usize;

        let mut ops = Vec::with_capacity(op_count.min(1024));
        for _ in 0..op_count {
            let op = match cursor.read_u8()? {
                TAG_PUT => {
                    let key = cursor.read_bytes()?;
                    let value = cursor.read_bytes()?;
                    KvOp::Put { key, value }
                }
                TAG_DELETE => KvOp::Delete {
                    key: cursor.read_bytes()?,
                },
                tag => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Unknown operation tag: {}", tag),
                    ))
                }
            };
            ops.push(op);
        }

        if !cursor.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Trailing bytes after last operation",
            ));
        }

        Ok((Self { sequence, ops }, record_length))
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> io::Result<()> {
    buf.extend_from_slice(&checked_len(bytes.len())?.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Length as stored in a u32 field.
fn checked_len(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Length {} exceeds the record format limit of {}", len, u32::MAX),
        )
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Operation extends past record body",
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
