//! Commit log framing.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload | crc32 (4) |
//! ```
//!
//! The CRC covers everything before it. A commit payload is the sequence
//! followed by the batch's operations:
//!
//! ```text
//! | sequence u64 | op count u32 | op* |
//! op: | tag u8 | fields |   strings and byte strings are u32-length-prefixed
//! ```

use super::batch::Op;
use super::dbi::{DbiFlags, KeyKind};
use crate::error::{CoreError, CoreResult};
use tessera_storage::StorageBackend;

/// Magic bytes opening every log record.
pub const LOG_MAGIC: [u8; 4] = *b"TLOG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

const TYPE_COMMIT: u8 = 1;

const OP_CREATE_DBI: u8 = 1;
const OP_DROP_DBI: u8 = 2;
const OP_PUT: u8 = 3;
const OP_DELETE: u8 = 4;
const OP_PUT_DUP: u8 = 5;
const OP_DELETE_DUP: u8 = 6;
const OP_REWRITE: u8 = 7;

/// One committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogRecord {
    pub sequence: u64,
    pub ops: Vec<Op>,
}

impl LogRecord {
    /// Encodes the framed record.
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::engine("commit record exceeds 4 GiB"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(TYPE_COMMIT);
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        put_len(&mut buf, self.ops.len())?;
        for op in &self.ops {
            match op {
                Op::CreateDbi { name, flags } => {
                    buf.push(OP_CREATE_DBI);
                    put_bytes(&mut buf, name.as_bytes())?;
                    buf.push(u8::from(flags.dup_sort));
                    buf.push(flags.key_kind.as_byte());
                }
                Op::DropDbi { name } => {
                    buf.push(OP_DROP_DBI);
                    put_bytes(&mut buf, name.as_bytes())?;
                }
                Op::Put { dbi, key, value } => {
                    buf.push(OP_PUT);
                    put_bytes(&mut buf, dbi.as_bytes())?;
                    put_bytes(&mut buf, key)?;
                    put_bytes(&mut buf, value)?;
                }
                Op::Rewrite { dbi, key, value } => {
                    buf.push(OP_REWRITE);
                    put_bytes(&mut buf, dbi.as_bytes())?;
                    put_bytes(&mut buf, key)?;
                    put_bytes(&mut buf, value)?;
                }
                Op::Delete { dbi, key } => {
                    buf.push(OP_DELETE);
                    put_bytes(&mut buf, dbi.as_bytes())?;
                    put_bytes(&mut buf, key)?;
                }
                Op::PutDup { dbi, key, value } => {
                    buf.push(OP_PUT_DUP);
                    put_bytes(&mut buf, dbi.as_bytes())?;
                    put_bytes(&mut buf, key)?;
                    put_bytes(&mut buf, value)?;
                }
                Op::DeleteDup { dbi, key, value } => {
                    buf.push(OP_DELETE_DUP);
                    put_bytes(&mut buf, dbi.as_bytes())?;
                    put_bytes(&mut buf, key)?;
                    put_bytes(&mut buf, value)?;
                }
            }
        }
        Ok(buf)
    }

    fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);
        let sequence = reader.u64()?;
        let count = reader.u32()? as usize;
        let mut ops = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let op = match reader.u8()? {
                OP_CREATE_DBI => {
                    let name = reader.string()?;
                    let dup_sort = reader.u8()? != 0;
                    let kind = reader.u8()?;
                    let key_kind = KeyKind::from_byte(kind).ok_or_else(|| {
                        CoreError::log_corruption(format!("unknown key kind {kind}"))
                    })?;
                    Op::CreateDbi {
                        name,
                        flags: DbiFlags::new(dup_sort, key_kind),
                    }
                }
                OP_DROP_DBI => Op::DropDbi {
                    name: reader.string()?,
                },
                OP_PUT => Op::Put {
                    dbi: reader.string()?,
                    key: reader.bytes()?,
                    value: reader.bytes()?,
                },
                OP_REWRITE => Op::Rewrite {
                    dbi: reader.string()?,
                    key: reader.bytes()?,
                    value: reader.bytes()?,
                },
                OP_DELETE => Op::Delete {
                    dbi: reader.string()?,
                    key: reader.bytes()?,
                },
                OP_PUT_DUP => Op::PutDup {
                    dbi: reader.string()?,
                    key: reader.bytes()?,
                    value: reader.bytes()?,
                },
                OP_DELETE_DUP => Op::DeleteDup {
                    dbi: reader.string()?,
                    key: reader.bytes()?,
                    value: reader.bytes()?,
                },
                other => {
                    return Err(CoreError::log_corruption(format!("unknown op tag {other}")))
                }
            };
            ops.push(op);
        }
        reader.finish()?;
        Ok(Self { sequence, ops })
    }
}

/// Result of reading the log from some offset to its end.
#[derive(Debug, Default)]
pub(crate) struct LogScan {
    /// Complete records, in log order.
    pub records: Vec<LogRecord>,
    /// Offset just past the last complete record.
    pub end: u64,
    /// Whether incomplete bytes follow `end`.
    pub torn: bool,
}

/// Reads every complete record from `start` to the end of the backend.
///
/// An incomplete trailing record is reported as `torn`, not as an error:
/// it is either a crashed append or one still in progress on another
/// handle. A bad magic, unknown version or type, or a CRC mismatch is
/// corruption.
pub(crate) fn scan_log(backend: &dyn StorageBackend, start: u64) -> CoreResult<LogScan> {
    let size = backend.size()?;
    let mut scan = LogScan {
        end: start,
        ..LogScan::default()
    };
    if size <= start {
        return Ok(scan);
    }
    let len = usize::try_from(size - start)
        .map_err(|_| CoreError::engine("commit log too large to map"))?;
    let bytes = backend.read_at(start, len)?;

    let mut pos = 0usize;
    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < HEADER_SIZE {
            scan.torn = true;
            break;
        }
        if rest[0..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption(format!(
                "bad magic at offset {}",
                start + pos as u64
            )));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != LOG_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported log version {version}"
            )));
        }
        let record_type = rest[6];
        if record_type != TYPE_COMMIT {
            return Err(CoreError::log_corruption(format!(
                "unknown record type {record_type}"
            )));
        }
        let payload_len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
        let total = HEADER_SIZE + payload_len + CRC_SIZE;
        if rest.len() < total {
            scan.torn = true;
            break;
        }

        let body_end = HEADER_SIZE + payload_len;
        let expected = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let actual = crc32fast::hash(&rest[..body_end]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        scan.records
            .push(LogRecord::decode_payload(&rest[HEADER_SIZE..body_end])?);
        pos += total;
        scan.end = start + pos as u64;
    }
    Ok(scan)
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> CoreResult<()> {
    let len = u32::try_from(len).map_err(|_| CoreError::engine("field exceeds 4 GiB"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    put_len(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| CoreError::log_corruption("unexpected end of payload"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> CoreResult<String> {
        String::from_utf8(self.bytes()?)
            .map_err(|_| CoreError::log_corruption("invalid UTF-8 in name"))
    }

    fn finish(&self) -> CoreResult<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(CoreError::log_corruption(format!(
                "{} trailing bytes in commit record",
                self.buf.len() - self.pos
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::InMemoryBackend;

    fn sample(sequence: u64) -> LogRecord {
        LogRecord {
            sequence,
            ops: vec![
                Op::CreateDbi {
                    name: "id".into(),
                    flags: DbiFlags::PRIMARY,
                },
                Op::Put {
                    dbi: "id".into(),
                    key: b"\x03a".to_vec(),
                    value: b"row".to_vec(),
                },
                Op::DeleteDup {
                    dbi: "name".into(),
                    key: b"\x03x".to_vec(),
                    value: b"\x03a".to_vec(),
                },
                Op::Rewrite {
                    dbi: "id".into(),
                    key: b"\x03a".to_vec(),
                    value: b"trimmed".to_vec(),
                },
            ],
        }
    }

    fn backend_with(records: &[LogRecord]) -> InMemoryBackend {
        let mut bytes = Vec::new();
        for r in records {
            bytes.extend(r.encode().unwrap());
        }
        InMemoryBackend::with_data(bytes)
    }

    #[test]
    fn scan_reads_all_records() {
        let backend = backend_with(&[sample(1), sample(2)]);
        let scan = scan_log(&backend, 0).unwrap();
        assert_eq!(scan.records, vec![sample(1), sample(2)]);
        assert!(!scan.torn);
        assert_eq!(scan.end, backend.size().unwrap());
    }

    #[test]
    fn scan_from_offset() {
        let first = sample(1).encode().unwrap().len() as u64;
        let backend = backend_with(&[sample(1), sample(2)]);
        let scan = scan_log(&backend, first).unwrap();
        assert_eq!(scan.records, vec![sample(2)]);
    }

    #[test]
    fn torn_tail_is_clean_end() {
        let mut bytes = sample(1).encode().unwrap();
        let good = bytes.len() as u64;
        let second = sample(2).encode().unwrap();
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let scan = scan_log(&InMemoryBackend::with_data(bytes), 0).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert!(scan.torn);
        assert_eq!(scan.end, good);
    }

    #[test]
    fn flipped_byte_is_checksum_mismatch() {
        let mut bytes = sample(1).encode().unwrap();
        bytes[HEADER_SIZE + 2] ^= 0xff;
        let err = scan_log(&InMemoryBackend::with_data(bytes), 0).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = sample(1).encode().unwrap();
        bytes[0] = b'X';
        let err = scan_log(&InMemoryBackend::with_data(bytes), 0).unwrap_err();
        assert!(matches!(err, CoreError::LogCorruption { .. }));
    }
}
