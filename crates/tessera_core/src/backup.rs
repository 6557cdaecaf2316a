//! Table and schema backups.
//!
//! A backup is an archive of store images, one per environment. Each image
//! is a consistent snapshot written in the store's own commit-log format,
//! so a restored entry opens as a standalone store without going through
//! the bridge.
//!
//! ## Archive Format
//!
//! ```text
//! | magic (4) | version (2) | timestamp (8) | entry_count (4) | entries... |
//! ```
//!
//! Each entry:
//!
//! ```text
//! | name_len (2) | name | data_len (8) | data | crc32 (4) |
//! ```
//!
//! The checksum covers the name and the data. Integers are little-endian.

use crate::catalog::SchemaCatalog;
use crate::error::{CoreError, CoreResult};
use crate::registry::{EnvKind, EnvironmentRegistry, STORE_EXTENSION};
use crate::types::TableRef;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Magic bytes of an archive.
const ARCHIVE_MAGIC: [u8; 4] = *b"TBAK";
/// Current archive format version.
const ARCHIVE_VERSION: u16 = 1;

/// One store image in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative path, `data/<schema>/<table>.tdb` or
    /// `audit/<schema>/<table>.tdb`.
    pub name: String,
    /// Store bytes.
    pub data: Vec<u8>,
}

/// Header facts of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveMetadata {
    /// Creation time, Unix milliseconds.
    pub timestamp: u64,
    /// Number of entries.
    pub entry_count: u32,
    /// Bytes written or read.
    pub size: u64,
}

/// A decoded archive.
#[derive(Debug, Clone)]
pub struct Archive {
    /// Header facts.
    pub metadata: ArchiveMetadata,
    /// Store images, in archive order.
    pub entries: Vec<ArchiveEntry>,
}

/// Writes archives of tables and schemas.
pub struct BackupWriter<'a> {
    catalog: &'a SchemaCatalog,
    registry: &'a EnvironmentRegistry,
}

impl<'a> BackupWriter<'a> {
    /// Creates a backup writer.
    #[must_use]
    pub fn new(catalog: &'a SchemaCatalog, registry: &'a EnvironmentRegistry) -> Self {
        Self { catalog, registry }
    }

    /// Writes an archive of one table, with its audit store when
    /// `include_audit` is set and the table has one.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound`/`TableNotFound`, or an I/O error from `out`.
    pub fn backup_table(
        &self,
        schema: &str,
        table: &str,
        include_audit: bool,
        out: &mut dyn Write,
    ) -> CoreResult<ArchiveMetadata> {
        let table = TableRef::new(schema, table);
        self.catalog.table(&table)?;
        let entries = self.table_entries(&table, include_audit)?;
        info!(table = %table, entries = entries.len(), "backing up table");
        write_archive(&entries, out)
    }

    /// Writes an archive of every table in a schema, audit stores included.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound`, or an I/O error from `out`.
    pub fn backup_schema(&self, schema: &str, out: &mut dyn Write) -> CoreResult<ArchiveMetadata> {
        let mut entries = Vec::new();
        for meta in self.catalog.tables(schema)? {
            entries.extend(self.table_entries(&meta.table_ref(), true)?);
        }
        info!(schema, entries = entries.len(), "backing up schema");
        write_archive(&entries, out)
    }

    fn table_entries(&self, table: &TableRef, include_audit: bool) -> CoreResult<Vec<ArchiveEntry>> {
        let mut kinds = vec![EnvKind::Data];
        if include_audit && self.registry.exists(table, EnvKind::Audit) {
            kinds.push(EnvKind::Audit);
        }
        let mut entries = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let env = self.registry.open(table, kind)?;
            let mut data = Vec::new();
            env.write_snapshot_to(&mut data)?;
            entries.push(ArchiveEntry {
                name: entry_name(table, kind),
                data,
            });
        }
        Ok(entries)
    }
}

fn entry_name(table: &TableRef, kind: EnvKind) -> String {
    let root = match kind {
        EnvKind::Data => "data",
        EnvKind::Audit => "audit",
    };
    format!(
        "{root}/{}/{}.{STORE_EXTENSION}",
        table.schema, table.table
    )
}

/// Milliseconds since the Unix epoch, saturating past `u64::MAX` and
/// zero before the epoch.
fn archive_timestamp(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn write_archive(entries: &[ArchiveEntry], out: &mut dyn Write) -> CoreResult<ArchiveMetadata> {
    let timestamp = archive_timestamp(SystemTime::now());
    let entry_count = u32::try_from(entries.len())
        .map_err(|_| CoreError::validation("too many stores for one archive"))?;

    out.write_all(&ARCHIVE_MAGIC)?;
    out.write_all(&ARCHIVE_VERSION.to_le_bytes())?;
    out.write_all(&timestamp.to_le_bytes())?;
    out.write_all(&entry_count.to_le_bytes())?;
    let mut size = 4 + 2 + 8 + 4;

    for entry in entries {
        let name_len = u16::try_from(entry.name.len())
            .map_err(|_| CoreError::validation(format!("entry name too long: {}", entry.name)))?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(entry.name.as_bytes());
        hasher.update(&entry.data);

        let data_len = u64::try_from(entry.data.len())
            .map_err(|_| CoreError::validation(format!("entry too large: {}", entry.name)))?;

        out.write_all(&name_len.to_le_bytes())?;
        out.write_all(entry.name.as_bytes())?;
        out.write_all(&data_len.to_le_bytes())?;
        out.write_all(&entry.data)?;
        out.write_all(&hasher.finalize().to_le_bytes())?;
        size += 2 + u64::from(name_len) + 8 + data_len + 4;
        debug!(entry = %entry.name, bytes = entry.data.len(), "archived store");
    }
    out.flush()?;

    Ok(ArchiveMetadata {
        timestamp,
        entry_count,
        size,
    })
}

/// Reads and verifies an archive.
///
/// # Errors
///
/// Returns `InvalidFormat` for a bad header, a truncated archive or an
/// unsafe entry name, and `ChecksumMismatch` for a damaged entry.
pub fn read_archive(reader: &mut dyn Read) -> CoreResult<Archive> {
    let mut magic = [0u8; 4];
    read_exact(reader, &mut magic)?;
    if magic != ARCHIVE_MAGIC {
        return Err(CoreError::invalid_format("not a backup archive"));
    }
    let version = u16::from_le_bytes(read_array(reader)?);
    if version != ARCHIVE_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported archive version {version}"
        )));
    }
    let timestamp = u64::from_le_bytes(read_array(reader)?);
    let entry_count = u32::from_le_bytes(read_array(reader)?);
    let mut size = 4 + 2 + 8 + 4;

    let mut entries = Vec::new();
    for _ in 0..entry_count {
        let name_len = u16::from_le_bytes(read_array(reader)?);
        let mut name = vec![0u8; usize::from(name_len)];
        read_exact(reader, &mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| CoreError::invalid_format("entry name is not UTF-8"))?;
        check_entry_name(&name)?;

        let data_len = u64::from_le_bytes(read_array(reader)?);
        let mut data = Vec::new();
        (&mut *reader).take(data_len).read_to_end(&mut data)?;
        if u64::try_from(data.len()).ok() != Some(data_len) {
            return Err(CoreError::invalid_format(format!("entry {name} is truncated")));
        }

        let expected = u32::from_le_bytes(read_array(reader)?);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(&data);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        size += 2 + u64::from(name_len) + 8 + data_len + 4;
        entries.push(ArchiveEntry { name, data });
    }

    Ok(Archive {
        metadata: ArchiveMetadata {
            timestamp,
            entry_count,
            size,
        },
        entries,
    })
}

/// Reads an archive and writes every entry under `dir`, returning the
/// written paths. Existing files are overwritten.
///
/// # Errors
///
/// See [`read_archive`]; also returns I/O errors from writing.
pub fn restore_archive(reader: &mut dyn Read, dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let archive = read_archive(reader)?;
    let mut written = Vec::with_capacity(archive.entries.len());
    for entry in archive.entries {
        let path = dir.join(&entry.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &entry.data)?;
        debug!(path = %path.display(), bytes = entry.data.len(), "restored store");
        written.push(path);
    }
    info!(dir = %dir.display(), stores = written.len(), "restored archive");
    Ok(written)
}

/// Entry names must stay inside the restore directory.
fn check_entry_name(name: &str) -> CoreResult<()> {
    let path = Path::new(name);
    let safe = !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(CoreError::invalid_format(format!("unsafe entry name '{name}'")))
    }
}

fn read_exact(reader: &mut dyn Read, buf: &mut [u8]) -> CoreResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CoreError::invalid_format("archive is truncated")
        } else {
            e.into()
        }
    })
}

fn read_array<const N: usize>(reader: &mut dyn Read) -> CoreResult<[u8; N]> {
    let mut buf = [0u8; N];
    read_exact(reader, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::env::{DbiFlags, Environment, WriteBatch};
    use crate::types::TxnClock;
    use std::io::Cursor;
    use std::sync::Arc;
    use tessera_codec::IndexKey;

    fn entry(name: &str, data: &[u8]) -> ArchiveEntry {
        ArchiveEntry {
            name: name.to_string(),
            data: data.to_vec(),
        }
    }

    fn archive_bytes(entries: &[ArchiveEntry]) -> Vec<u8> {
        let mut out = Vec::new();
        write_archive(entries, &mut out).unwrap();
        out
    }

    #[test]
    fn archive_header_and_entries() {
        let entries = vec![entry("data/dev/dog.tdb", b"abc"), entry("audit/dev/dog.tdb", b"")];
        let bytes = archive_bytes(&entries);
        assert_eq!(&bytes[..4], b"TBAK");

        let archive = read_archive(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(archive.entries, entries);
        assert_eq!(archive.metadata.entry_count, 2);
        assert_eq!(archive.metadata.size, bytes.len() as u64);
    }

    #[test]
    fn timestamps_clamp_instead_of_wrapping() {
        use std::time::Duration;

        assert_eq!(archive_timestamp(UNIX_EPOCH + Duration::from_millis(1_500)), 1_500);
        assert_eq!(archive_timestamp(UNIX_EPOCH - Duration::from_secs(1)), 0);
        let far = UNIX_EPOCH + Duration::from_secs(u64::MAX / 500);
        assert_eq!(archive_timestamp(far), u64::MAX);

        let bytes = archive_bytes(&[entry("data/dev/dog.tdb", b"abc")]);
        let archive = read_archive(&mut Cursor::new(&bytes)).unwrap();
        assert!(archive.metadata.timestamp > 1_600_000_000_000);
        assert_eq!(archive.metadata.size, u64::try_from(bytes.len()).unwrap());
    }

    #[test]
    fn damaged_entry_fails_checksum() {
        let mut bytes = archive_bytes(&[entry("data/dev/dog.tdb", b"abcdef")]);
        let at = bytes.len() - 6;
        bytes[at] ^= 0xFF;
        assert!(matches!(
            read_archive(&mut Cursor::new(&bytes)).unwrap_err(),
            CoreError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn malformed_archives_are_rejected() {
        assert!(matches!(
            read_archive(&mut Cursor::new(b"NOPE\x01\x00")).unwrap_err(),
            CoreError::InvalidFormat { .. }
        ));

        let bytes = archive_bytes(&[entry("data/dev/dog.tdb", b"abcdef")]);
        let truncated = &bytes[..bytes.len() - 8];
        assert!(matches!(
            read_archive(&mut Cursor::new(truncated)).unwrap_err(),
            CoreError::InvalidFormat { .. }
        ));

        let escaping = archive_bytes(&[entry("../outside.tdb", b"x")]);
        assert!(matches!(
            read_archive(&mut Cursor::new(&escaping)).unwrap_err(),
            CoreError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn restored_table_opens_as_store() {
        let registry = EnvironmentRegistry::new(
            Config::in_memory(),
            Arc::new(crate::stats::BridgeStats::new()),
        );
        let catalog = SchemaCatalog::open(
            Arc::new(Environment::in_memory("system.catalog")),
            Arc::new(TxnClock::new()),
        )
        .unwrap();
        catalog.create_schema("dev").unwrap();
        let table = TableRef::new("dev", "dog");
        catalog
            .create_table(&table, "id", Vec::new(), &["id"])
            .unwrap();

        let key = |s: &str| IndexKey::Text(s.to_string()).encode().unwrap();
        let env = registry.open(&table, EnvKind::Data).unwrap();
        let mut batch = WriteBatch::new();
        batch
            .create_dbi("id", DbiFlags::PRIMARY)
            .put("id", key("k1"), b"v1".to_vec())
            .put("id", key("k2"), b"v2".to_vec());
        env.write(batch).unwrap();
        let mut batch = WriteBatch::new();
        batch.delete("id", key("k1"));
        env.write(batch).unwrap();

        let mut out = Vec::new();
        let meta = BackupWriter::new(&catalog, &registry)
            .backup_table("dev", "dog", true, &mut out)
            .unwrap();
        // No audit store was ever created.
        assert_eq!(meta.entry_count, 1);

        let dir = tempfile::tempdir().unwrap();
        let paths = restore_archive(&mut Cursor::new(&out), dir.path()).unwrap();
        assert_eq!(paths, vec![dir.path().join("data/dev/dog.tdb")]);

        let restored = Environment::open_file("restored", &paths[0], false).unwrap();
        let txn = restored.read_txn();
        assert_eq!(txn.get("id", &key("k2")).unwrap(), Some(b"v2".to_vec()));
        assert_eq!(txn.get("id", &key("k1")).unwrap(), None);
    }
}
