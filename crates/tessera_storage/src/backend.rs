//! Storage backend trait definition.

use crate::error::StorageResult;
use std::io::Write;

/// Chunk size used when streaming a store's bytes out.
const COPY_CHUNK: usize = 64 * 1024;

/// A low-level byte store backing one tessera environment.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `size` reflects appends made through *any* handle of the same store,
///   so a reader can catch up with commits written elsewhere
/// - between `lock_exclusive` and `unlock` no other handle may append
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ReadPastEnd` if the range is not fully inside the store, or
    /// an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes appended data to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata to durable media.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything after `new_size`. Used to cut a torn tail after a
    /// crash mid-append.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTruncate` if `new_size` exceeds the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Takes the cross-handle writer lock, blocking until it is free.
    ///
    /// Backends that cannot be shared between handles keep the default
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `Lock` if the lock cannot be acquired.
    fn lock_exclusive(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Releases the writer lock taken by [`Self::lock_exclusive`].
    ///
    /// # Errors
    ///
    /// Returns `Lock` if the lock cannot be released.
    fn unlock(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Streams the store's bytes, unmodified, into `out`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the store or writing `out` fails.
    fn copy_to(&self, out: &mut dyn Write) -> StorageResult<u64> {
        let size = self.size()?;
        let mut offset = 0u64;
        while offset < size {
            let len = usize::try_from(size - offset).map_or(COPY_CHUNK, |n| n.min(COPY_CHUNK));
            let chunk = self.read_at(offset, len)?;
            out.write_all(&chunk)?;
            offset += chunk.len() as u64;
        }
        out.flush()?;
        Ok(size)
    }
}
