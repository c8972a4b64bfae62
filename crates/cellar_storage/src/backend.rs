//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for CellarDB.
///
/// Storage backends are **opaque byte stores**. They provide simple operations
/// for reading, appending, overwriting and flushing data. CellarDB owns all
/// file format interpretation - backends do not understand page frames or
/// meta slots.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` never grows the store past `offset + data.len()`
/// - `flush` ensures all written data is handed to the OS
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The offset is beyond the current size
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites bytes starting at `offset`.
    ///
    /// The write may extend the storage if it runs past the current end,
    /// but `offset` itself must not lie beyond the current size.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` is greater than the current size or
    /// an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - it ensures that
    /// file metadata (size, timestamps) is also durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// Used to discard staged pages of a cancelled transaction and the
    /// tail of a partially written snapshot during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The truncation fails
    /// - `new_size` is greater than current size
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the entire contents of the storage.
    ///
    /// After a crash either the old or the new contents are observed,
    /// never a mix. Used by compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement cannot be made durable.
    fn replace_contents(&mut self, data: &[u8]) -> StorageResult<()>;
}
