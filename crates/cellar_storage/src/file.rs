//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix of the sibling file used while replacing contents.
const REPLACE_SUFFIX: &str = "compact";

/// A file-based storage backend.
///
/// This backend provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
/// - `replace_contents()` writes a sibling file, syncs it and renames it
///   over the original
///
/// # Example
///
/// ```no_run
/// use cellar_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("data.cellar")).unwrap();
/// let offset = backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();  // Ensure data is durable
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    /// Syncs the parent directory so a rename is durable.
    #[cfg(unix)]
    fn sync_parent(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    /// NTFS journals metadata operations; no directory handle to sync.
    #[cfg(not(unix))]
    fn sync_parent(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        if offset > *size {
            return Err(StorageError::WriteGap {
                offset,
                size: *size,
            });
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size = (*size).max(offset + data.len() as u64);

        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, *size
                ),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn replace_contents(&mut self, data: &[u8]) -> StorageResult<()> {
        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".");
        temp_path.push(REPLACE_SUFFIX);
        let temp_path = PathBuf::from(temp_path);

        let mut temp = File::create(&temp_path)?;
        temp.write_all(data)?;
        temp.sync_all()?;
        drop(temp);

        let mut file = self.file.write();
        let mut size = self.size.write();

        fs::rename(&temp_path, &self.path)?;
        self.sync_parent()?;

        *file = Self::open_file(&self.path)?;
        *size = data.len() as u64;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        let mut backend = FileBackend::open(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_write_at_overwrites_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello world").unwrap();
        backend.write_at(0, b"HELLO").unwrap();

        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"HELLO world");
    }

    #[test]
    fn file_write_at_extends_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"abc").unwrap();
        backend.write_at(2, b"xyz").unwrap();

        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.read_at(0, 5).unwrap(), b"abxyz");
    }

    #[test]
    fn file_write_at_gap_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        let mut backend = FileBackend::open(&path).unwrap();
        let result = backend.write_at(4, b"x");
        assert!(matches!(result, Err(StorageError::WriteGap { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        {
            let backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.size().unwrap(), 15);

            let data = backend.read_at(0, 15).unwrap();
            assert_eq!(&data, b"persistent data");
        }
    }

    #[test]
    fn file_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();

        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);
        assert!(backend.truncate(6).is_err());
    }

    #[test]
    fn file_replace_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cellar");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"a long stretch of obsolete data").unwrap();
        backend.replace_contents(b"fresh").unwrap();

        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.read_at(0, 5).unwrap(), b"fresh");
        assert!(!dir.path().join("test.cellar.compact").exists());

        // Appends continue on the replaced file.
        backend.append(b"!").unwrap();
        drop(backend);
        assert_eq!(std::fs::read(&path).unwrap(), b"fresh!");
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("test.cellar");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }
}
