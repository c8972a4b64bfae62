//! Data file location and locking.
//!
//! A database is one data file plus an advisory lock file beside it:
//!
//! ```text
//! <dir>/
//! ├─ app.cellar        # data file
//! └─ app.cellar.lock   # held exclusively while a handle is open
//! ```

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use cellar_storage::FileBackend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_SUFFIX: &str = "lock";

/// An open data file with its exclusive lock held.
#[derive(Debug)]
pub(crate) struct DatabaseFile {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseFile {
    /// Resolves `path`, applies the create/exists policy of `config`, takes
    /// the lock and opens the data file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` when the path is a directory or the policy
    /// forbids opening it, and `DatabaseLocked` when another handle holds
    /// the lock.
    pub fn open(path: &Path, config: &Config) -> CoreResult<(Self, FileBackend)> {
        let path = resolve_path(path)?;

        if path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is a directory: {}",
                path.display()
            )));
        }

        let exists = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        if !exists && !config.create_if_missing {
            return Err(CoreError::invalid_format(format!(
                "database does not exist and create_if_missing is false: {}",
                path.display()
            )));
        }
        if exists && config.error_if_exists {
            return Err(CoreError::invalid_format(format!(
                "database already exists and error_if_exists is true: {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(&path))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        let backend = FileBackend::open(&path)?;
        debug!(path = %path.display(), existing = exists, "opened data file");

        Ok((
            Self {
                path,
                _lock_file: lock_file,
            },
            backend,
        ))
    }

    /// Absolute path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Makes `path` absolute against the current directory.
///
/// # Errors
///
/// Returns an error if the current directory cannot be determined.
pub(crate) fn resolve_path(path: &Path) -> CoreResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::invalid_format("database path is empty"));
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Path of the lock file for a data file.
#[must_use]
pub(crate) fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}
