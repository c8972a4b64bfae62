//! Crash simulation for CellarDB.
//!
//! [`CrashableBackend`] wraps another backend and stops persisting bytes
//! once a write budget is spent. The write that crosses the budget is torn:
//! its prefix reaches the inner backend, the rest is lost, and every later
//! write, truncate or sync fails as if the process had died.
//!
//! The usual pattern wraps a shared [`InMemoryBackend`], runs a workload
//! until the crash, drops the database, then opens a fresh database over
//! the same bytes to check what recovery produced.
//!
//! ```rust,ignore
//! let memory = InMemoryBackend::new();
//! let backend = CrashableBackend::new(Box::new(memory.shared()));
//! let crash = backend.controller();
//! let db = Database::open_with_backend(Config::default(), &schema, Box::new(backend))?;
//! crash.crash_after(crash.bytes_written() + 10);
//! // ... commit fails part-way ...
//! drop(db);
//! let recovered = Database::open_with_backend(Config::default(), &schema, Box::new(memory.shared()))?;
//! ```

use cellar_core::{Config, CoreResult, Database, SchemaDescriptor};
use cellar_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    budget: AtomicU64,
    written: AtomicU64,
    crashed: AtomicBool,
}

/// Arms and inspects a [`CrashableBackend`] after it was handed to a
/// database.
#[derive(Debug, Clone)]
pub struct CrashController {
    state: Arc<CrashState>,
}

impl CrashController {
    /// Crash once `bytes` bytes in total have been written.
    pub fn crash_after(&self, bytes: u64) {
        self.state.budget.store(bytes, Ordering::SeqCst);
    }

    /// Bytes written so far, torn prefixes included.
    pub fn bytes_written(&self) -> u64 {
        self.state.written.load(Ordering::SeqCst)
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Clears the crash and removes the budget.
    pub fn reset(&self) {
        self.state.budget.store(u64::MAX, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Wraps `inner` with no write budget.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState {
                budget: AtomicU64::new(u64::MAX),
                written: AtomicU64::new(0),
                crashed: AtomicBool::new(false),
            }),
        }
    }

    /// A handle that stays usable after the backend is boxed away.
    pub fn controller(&self) -> CrashController {
        CrashController {
            state: Arc::clone(&self.state),
        }
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.state.crashed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Charges `len` bytes against the budget. Returns how many may be
    /// written; fewer than `len` means this write crashes.
    fn charge(&self, len: usize) -> StorageResult<usize> {
        self.check_alive()?;
        let written = self.state.written.load(Ordering::SeqCst);
        let budget = self.state.budget.load(Ordering::SeqCst);
        let remaining = budget.saturating_sub(written);
        let allowed = (len as u64).min(remaining);
        self.state.written.fetch_add(allowed, Ordering::SeqCst);
        if allowed < len as u64 {
            self.state.crashed.store(true, Ordering::SeqCst);
        }
        Ok(allowed as usize)
    }
}

fn simulated_crash() -> StorageError {
    StorageError::Io(std::io::Error::other("simulated crash during write"))
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let allowed = self.charge(data.len())?;
        if allowed < data.len() {
            if allowed > 0 {
                self.inner.append(&data[..allowed])?;
            }
            return Err(simulated_crash());
        }
        self.inner.append(data)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let allowed = self.charge(data.len())?;
        if allowed < data.len() {
            if allowed > 0 {
                self.inner.write_at(offset, &data[..allowed])?;
            }
            return Err(simulated_crash());
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.truncate(new_size)
    }

    // Replacement is all-or-nothing: a crash leaves the old contents.
    fn replace_contents(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.charge(data.len())? < data.len() {
            return Err(simulated_crash());
        }
        self.inner.replace_contents(data)
    }
}

/// A database over a [`CrashableBackend`] plus what is needed to recover
/// it afterwards.
pub struct CrashHarness {
    memory: InMemoryBackend,
    controller: CrashController,
    schema: SchemaDescriptor,
    config: Config,
}

impl CrashHarness {
    /// Opens a fresh database with automatic compaction disabled.
    ///
    /// # Errors
    ///
    /// Returns the open error.
    pub fn open(schema: &SchemaDescriptor) -> CoreResult<(Self, Database)> {
        let config = Config::default().compact_threshold(0);
        let memory = InMemoryBackend::new();
        let backend = CrashableBackend::new(Box::new(memory.shared()));
        let controller = backend.controller();
        let db = Database::open_with_backend(config.clone(), schema, Box::new(backend))?;
        Ok((
            Self {
                memory,
                controller,
                schema: schema.clone(),
                config,
            },
            db,
        ))
    }

    /// The crash controller of the wrapped backend.
    pub fn controller(&self) -> &CrashController {
        &self.controller
    }

    /// Crash `bytes` bytes after the current write position.
    pub fn crash_in(&self, bytes: u64) {
        self.controller
            .crash_after(self.controller.bytes_written() + bytes);
    }

    /// Opens a new database over whatever bytes survived.
    ///
    /// # Errors
    ///
    /// Returns the recovery error.
    pub fn recover(&self) -> CoreResult<Database> {
        Database::open_with_backend(
            self.config.clone(),
            &self.schema,
            Box::new(self.memory.shared()),
        )
    }

    /// Current size of the surviving bytes.
    pub fn file_size(&self) -> u64 {
        self.memory.data().len() as u64
    }
}
