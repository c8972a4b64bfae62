//! Single-writer coordination.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

/// Hands out the write lock and transaction ids.
///
/// Only one write transaction runs at a time. A second writer on another
/// thread blocks until the first finishes; a second writer on the thread
/// that already holds the lock is refused instead of deadlocking.
#[derive(Debug)]
pub struct TransactionManager {
    write_lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
    next_txid: AtomicU64,
}

impl TransactionManager {
    /// Creates a manager with no active writer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            write_lock: Mutex::new(()),
            owner: Mutex::new(None),
            next_txid: AtomicU64::new(1),
        }
    }

    /// Takes the write lock, blocking while another thread holds it.
    ///
    /// # Errors
    ///
    /// Returns `TransactionState` if the calling thread already holds it.
    pub(crate) fn begin(&self) -> CoreResult<(MutexGuard<'_, ()>, TransactionId)> {
        let me = thread::current().id();
        if *self.owner.lock() == Some(me) {
            return Err(CoreError::transaction_state(
                "a write transaction is already active on this thread",
            ));
        }
        let guard = self.write_lock.lock();
        *self.owner.lock() = Some(me);
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        Ok((guard, id))
    }

    /// Releases the write lock taken by [`TransactionManager::begin`].
    pub(crate) fn end(&self, guard: MutexGuard<'_, ()>) {
        *self.owner.lock() = None;
        drop(guard);
    }

    /// Returns true while a write transaction holds the lock.
    #[must_use]
    pub fn is_writing(&self) -> bool {
        self.owner.lock().is_some()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn nested_begin_on_same_thread_is_refused() {
        let manager = TransactionManager::new();
        let (guard, first) = manager.begin().unwrap();
        let err = manager.begin().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionState);

        manager.end(guard);
        let (guard, second) = manager.begin().unwrap();
        assert!(second > first);
        manager.end(guard);
        assert!(!manager.is_writing());
    }

    #[test]
    fn second_thread_waits_for_writer() {
        let manager = Arc::new(TransactionManager::new());
        let released = Arc::new(AtomicBool::new(false));
        let (guard, _) = manager.begin().unwrap();

        let waiter = {
            let manager = Arc::clone(&manager);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let (guard, _) = manager.begin().unwrap();
                let saw_release = released.load(Ordering::SeqCst);
                manager.end(guard);
                saw_release
            })
        };

        thread::sleep(Duration::from_millis(50));
        released.store(true, Ordering::SeqCst);
        manager.end(guard);
        assert!(waiter.join().unwrap());
    }
}
