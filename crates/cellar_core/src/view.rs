//! Views and their liveness.
//!
//! Every accessor reads through a view: either an immutable snapshot of a
//! committed version or the working copy of a write transaction. The
//! registry tracks which views are live. A view ends when its snapshot is
//! dropped, its transaction finishes or the database closes, and any later
//! access through it fails with `StaleAccessor`.

use crate::collection::State;
use crate::error::{CoreError, CoreResult};
use crate::page::PageStore;
use crate::types::SnapshotVersion;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

pub(crate) type ViewId = u64;

/// Registry of live views of one database handle.
#[derive(Debug)]
pub(crate) struct ViewRegistry {
    store: Arc<PageStore>,
    closed: AtomicBool,
    next_view: AtomicU64,
    live: RwLock<HashSet<ViewId>>,
}

impl ViewRegistry {
    pub fn new(store: Arc<PageStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            closed: AtomicBool::new(false),
            next_view: AtomicU64::new(1),
            live: RwLock::new(HashSet::new()),
        })
    }

    fn register(&self) -> ViewId {
        let id = self.next_view.fetch_add(1, Ordering::SeqCst);
        self.live.write().insert(id);
        id
    }

    /// Opens a snapshot view over a committed state, leasing its version.
    pub fn snapshot(self: &Arc<Self>, state: Arc<State>) -> CoreResult<Arc<SnapshotView>> {
        self.store.acquire(state.version)?;
        let id = self.register();
        trace!(view = id, version = %state.version, "opened snapshot view");
        Ok(Arc::new(SnapshotView {
            id,
            registry: Arc::clone(self),
            state,
        }))
    }

    /// Opens a transaction view over a working copy.
    pub fn transaction(self: &Arc<Self>, state: State) -> Arc<TxnView> {
        let id = self.register();
        Arc::new(TxnView {
            id,
            registry: Arc::clone(self),
            state: RwLock::new(state),
        })
    }

    pub fn is_live(&self, id: ViewId) -> bool {
        !self.is_closed() && self.live.read().contains(&id)
    }

    pub fn end(&self, id: ViewId) {
        self.live.write().remove(&id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Ends every view. Leases are not returned; the store goes away too.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.live.write().clear();
    }

    pub fn live_count(&self) -> usize {
        self.live.read().len()
    }
}

/// An immutable view of one committed version.
#[derive(Debug)]
pub(crate) struct SnapshotView {
    id: ViewId,
    registry: Arc<ViewRegistry>,
    state: Arc<State>,
}

impl SnapshotView {
    pub fn version(&self) -> SnapshotVersion {
        self.state.version
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }
}

impl Drop for SnapshotView {
    fn drop(&mut self) {
        self.registry.end(self.id);
        if !self.registry.is_closed() {
            self.registry.store.release(self.state.version);
        }
        trace!(view = self.id, "closed snapshot view");
    }
}

/// The working copy of a write transaction.
#[derive(Debug)]
pub(crate) struct TxnView {
    id: ViewId,
    registry: Arc<ViewRegistry>,
    state: RwLock<State>,
}

impl TxnView {
    pub fn state(&self) -> &RwLock<State> {
        &self.state
    }

    pub fn end(&self) {
        self.registry.end(self.id);
    }
}

/// The view an accessor reads through.
#[derive(Debug, Clone)]
pub(crate) enum View {
    Snapshot(Arc<SnapshotView>),
    Transaction(Arc<TxnView>),
}

impl View {
    pub fn id(&self) -> ViewId {
        match self {
            Self::Snapshot(view) => view.id,
            Self::Transaction(view) => view.id,
        }
    }

    fn registry(&self) -> &Arc<ViewRegistry> {
        match self {
            Self::Snapshot(view) => &view.registry,
            Self::Transaction(view) => &view.registry,
        }
    }

    pub fn is_live(&self) -> bool {
        self.registry().is_live(self.id())
    }

    /// Returns true if both views belong to the same database handle.
    pub fn same_database(&self, registry: &Arc<ViewRegistry>) -> bool {
        Arc::ptr_eq(self.registry(), registry)
    }

    /// Runs `f` against the view's state.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` if the view has ended.
    pub fn read<R>(&self, f: impl FnOnce(&State) -> R) -> CoreResult<R> {
        if !self.is_live() {
            return Err(CoreError::stale(format!("view {} has ended", self.id())));
        }
        match self {
            Self::Snapshot(view) => Ok(f(&view.state)),
            Self::Transaction(view) => Ok(f(&view.state.read())),
        }
    }
}
