//! Database statistics.
//!
//! Counters are atomic and updated as operations run; [`DatabaseStats`] is
//! a point-in-time report that also covers file space and per-type counts.
//!
//! ```rust,ignore
//! let stats = db.stats()?;
//! println!("{} objects at {}", stats.objects, stats.version);
//! println!("{}", serde_json::to_string_pretty(&stats)?);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters of one database handle.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    objects_created: AtomicU64,
    objects_updated: AtomicU64,
    objects_deleted: AtomicU64,
    queries: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_cancelled: AtomicU64,
    compactions: AtomicU64,
}

impl StatsCounters {
    pub fn record_create(&self) {
        self.objects_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self) {
        self.objects_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.objects_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancel(&self) {
        self.transactions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OperationCounts {
        OperationCounts {
            objects_created: self.objects_created.load(Ordering::Relaxed),
            objects_updated: self.objects_updated.load(Ordering::Relaxed),
            objects_deleted: self.objects_deleted.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_cancelled: self.transactions_cancelled.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }
}

/// Operation counts since the handle was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    /// Objects created.
    pub objects_created: u64,
    /// Property assignments.
    pub objects_updated: u64,
    /// Objects deleted.
    pub objects_deleted: u64,
    /// Result sets opened.
    pub queries: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions cancelled, explicitly or by a failed commit.
    pub transactions_cancelled: u64,
    /// Compactions performed.
    pub compactions: u64,
}

/// Object and index counts of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    /// Type name.
    pub name: String,
    /// Objects in the latest version.
    pub objects: usize,
    /// Indexes maintained for the type, primary key included.
    pub indexes: usize,
}

/// Point-in-time report on a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Data file path; `None` in memory.
    pub path: Option<String>,
    /// Latest committed version.
    pub version: u64,
    /// Format version of the file.
    pub format_version: (u16, u16),
    /// Current file size in bytes.
    pub file_size: u64,
    /// Bytes used by retained versions.
    pub live_bytes: u64,
    /// Bytes a compaction would reclaim.
    pub reclaimable_bytes: u64,
    /// Versions whose page tables are retained.
    pub retained_versions: usize,
    /// Snapshot and transaction views still open.
    pub live_views: usize,
    /// Objects across all types.
    pub objects: usize,
    /// Per-type counts in schema order.
    pub types: Vec<TypeStats>,
    /// Operation counts.
    pub operations: OperationCounts,
}
