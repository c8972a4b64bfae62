//! Write transactions.
//!
//! CellarDB runs one writer at a time. A write transaction works on a
//! copy-on-write clone of the latest snapshot and keeps a change log of the
//! objects it touched. Commit validates the touched objects, writes their
//! pages and publishes one new version; cancel throws the copy away.

mod manager;
mod state;
mod write;

pub use manager::TransactionManager;
pub use state::TransactionState;
pub use write::WriteTransaction;

pub(crate) use state::{ChangeKind, ChangeLog};
