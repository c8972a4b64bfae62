//! Index maintenance and lookup.
//!
//! Indexes are access paths, not stored data: they are derived from the
//! objects of a collection, rebuilt at open and kept in step with every
//! write inside a transaction. Queries pick an index automatically; callers
//! never name one.
//!
//! - [`UniqueIndex`]: primary-key lookup with uniqueness enforcement
//! - [`BTreeIndex`]: ordered lookups, ranges and string prefixes

mod btree;
mod manager;
mod traits;
mod unique;

pub use btree::BTreeIndex;
pub use manager::CollectionIndexes;
pub use traits::OrderedIndex;
pub use unique::UniqueIndex;
