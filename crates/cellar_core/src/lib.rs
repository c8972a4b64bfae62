//! # CellarDB Core
//!
//! Embedded object database engine.
//!
//! This crate provides:
//! - A schema registry with compiled type layouts and migrations
//! - A copy-on-write page store with two alternating meta slots
//! - Immutable snapshots and a single write transaction at a time
//! - Derived primary-key and secondary indexes
//! - String predicates over typed objects

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod collection;
mod config;
mod database;
mod error;
mod file;
mod index;
mod object;
mod page;
mod query;
mod schema;
mod stats;
mod transaction;
mod types;
mod value;
mod view;

pub use config::{Config, DEFAULT_COMPACT_THRESHOLD};
pub use database::{Database, VerifyReport};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use index::{BTreeIndex, CollectionIndexes, OrderedIndex, UniqueIndex};
pub use object::ObjectRef;
pub use page::format::{FileHeader, MetaSlot, DATA_START, FILE_MAGIC};
pub use page::{CompactionStats, FrameInfo, PageLocation, PageStore, PageTable, SpaceUsage, StagedPages};
pub use query::{parse, Comparison, Operator, Results, ResultsIter};
pub use schema::{
    CompiledSchema, Migration, MigrationObject, ObjectSchema, PropertyDescriptor, PropertyKind,
    SchemaDescriptor, SchemaDiff, TypeChange, TypeLayout,
};
pub use stats::{DatabaseStats, OperationCounts, TypeStats};
pub use transaction::{TransactionManager, TransactionState, WriteTransaction};
pub use types::{CollectionId, ObjectId, SnapshotVersion, TransactionId};
pub use value::Value;

pub use cellar_codec::FrameKind;
