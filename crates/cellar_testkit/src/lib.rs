//! # CellarDB Testkit
//!
//! Test utilities for CellarDB.
//!
//! This crate provides:
//! - Demo schemas and database fixtures
//! - Property-based test generators using proptest
//! - A storage backend that tears writes to simulate crashes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cellar_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(&person_schema(), |db| {
//!         db.write(|txn| {
//!             txn.create("Person", vec!["Ann".into(), 23.into(), Value::Null])?;
//!             Ok(())
//!         })
//!         .unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use cellar_core::{Database, Results, SchemaDescriptor, Value};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
