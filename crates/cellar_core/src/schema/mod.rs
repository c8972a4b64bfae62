//! Schema registry.
//!
//! Declared types are described by a [`SchemaDescriptor`], validated and
//! compiled once into a [`CompiledSchema`] of fixed [`TypeLayout`]s, and
//! compared with the schema stored in the file by [`SchemaDiff`]. Layout
//! changes are carried out by a caller-supplied [`Migration`].

mod compiled;
mod descriptor;
mod diff;
mod migration;

pub use compiled::{CompiledSchema, TypeLayout};
pub use descriptor::{ObjectSchema, PropertyDescriptor, PropertyKind, SchemaDescriptor};
pub use diff::{SchemaDiff, TypeChange};
pub use migration::{Migration, MigrationObject};

pub(crate) use migration::{map_objects, MappedObject, StoredObject};
