//! Error types for CellarDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// Embedders that only need to decide how to react (show a schema problem,
/// retry later, fix a bug) can match on this instead of on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid declared schema, or a persisted schema that needs migrating.
    Schema,
    /// The file could not be opened, read or written.
    Open,
    /// A primary-key value already exists in the collection.
    DuplicateKey,
    /// An accessor or result set outlived its view.
    StaleAccessor,
    /// The database handle was closed.
    ClosedHandle,
    /// A transaction call that is not valid in the current state.
    TransactionState,
    /// The caller passed something the schema or grammar does not allow.
    Usage,
}

/// Errors that can occur in CellarDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] cellar_storage::StorageError),

    /// Page body encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] cellar_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The declared schema is invalid.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// The persisted schema differs from the declared one and no migration
    /// was supplied.
    #[error("migration required: {message}")]
    MigrationRequired {
        /// Summary of the incompatible changes.
        message: String,
    },

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The data file is damaged beyond what recovery can repair.
    #[error("database corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another handle has exclusive access")]
    DatabaseLocked,

    /// A primary-key value is already used by another object.
    #[error("duplicate primary key {key} for type '{type_name}'")]
    DuplicateKey {
        /// Object type name.
        type_name: String,
        /// Rendered key value.
        key: String,
    },

    /// An accessor was used after its view ended.
    #[error("stale accessor: {message}")]
    StaleAccessor {
        /// What was accessed.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// A transaction operation is not valid in the current state.
    #[error("invalid transaction state: {message}")]
    TransactionState {
        /// Description of why the call is invalid.
        message: String,
    },

    /// Object type not declared in the schema.
    #[error("unknown object type: {name}")]
    UnknownType {
        /// Requested type name.
        name: String,
    },

    /// Property not declared on the object type.
    #[error("unknown property '{property}' on type '{type_name}'")]
    UnknownProperty {
        /// Object type name.
        type_name: String,
        /// Requested property name.
        property: String,
    },

    /// A value does not match the declared property kind.
    #[error("type mismatch for '{type_name}.{property}': {message}")]
    TypeMismatch {
        /// Object type name.
        type_name: String,
        /// Property name.
        property: String,
        /// What was expected and what was found.
        message: String,
    },

    /// Object no longer exists in the view.
    #[error("object not found: {message}")]
    ObjectNotFound {
        /// Which object.
        message: String,
    },

    /// Predicate failed to parse or bind.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A mutator asked for its transaction to be rolled back.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason given by the caller.
        reason: String,
    },
}

impl CoreError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema { .. } | Self::MigrationRequired { .. } => ErrorKind::Schema,
            Self::Storage(_)
            | Self::Codec(_)
            | Self::Io(_)
            | Self::InvalidFormat { .. }
            | Self::Corruption { .. }
            | Self::DatabaseLocked => ErrorKind::Open,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::StaleAccessor { .. } => ErrorKind::StaleAccessor,
            Self::DatabaseClosed => ErrorKind::ClosedHandle,
            Self::TransactionState { .. } => ErrorKind::TransactionState,
            Self::UnknownType { .. }
            | Self::UnknownProperty { .. }
            | Self::TypeMismatch { .. }
            | Self::ObjectNotFound { .. }
            | Self::InvalidQuery { .. }
            | Self::InvalidOperation { .. }
            | Self::Aborted { .. } => ErrorKind::Usage,
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a migration required error.
    pub fn migration_required(message: impl Into<String>) -> Self {
        Self::MigrationRequired {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a duplicate key error.
    pub fn duplicate_key(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            type_name: type_name.into(),
            key: key.into(),
        }
    }

    /// Creates a stale accessor error.
    pub fn stale(message: impl Into<String>) -> Self {
        Self::StaleAccessor {
            message: message.into(),
        }
    }

    /// Creates a transaction state error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            type_name: type_name.into(),
            property: property.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(
        type_name: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            type_name: type_name.into(),
            property: property.into(),
            message: message.into(),
        }
    }

    /// Creates an object not found error.
    pub fn object_not_found(message: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates the error a mutator returns to roll back its transaction.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}
