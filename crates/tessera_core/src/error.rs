//! Error types for tessera core.
//!
//! The variants follow the bridge's error taxonomy: validation failures are
//! raised before any I/O, not-found and conflict errors describe catalog
//! state, comparison and search-type errors come from the search engine,
//! and everything the store itself reports is an engine error.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in tessera core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A request field is missing or malformed.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the request.
        message: String,
    },

    /// Schema does not exist.
    #[error("schema '{schema}' does not exist")]
    SchemaNotFound {
        /// Schema name.
        schema: String,
    },

    /// Table does not exist.
    #[error("table '{schema}.{table}' does not exist")]
    TableNotFound {
        /// Schema name.
        schema: String,
        /// Table name.
        table: String,
    },

    /// Attribute does not exist.
    #[error("attribute '{attribute}' does not exist on '{schema}.{table}'")]
    AttributeNotFound {
        /// Schema name.
        schema: String,
        /// Table name.
        table: String,
        /// Attribute name.
        attribute: String,
    },

    /// A create raced with another create of the same object.
    #[error("already exists: {message}")]
    Conflict {
        /// What already exists.
        message: String,
    },

    /// A search value cannot be compared against the index key type.
    #[error("cannot compare {value_type} value against {index_type} index '{attribute}'")]
    ComparisonType {
        /// Searched attribute.
        attribute: String,
        /// Type of the search value.
        value_type: String,
        /// Key type of the index.
        index_type: String,
    },

    /// The search value cannot be classified into a search type.
    #[error("unknown search type for value {value}")]
    UnknownSearchType {
        /// Rendered search value.
        value: String,
    },

    /// The store rejected an operation.
    #[error("engine error: {message}")]
    Engine {
        /// Description of the failure.
        message: String,
    },

    /// No environment exists at the resolved location.
    #[error("environment not found: {location}")]
    EnvironmentNotFound {
        /// Path or label of the environment.
        location: String,
    },

    /// A named index does not exist in the environment.
    #[error("index '{name}' does not exist in environment '{environment}'")]
    DbiNotFound {
        /// Environment label.
        environment: String,
        /// Index name.
        name: String,
    },

    /// An optimistic write lost against a concurrent update.
    #[error("version conflict on '{table}' row {hash}")]
    VersionConflict {
        /// Table label.
        table: String,
        /// Rendered hash value of the row.
        hash: String,
    },

    /// The commit log is corrupted.
    #[error("commit log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A backup archive is malformed.
    #[error("invalid archive: {message}")]
    InvalidFormat {
        /// What is wrong with it.
        message: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] tessera_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Creates a commit log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid-archive error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a table-not-found error.
    pub fn table_not_found(schema: &str, table: &str) -> Self {
        Self::TableNotFound {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Whether the error reports something already gone. Cascading drops
    /// treat these as success.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SchemaNotFound { .. }
            | Self::TableNotFound { .. }
            | Self::AttributeNotFound { .. }
            | Self::EnvironmentNotFound { .. }
            | Self::DbiNotFound { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether the error is a benign "already exists" race.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
