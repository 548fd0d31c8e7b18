//! Error types for node graphs

use formkit_common::{ErrorSeverity, Severity};
use formkit_fields::FieldsError;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by node and view model operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entry not declared by the node's entity
    #[error("entity '{entity}' has no entry '{name}'")]
    UnknownEntry { entity: String, name: String },

    /// Entry used as the wrong kind (e.g. a list read as a field)
    #[error("entry '{name}' of entity '{entity}' is a {actual}, not a {expected}")]
    KindMismatch {
        entity: String,
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Data does not match the declared entity shape
    #[error("expected {expected} at '{path}' for entity '{entity}'")]
    ShapeMismatch {
        entity: String,
        path: String,
        expected: &'static str,
    },

    /// List index past the end
    #[error("index {index} out of range for list '{name}' of length {len}")]
    IndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },

    /// Field value could not be decoded into the requested type
    #[error("failed to decode field '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Metadata lookup failed
    #[error(transparent)]
    Metadata(#[from] FieldsError),
}

impl Severity for StoreError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            StoreError::IndexOutOfRange { .. } | StoreError::Decode { .. } => ErrorSeverity::Error,
            StoreError::Metadata(e) => e.severity(),
            _ => ErrorSeverity::Critical,
        }
    }
}
