//! Error types for entity metadata

use formkit_common::{ErrorSeverity, Severity};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for metadata operations
pub type Result<T> = std::result::Result<T, FieldsError>;

/// Errors that can occur while defining or resolving entity metadata
#[derive(Debug, Error)]
pub enum FieldsError {
    /// Entity not registered
    #[error("entity not found: {name}")]
    EntityNotFound { name: String },

    /// Named domain not registered
    #[error("domain not found: {name}")]
    DomainNotFound { name: String },

    /// Two entries with the same name in one entity
    #[error("duplicate entry '{name}' in entity '{entity}'")]
    DuplicateEntry { entity: String, name: String },

    /// Two entities registered under the same name
    #[error("duplicate entity: {name}")]
    DuplicateEntity { name: String },

    /// Identity key does not name a field entry
    #[error("identity '{name}' of entity '{entity}' is not a field entry")]
    InvalidIdentity { entity: String, name: String },

    /// Object or list entry pointing at an unregistered entity
    #[error("entry '{entry}' of entity '{entity}' references unknown entity '{target}'")]
    UnresolvedReference {
        entity: String,
        entry: String,
        target: String,
    },

    /// Declarative rule could not be compiled
    #[error("invalid rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },

    /// Metadata directory not found
    #[error("metadata directory not found: {path}")]
    NotInitialized { path: PathBuf },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl Severity for FieldsError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            FieldsError::Io(_) | FieldsError::NotInitialized { .. } => ErrorSeverity::Error,
            _ => ErrorSeverity::Critical,
        }
    }
}
