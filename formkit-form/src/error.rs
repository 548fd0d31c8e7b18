//! Error types for form controllers

use formkit_common::{ErrorSeverity, Severity};
use formkit_store::StoreError;
use thiserror::Error;

use crate::service::ServiceError;

/// Result type for form operations
pub type Result<T> = std::result::Result<T, FormError>;

/// Errors raised by form controllers
#[derive(Debug, Error)]
pub enum FormError {
    /// Data did not fit the form's entity, or a node operation failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A collaborator call failed
    #[error("service call failed: {0}")]
    Service(#[from] ServiceError),

    /// Settings could not be extracted
    #[error("invalid form settings: {source}")]
    Settings {
        #[source]
        source: Box<figment::Error>,
    },
}

impl From<figment::Error> for FormError {
    fn from(error: figment::Error) -> Self {
        FormError::Settings {
            source: Box::new(error),
        }
    }
}

impl Severity for FormError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            FormError::Store(e) => e.severity(),
            FormError::Service(e) => e.severity(),
            FormError::Settings { .. } => ErrorSeverity::Critical,
        }
    }
}
