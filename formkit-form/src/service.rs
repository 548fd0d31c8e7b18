//! Collaborator contract for loading and persisting form data

use std::collections::BTreeMap;

use async_trait::async_trait;
use formkit_common::{ErrorSeverity, Severity};
use serde_json::Value;
use thiserror::Error;

/// Failure reported by a [`FormService`]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// The backend refused the data. `fields` maps field paths to messages
    /// shown next to the offending inputs.
    #[error("rejected: {message}")]
    Rejected {
        message: String,
        fields: Option<BTreeMap<String, String>>,
    },

    /// The service does not implement this operation
    #[error("operation '{operation}' is not supported")]
    Unsupported { operation: &'static str },

    /// The call did not reach the backend or the reply was unusable
    #[error("transport error: {0}")]
    Transport(String),
}

impl ServiceError {
    /// Rejection carrying per-field messages.
    pub fn rejected_fields<K, V>(message: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        ServiceError::Rejected {
            message: message.into(),
            fields: Some(
                fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Field-path → message map, if the backend supplied one.
    pub fn field_errors(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            ServiceError::Rejected { fields, .. } => fields.as_ref(),
            _ => None,
        }
    }
}

impl Severity for ServiceError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            ServiceError::Rejected { .. } | ServiceError::Transport(_) => ErrorSeverity::Error,
            ServiceError::Unsupported { .. } => ErrorSeverity::Critical,
        }
    }
}

/// Load, save and delete operations supplied by the embedding application.
///
/// Only `save` is mandatory. A service without `load_params` never loads.
#[async_trait(?Send)]
pub trait FormService {
    /// Parameters for the next load. `None` suppresses loading.
    fn load_params(&self) -> Option<Vec<Value>> {
        None
    }

    async fn load(&self, _params: &[Value]) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported { operation: "load" })
    }

    /// Persist `data` and return the stored entity.
    async fn save(&self, data: &Value) -> Result<Value, ServiceError>;

    async fn delete(&self, _data: &Value) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported { operation: "delete" })
    }
}
