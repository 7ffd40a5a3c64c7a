// ⚠️ Connector Errors
//
// Not-found is never an error here: lookups return `Ok(None)` or an empty
// `RecordSet`. Everything below halts the current call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// More than one binding matched a key that must be unique
    #[error("consistency violation on {model}: {message}")]
    ConsistencyViolation { model: String, message: String },

    /// Caller passed a missing or invalid identifier
    #[error("precondition violation: {0}")]
    PreconditionViolation(String),

    /// Binder or store wired to a model that cannot support it
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConnectorError {
    pub fn consistency(model: &str, message: impl Into<String>) -> Self {
        ConnectorError::ConsistencyViolation {
            model: model.to_string(),
            message: message.into(),
        }
    }

    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, ConnectorError::ConsistencyViolation { .. })
    }

    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, ConnectorError::PreconditionViolation(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ConnectorError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
