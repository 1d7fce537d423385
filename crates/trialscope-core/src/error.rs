//! Error types for trialscope-core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Server error in stream ({code}): {message}")]
    StreamFrame { code: i64, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(i64),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("{0}")]
    Other(String),
}

impl ScopeError {
    /// True when the failure came from our own cancellation rather than the
    /// master or the network. Aborted requests are never surfaced as errors.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ScopeError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ScopeError::ExperimentNotFound(_)
                | ScopeError::ModelNotFound(_)
                | ScopeError::Api { status: 404, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScopeError>;
