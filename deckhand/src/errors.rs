//! Error types for deckhand

use thiserror::Error;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unresolved placeholder '{placeholder}' in task '{task}'")]
    Template { task: String, placeholder: String },

    #[error("Remote execution error: {0}")]
    RemoteExecution(String),

    #[error("External check failed: {0}")]
    ExternalCheckFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
