//! VSD client errors

use thiserror::Error;

/// Errors that can occur when interacting with the VSD API
#[derive(Debug, Error)]
pub enum VsdError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// VSD API returned an error
    #[error("VSD API error: {0}")]
    Api(String),

    /// Object already exists (HTTP 409 or an "already exists" description)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session could not be established or was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request or client configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl VsdError {
    /// True for the "already exists" answer of a racing create
    pub fn is_conflict(&self) -> bool {
        matches!(self, VsdError::Conflict(_))
    }

    /// Attach the operation and object name to the message
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            VsdError::Api(m) => VsdError::Api(format!("{}: {}", what, m)),
            VsdError::Conflict(m) => VsdError::Conflict(format!("{}: {}", what, m)),
            VsdError::NotFound(m) => VsdError::NotFound(format!("{}: {}", what, m)),
            VsdError::InvalidRequest(m) => VsdError::InvalidRequest(format!("{}: {}", what, m)),
            other => other,
        }
    }
}
