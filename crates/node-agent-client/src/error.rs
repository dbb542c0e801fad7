//! Node agent client errors

use thiserror::Error;

/// Errors that can occur when talking to a node agent
#[derive(Debug, Error)]
pub enum NodeAgentError {
    /// HTTP request/response error, including an unreachable node
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No attachment with this name is cached on the node
    #[error("Not found: {0}")]
    NotFound(String),

    /// The node refused the attachment (scope mismatch or malformed body)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The node agent returned an unexpected status
    #[error("Node agent error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TLS material could not be loaded
    #[error("TLS configuration error: {0}")]
    Tls(String),
}
