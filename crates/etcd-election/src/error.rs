//! Election and store errors

use thiserror::Error;

/// Errors returned by a coordination store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Create-only write found the key present; `index` is the store revision
    /// at which the existing key was observed
    #[error("key {key} already exists (index {index})")]
    AlreadyExists { key: String, index: i64 },

    /// Key expired or was deleted
    #[error("key {0} not found")]
    KeyNotFound(String),

    /// Compare-and-swap saw a different value than expected
    #[error("compare failed for key {key}: current value {current:?}")]
    CompareFailed { key: String, current: String },

    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Watch stream ended
    #[error("watch on {0} closed")]
    WatchClosed(String),

    /// etcd transport or protocol error
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
}

/// Errors surfaced to the agent by the elector
#[derive(Debug, Error)]
pub enum ElectionError {
    /// Another agent already registered this host identity
    #[error("host identity {0} is already registered")]
    DuplicateIdentity(String),

    /// A key this agent held was lost during renewal
    #[error("lease on {0} was lost")]
    LeaseLost(String),

    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Watch failed while blocking for a key
    #[error("watch error: {0}")]
    Watch(StoreError),

    /// Renewal task ended unexpectedly
    #[error("renewal task failed: {0}")]
    Renewal(String),
}
