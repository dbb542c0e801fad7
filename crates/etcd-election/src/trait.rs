//! CoordinationStore trait
//!
//! Abstracts the TTL key store so the elector can run against etcd in
//! production and an in-memory store in tests.

use crate::error::StoreError;
use futures::stream::BoxStream;
use std::time::Duration;

/// Kind of change reported by a key watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Create,
    Set,
    CompareAndSwap,
    Delete,
    Expire,
}

impl WatchAction {
    /// True when the key no longer exists after this change
    pub fn is_removal(self) -> bool {
        matches!(self, WatchAction::Delete | WatchAction::Expire)
    }
}

/// A single change observed on a watched key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNotification {
    pub action: WatchAction,
    pub key: String,
    pub value: Option<String>,
    pub index: i64,
}

/// Stream of changes on one key
pub type KeyWatch = BoxStream<'static, Result<WatchNotification, StoreError>>;

/// Key store with TTL keys, create-only writes and compare-and-swap
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `key` with `value` only if absent. Returns the store index of the write.
    async fn create_key(&self, key: &str, value: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Replace `prev` with `value` and refresh the TTL.
    async fn compare_and_swap(
        &self,
        key: &str,
        prev: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<i64, StoreError>;

    /// Watch `key` for changes made after `after_index`.
    async fn watch_key(&self, key: &str, after_index: i64) -> Result<KeyWatch, StoreError>;
}
