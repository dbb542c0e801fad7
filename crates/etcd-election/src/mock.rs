//! In-memory coordination store for unit tests
//!
//! Keys never expire on their own; tests drive expiry explicitly with
//! [`MemoryStore::expire`] so timing is deterministic.

use crate::error::StoreError;
use crate::store_trait::{CoordinationStore, KeyWatch, WatchAction, WatchNotification};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

struct Inner {
    keys: HashMap<String, String>,
    index: i64,
    history: Vec<WatchNotification>,
}

/// Mock store backed by a HashMap
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<WatchNotification>,
    // Keys whose next compare-and-swap fails as if the store were unreachable
    failing: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                keys: HashMap::new(),
                index: 0,
                history: Vec::new(),
            })),
            events,
            failing: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().keys.get(key).cloned()
    }

    /// Seed a key as if another agent had created it
    pub fn insert(&self, key: &str, value: &str) {
        self.record(key, Some(value), WatchAction::Set);
    }

    /// Expire a key as if its TTL elapsed
    pub fn expire(&self, key: &str) {
        self.record(key, None, WatchAction::Expire);
    }

    /// Delete a key
    pub fn delete(&self, key: &str) {
        self.record(key, None, WatchAction::Delete);
    }

    /// Number of compare-and-swap writes seen on `key`
    pub fn renewals(&self, key: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .history
            .iter()
            .filter(|n| n.key == key && n.action == WatchAction::CompareAndSwap)
            .count()
    }

    /// Make the next compare-and-swap on `key` fail with `Unavailable`
    pub fn fail_next_swap(&self, key: &str) {
        self.failing.lock().unwrap().push(key.to_string());
    }

    fn record(&self, key: &str, value: Option<&str>, action: WatchAction) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.index += 1;
        let index = inner.index;
        match value {
            Some(v) => {
                inner.keys.insert(key.to_string(), v.to_string());
            }
            None => {
                inner.keys.remove(key);
            }
        }
        let notification = WatchNotification {
            action,
            key: key.to_string(),
            value: value.map(str::to_string),
            index,
        };
        inner.history.push(notification.clone());
        // Sent under the lock so watchers never miss or duplicate an event
        let _ = self.events.send(notification);
        index
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn create_key(&self, key: &str, value: &str, _ttl: Duration) -> Result<i64, StoreError> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.keys.contains_key(key) {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                    index: inner.index,
                });
            }
        }
        Ok(self.record(key, Some(value), WatchAction::Create))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        prev: &str,
        value: &str,
        _ttl: Duration,
    ) -> Result<i64, StoreError> {
        {
            let mut failing = self.failing.lock().unwrap();
            if let Some(pos) = failing.iter().position(|k| k == key) {
                failing.remove(pos);
                return Err(StoreError::Unavailable(format!("injected failure on {}", key)));
            }
        }
        {
            let inner = self.inner.lock().unwrap();
            match inner.keys.get(key) {
                None => return Err(StoreError::KeyNotFound(key.to_string())),
                Some(current) if current != prev => {
                    return Err(StoreError::CompareFailed {
                        key: key.to_string(),
                        current: current.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(self.record(key, Some(value), WatchAction::CompareAndSwap))
    }

    async fn watch_key(&self, key: &str, after_index: i64) -> Result<KeyWatch, StoreError> {
        let (replay, rx) = {
            let inner = self.inner.lock().unwrap();
            let replay: Vec<_> = inner
                .history
                .iter()
                .filter(|n| n.key == key && n.index > after_index)
                .cloned()
                .collect();
            (replay, self.events.subscribe())
        };
        let last_replayed = replay.last().map(|n| n.index).unwrap_or(after_index);

        let watched = key.to_string();
        let live = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(n) => return Some((Ok(n), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |n| {
            let keep = matches!(n, Ok(n) if n.key == watched && n.index > last_replayed);
            futures::future::ready(keep)
        });

        Ok(futures::stream::iter(replay.into_iter().map(Ok)).chain(live).boxed())
    }
}
