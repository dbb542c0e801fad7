//! Host registration and leader election
//!
//! Every agent first claims `<prefix>/hosts/<identity>` with a create-only
//! write. Then agents compete for `<prefix>/leader`: the loser watches the key
//! and retries the create once it is deleted or expires. Each held key is kept
//! alive by a renewal task that rewrites the key onto itself before the TTL
//! runs out.

use crate::error::{ElectionError, StoreError};
use crate::store_trait::CoordinationStore;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default key prefix shared by all agents
pub const DEFAULT_PREFIX: &str = "/sdn-agent";
/// Default TTL of host and leader keys
pub const DEFAULT_TTL: Duration = Duration::from_secs(9);
/// Default expected number of competing agents
pub const DEFAULT_NR_CLIENTS: u32 = 3;

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(100);

/// Election parameters
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub prefix: String,
    pub identity: String,
    pub ttl: Duration,
    pub nr_clients: u32,
}

impl ElectionConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            identity: identity.into(),
            ttl: DEFAULT_TTL,
            nr_clients: DEFAULT_NR_CLIENTS,
        }
    }

    pub fn host_key(&self) -> String {
        format!("{}/hosts/{}", self.prefix.trim_end_matches('/'), self.identity)
    }

    pub fn leader_key(&self) -> String {
        format!("{}/leader", self.prefix.trim_end_matches('/'))
    }

    /// Time between renewals: TTL divided by the number of competing agents
    pub fn renew_interval(&self) -> Duration {
        (self.ttl / self.nr_clients.max(1)).max(MIN_RENEW_INTERVAL)
    }
}

/// A key held by this agent together with its renewal task
///
/// Dropping the handle aborts the renewal and lets the key expire.
pub struct LeaseHandle {
    key: String,
    renewal: JoinHandle<ElectionError>,
}

impl std::fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseHandle")
            .field("key", &self.key)
            .field("renewing", &!self.renewal.is_finished())
            .finish()
    }
}

impl LeaseHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait until the renewal task stops; the returned error says why.
    pub async fn lost(&mut self) -> ElectionError {
        match (&mut self.renewal).await {
            Ok(err) => err,
            Err(join) => ElectionError::Renewal(join.to_string()),
        }
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}

/// Runs host registration and leader election against a coordination store
#[derive(Clone)]
pub struct LeaderElector {
    store: Arc<dyn CoordinationStore>,
    config: ElectionConfig,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    pub fn new(store: Arc<dyn CoordinationStore>, config: ElectionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Claim the host key for this agent's identity.
    ///
    /// Fails with [`ElectionError::DuplicateIdentity`] if the key is already
    /// held. No watch is started in that case.
    pub async fn register_host(&self) -> Result<LeaseHandle, ElectionError> {
        let key = self.config.host_key();
        match self
            .store
            .create_key(&key, &self.config.identity, self.config.ttl)
            .await
        {
            Ok(index) => {
                info!("Registered host key {}", key);
                Ok(self.hold(key, index))
            }
            Err(StoreError::AlreadyExists { .. }) => {
                warn!("Host key {} is already held by another agent", key);
                Err(ElectionError::DuplicateIdentity(self.config.identity.clone()))
            }
            Err(e) => Err(ElectionError::Store(e)),
        }
    }

    /// Block until this agent holds the leader key.
    pub async fn acquire_leadership(&self) -> Result<LeaseHandle, ElectionError> {
        let key = self.config.leader_key();
        let index = self.block_for_key(&key).await?;
        info!("Acquired leadership as {}", self.config.identity);
        Ok(self.hold(key, index))
    }

    /// Create `key`, watching and retrying for as long as someone else holds it.
    async fn block_for_key(&self, key: &str) -> Result<i64, ElectionError> {
        loop {
            let observed = match self
                .store
                .create_key(key, &self.config.identity, self.config.ttl)
                .await
            {
                Ok(index) => return Ok(index),
                Err(StoreError::AlreadyExists { index, .. }) => index,
                Err(e) => return Err(ElectionError::Store(e)),
            };

            debug!("Key {} is held elsewhere, watching from index {}", key, observed);
            let mut watch = self
                .store
                .watch_key(key, observed)
                .await
                .map_err(ElectionError::Watch)?;

            loop {
                let notification = watch
                    .next()
                    .await
                    .ok_or_else(|| ElectionError::Watch(StoreError::WatchClosed(key.to_string())))?
                    .map_err(ElectionError::Watch)?;

                if notification.action.is_removal() {
                    info!("Key {} was released ({:?}), retrying", key, notification.action);
                    break;
                }
                debug!("Key {} changed ({:?}), still held", key, notification.action);
            }
        }
    }

    fn hold(&self, key: String, index: i64) -> LeaseHandle {
        debug!("Holding key {} created at index {}", key, index);
        let renewal = tokio::spawn(renew(
            self.store.clone(),
            key.clone(),
            self.config.identity.clone(),
            self.config.ttl,
            self.config.renew_interval(),
        ));
        LeaseHandle { key, renewal }
    }
}

/// Renew `key` until a renewal fails. Never returns while the key is held.
async fn renew(
    store: Arc<dyn CoordinationStore>,
    key: String,
    value: String,
    ttl: Duration,
    interval: Duration,
) -> ElectionError {
    loop {
        tokio::time::sleep(interval).await;
        match store.compare_and_swap(&key, &value, &value, ttl).await {
            Ok(index) => debug!("Renewed {} at index {}", key, index),
            Err(StoreError::KeyNotFound(_)) => {
                error!("Key {} expired before it could be renewed", key);
                return ElectionError::LeaseLost(key);
            }
            Err(StoreError::CompareFailed { current, .. }) => {
                error!("Key {} was taken over by {}", key, current);
                return ElectionError::LeaseLost(key);
            }
            Err(e) => {
                error!("Failed to renew {}: {}", key, e);
                return ElectionError::Store(e);
            }
        }
    }
}
