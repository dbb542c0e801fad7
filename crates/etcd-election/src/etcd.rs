//! etcd-backed coordination store
//!
//! TTL keys are mapped onto etcd leases: each key created by this store is
//! attached to its own lease, and a compare-and-swap refreshes that lease
//! before rewriting the value. Create-only writes are transactions guarded on
//! `create_revision == 0`.

use crate::error::StoreError;
use crate::store_trait::{CoordinationStore, KeyWatch, WatchAction, WatchNotification};
use etcd_client::{
    Certificate, Client, Compare, CompareOp, ConnectOptions, EventType, Identity, PutOptions,
    TlsOptions, Txn, TxnOp, TxnOpResponse, WatchOptions,
};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// PEM material for a TLS connection to etcd
#[derive(Debug, Clone, Default)]
pub struct EtcdTls {
    pub ca_pem: Option<Vec<u8>>,
    pub cert_pem: Option<Vec<u8>>,
    pub key_pem: Option<Vec<u8>>,
}

impl EtcdTls {
    fn connect_options(&self) -> ConnectOptions {
        let mut tls = TlsOptions::new();
        if let Some(ca) = &self.ca_pem {
            tls = tls.ca_certificate(Certificate::from_pem(ca.clone()));
        }
        if let (Some(cert), Some(key)) = (&self.cert_pem, &self.key_pem) {
            tls = tls.identity(Identity::from_pem(cert.clone(), key.clone()));
        }
        ConnectOptions::new().with_tls(tls)
    }
}

/// Coordination store on top of an etcd v3 cluster
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    // key -> lease attached to it by this store
    leases: Arc<Mutex<HashMap<String, i64>>>,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held = self.leases.lock().map(|l| l.len()).unwrap_or_default();
        f.debug_struct("EtcdStore")
            .field("leased_keys", &held)
            .finish_non_exhaustive()
    }
}

impl EtcdStore {
    /// Connect to the given etcd endpoints
    pub async fn connect(endpoints: &[String], tls: Option<EtcdTls>) -> Result<Self, StoreError> {
        let options = tls.map(|t| t.connect_options());
        let client = Client::connect(endpoints.to_vec(), options).await?;
        debug!("Connected to etcd at {}", endpoints.join(", "));
        Ok(Self::from_client(client))
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn remember_lease(&self, key: &str, lease: i64) {
        if let Ok(mut leases) = self.leases.lock() {
            leases.insert(key.to_string(), lease);
        }
    }

    fn lease_for(&self, key: &str) -> Option<i64> {
        self.leases.lock().ok().and_then(|l| l.get(key).copied())
    }

    fn forget_lease(&self, key: &str) {
        if let Ok(mut leases) = self.leases.lock() {
            leases.remove(key);
        }
    }

    /// Refresh a lease once. Returns false if the lease has expired.
    async fn refresh_lease(&self, lease: i64) -> Result<bool, StoreError> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(lease).await?;
        keeper.keep_alive().await?;
        match stream.message().await? {
            Some(resp) => Ok(resp.ttl() > 0),
            None => Ok(false),
        }
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

#[async_trait::async_trait]
impl CoordinationStore for EtcdStore {
    async fn create_key(&self, key: &str, value: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut client = self.client.clone();
        let lease = client.lease_grant(ttl_secs(ttl), None).await?.id();

        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                value,
                Some(PutOptions::new().with_lease(lease)),
            )]);
        let resp = client.txn(txn).await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();

        if resp.succeeded() {
            self.remember_lease(key, lease);
            debug!("Created key {} with lease {} at revision {}", key, lease, revision);
            return Ok(revision);
        }

        if let Err(e) = client.lease_revoke(lease).await {
            warn!("Failed to revoke unused lease {}: {}", lease, e);
        }
        Err(StoreError::AlreadyExists {
            key: key.to_string(),
            index: revision,
        })
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        prev: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        let mut client = self.client.clone();

        // The lease keeps its original TTL; a fresh one is granted only when
        // this store did not create the key.
        let lease = match self.lease_for(key) {
            Some(lease) => {
                if !self.refresh_lease(lease).await? {
                    self.forget_lease(key);
                    return Err(StoreError::KeyNotFound(key.to_string()));
                }
                lease
            }
            None => {
                let lease = client.lease_grant(ttl_secs(ttl), None).await?.id();
                self.remember_lease(key, lease);
                lease
            }
        };

        let txn = Txn::new()
            .when(vec![Compare::value(key, CompareOp::Equal, prev)])
            .and_then(vec![TxnOp::put(
                key,
                value,
                Some(PutOptions::new().with_lease(lease)),
            )])
            .or_else(vec![TxnOp::get(key, None)]);
        let resp = client.txn(txn).await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();

        if resp.succeeded() {
            return Ok(revision);
        }

        let current = resp.op_responses().into_iter().find_map(|op| match op {
            TxnOpResponse::Get(get) => get.kvs().first().map(|kv| kv.value_str().map(str::to_string)),
            _ => None,
        });
        match current {
            Some(Ok(current)) => Err(StoreError::CompareFailed {
                key: key.to_string(),
                current,
            }),
            Some(Err(e)) => Err(StoreError::Etcd(e)),
            None => {
                self.forget_lease(key);
                Err(StoreError::KeyNotFound(key.to_string()))
            }
        }
    }

    async fn watch_key(&self, key: &str, after_index: i64) -> Result<KeyWatch, StoreError> {
        let mut client = self.client.clone();
        let options = WatchOptions::new().with_start_revision(after_index + 1);
        let (watcher, stream) = client.watch(key, Some(options)).await?;
        debug!("Watching key {} from revision {}", key, after_index + 1);

        let watched = key.to_string();
        let state = (watcher, stream, VecDeque::<WatchNotification>::new());
        let events = futures::stream::unfold(state, move |(watcher, mut stream, mut pending)| {
            let watched = watched.clone();
            async move {
                loop {
                    if let Some(n) = pending.pop_front() {
                        return Some((Ok(n), (watcher, stream, pending)));
                    }
                    match stream.message().await {
                        Ok(Some(resp)) => {
                            let revision = resp.header().map(|h| h.revision()).unwrap_or_default();
                            for event in resp.events() {
                                let Some(kv) = event.kv() else { continue };
                                // etcd reports lease expiry as a plain delete
                                let action = match event.event_type() {
                                    EventType::Delete => WatchAction::Delete,
                                    EventType::Put if kv.create_revision() == kv.mod_revision() => {
                                        WatchAction::Create
                                    }
                                    EventType::Put => WatchAction::CompareAndSwap,
                                };
                                pending.push_back(WatchNotification {
                                    action,
                                    key: watched.clone(),
                                    value: kv.value_str().ok().map(str::to_string),
                                    index: if kv.mod_revision() > 0 { kv.mod_revision() } else { revision },
                                });
                            }
                        }
                        Ok(None) => {
                            return Some((
                                Err(StoreError::WatchClosed(watched.clone())),
                                (watcher, stream, pending),
                            ));
                        }
                        Err(e) => return Some((Err(StoreError::Etcd(e)), (watcher, stream, pending))),
                    }
                }
            }
        });
        Ok(events.boxed())
    }
}
