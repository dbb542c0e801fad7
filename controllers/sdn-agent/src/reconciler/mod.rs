//! Reconciliation of Kubernetes resources into VSD objects.
//!
//! This module is organized by Kubernetes resource:
//! - `pod`: container attachments, addresses and node delivery
//! - `namespace`: namespace zones
//! - `service`: network macros and macro groups
//! - `network_policy`: observed only

pub mod namespace;
pub mod network_policy;
pub mod pod;
#[cfg(test)]
mod pod_test;
pub mod service;
#[cfg(test)]
mod service_test;

use crate::metrics::Metrics;
use crate::sdn::SdnCache;
use node_agent_client::{NodeAgentTrait, NodeAttachment};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub use pod::PodOutcome;

/// Reconciles Kubernetes events against the VSD and the node agents.
pub struct Reconciler {
    pub(crate) cache: SdnCache,
    pub(crate) node_agent: Box<dyn NodeAgentTrait + Send + Sync>,
    /// Attachments of pods not scheduled yet, by container name
    pub(crate) pending: Mutex<HashMap<String, NodeAttachment>>,
    pub(crate) metrics: Arc<Metrics>,
    /// Bound on the namespace readiness wait of pod and service events
    pub(crate) namespace_wait: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cache", &self.cache)
            .field("namespace_wait", &self.namespace_wait)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(
        cache: SdnCache,
        node_agent: Box<dyn NodeAgentTrait + Send + Sync>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            node_agent,
            pending: Mutex::new(HashMap::new()),
            metrics,
            namespace_wait: crate::sdn::cache::NAMESPACE_WAIT,
        }
    }

    /// Override the namespace readiness bound
    pub fn with_namespace_wait(mut self, wait: Duration) -> Self {
        self.namespace_wait = wait;
        self
    }

    /// Container names of pods waiting for a node
    pub async fn pending_pods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}
