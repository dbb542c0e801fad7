//! Kubernetes resource watchers.
//!
//! A `kube_runtime` watcher only reports the current state of each object.
//! The reconcilers need add, update (with the previous object) and delete
//! callbacks, so every stream goes through an [`ObjectTracker`] that keeps
//! the last seen version of each object and turns watch events into
//! [`Change`]s. A re-list after a watch restart also yields deletes for the
//! objects that vanished in between.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::{WatchStreamExt, watcher};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to an object since it was last seen
#[derive(Debug, Clone, PartialEq)]
pub enum Change<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> Change<K> {
    pub fn verb(&self) -> &'static str {
        match self {
            Change::Added(_) => "add",
            Change::Updated { .. } => "update",
            Change::Deleted(_) => "delete",
        }
    }

    pub fn object(&self) -> &K {
        match self {
            Change::Added(obj) | Change::Deleted(obj) => obj,
            Change::Updated { new, .. } => new,
        }
    }
}

/// Last seen version of every object of one kind, keyed by `namespace/name`
#[derive(Debug)]
pub struct ObjectTracker<K> {
    known: HashMap<String, K>,
    /// Keys seen since the current re-list started
    relisted: Option<HashSet<String>>,
}

impl<K> Default for ObjectTracker<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K: Resource + Clone> ObjectTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Fold one watch event into the tracker
    pub fn handle(&mut self, event: watcher::Event<K>) -> Vec<Change<K>> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(key_of(&obj));
                }
                self.upsert(obj).into_iter().collect()
            }
            watcher::Event::Apply(obj) => self.upsert(obj).into_iter().collect(),
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let mut stale: Vec<String> = self.known.keys().filter(|k| !seen.contains(*k)).cloned().collect();
                stale.sort();
                stale
                    .into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(Change::Deleted)
                    .collect()
            }
            watcher::Event::Delete(obj) => {
                self.known.remove(&key_of(&obj));
                vec![Change::Deleted(obj)]
            }
        }
    }

    fn upsert(&mut self, obj: K) -> Option<Change<K>> {
        match self.known.insert(key_of(&obj), obj.clone()) {
            None => Some(Change::Added(obj)),
            Some(old) if old.meta().resource_version != obj.meta().resource_version => {
                Some(Change::Updated { old, new: obj })
            }
            Some(_) => None,
        }
    }
}

/// `namespace/name`, or just `name` for cluster-scoped objects
pub fn key_of<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    let name = meta.name.as_deref().unwrap_or("<unknown>");
    match meta.namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    pod_api: Api<Pod>,
    service_api: Api<Service>,
    namespace_api: Api<Namespace>,
    network_policy_api: Api<NetworkPolicy>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        pod_api: Api<Pod>,
        service_api: Api<Service>,
        namespace_api: Api<Namespace>,
        network_policy_api: Api<NetworkPolicy>,
    ) -> Self {
        Self {
            reconciler,
            pod_api,
            service_api,
            namespace_api,
            network_policy_api,
        }
    }

    /// Starts watching Namespace resources.
    pub async fn watch_namespaces(&self) -> Result<(), ControllerError> {
        info!("Starting Namespace watcher");
        let mut tracker = ObjectTracker::new();
        let mut stream = watcher(self.namespace_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("Namespace watch error, retrying: {}", e);
                    continue;
                }
            };
            log_phase("Namespace", &event);
            for change in tracker.handle(event) {
                let result = match &change {
                    Change::Added(ns) => self.reconciler.namespace_created(ns).await,
                    Change::Updated { new, .. } => self.reconciler.namespace_updated(new).await,
                    Change::Deleted(ns) => self.reconciler.namespace_deleted(ns).await,
                };
                if let Err(e) = result {
                    error!("Failed to reconcile Namespace {} ({}): {}", change.object().name_any(), change.verb(), e);
                }
            }
        }

        Err(ControllerError::Watch("Namespace watch stream ended".to_string()))
    }

    /// Starts watching Pod resources.
    pub async fn watch_pods(&self) -> Result<(), ControllerError> {
        info!("Starting Pod watcher");
        let mut tracker = ObjectTracker::new();
        let mut stream = watcher(self.pod_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("Pod watch error, retrying: {}", e);
                    continue;
                }
            };
            log_phase("Pod", &event);
            for change in tracker.handle(event) {
                let result = match &change {
                    Change::Added(pod) => self.reconciler.pod_created(pod).await.map(|outcome| {
                        debug!("Pod {} attached ({})", key_of(pod), outcome.as_str());
                    }),
                    Change::Updated { old, new } => self.reconciler.pod_updated(old, new).await,
                    Change::Deleted(pod) => self.reconciler.pod_deleted(pod).await,
                };
                if let Err(e) = result {
                    error!("Failed to reconcile Pod {} ({}): {}", key_of(change.object()), change.verb(), e);
                }
            }
        }

        Err(ControllerError::Watch("Pod watch stream ended".to_string()))
    }

    /// Starts watching Service resources.
    pub async fn watch_services(&self) -> Result<(), ControllerError> {
        info!("Starting Service watcher");
        let mut tracker = ObjectTracker::new();
        let mut stream = watcher(self.service_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("Service watch error, retrying: {}", e);
                    continue;
                }
            };
            log_phase("Service", &event);
            for change in tracker.handle(event) {
                let result = match &change {
                    Change::Added(svc) => self.reconciler.service_created(svc).await,
                    Change::Updated { new, .. } => self.reconciler.service_updated(new).await,
                    Change::Deleted(svc) => self.reconciler.service_deleted(svc).await,
                };
                if let Err(e) = result {
                    error!("Failed to reconcile Service {} ({}): {}", key_of(change.object()), change.verb(), e);
                }
            }
        }

        Err(ControllerError::Watch("Service watch stream ended".to_string()))
    }

    /// Starts watching NetworkPolicy resources.
    pub async fn watch_network_policies(&self) -> Result<(), ControllerError> {
        info!("Starting NetworkPolicy watcher");
        let mut tracker = ObjectTracker::new();
        let mut stream = watcher(self.network_policy_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("NetworkPolicy watch error, retrying: {}", e);
                    continue;
                }
            };
            log_phase("NetworkPolicy", &event);
            for change in tracker.handle(event) {
                match &change {
                    Change::Added(policy) => self.reconciler.network_policy_created(policy),
                    Change::Updated { new, .. } => self.reconciler.network_policy_updated(new),
                    Change::Deleted(policy) => self.reconciler.network_policy_deleted(policy),
                }
            }
        }

        Err(ControllerError::Watch("NetworkPolicy watch stream ended".to_string()))
    }
}

fn log_phase<K>(kind: &str, event: &watcher::Event<K>) {
    match event {
        watcher::Event::Init => debug!("{} watcher (re)listing", kind),
        watcher::Event::InitDone => info!("{} watcher initialization complete", kind),
        _ => {}
    }
}
