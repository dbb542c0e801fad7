//! Main controller implementation.
//!
//! This module contains the `Controller` struct that runs one watcher task
//! per resource kind against a shared reconciler.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use futures::future::OptionFuture;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// API group version network policies are served under
const NETWORK_POLICY_GROUP: &str = "networking.k8s.io/v1";

/// Main controller of the SDN agent.
pub struct Controller {
    namespace_watcher: JoinHandle<Result<(), ControllerError>>,
    pod_watcher: JoinHandle<Result<(), ControllerError>>,
    service_watcher: JoinHandle<Result<(), ControllerError>>,
    network_policy_watcher: Option<JoinHandle<Result<(), ControllerError>>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("network_policies", &self.network_policy_watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(kube_client: Client, reconciler: Arc<Reconciler>) -> Result<Self, ControllerError> {
        info!("Initializing SDN agent controller");

        let watcher = Arc::new(Watcher::new(
            reconciler,
            Api::all(kube_client.clone()),
            Api::all(kube_client.clone()),
            Api::all(kube_client.clone()),
            Api::all(kube_client.clone()),
        ));

        let namespace_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_namespaces().await })
        };
        let pod_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_pods().await })
        };
        let service_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_services().await })
        };

        let network_policy_watcher = if network_policies_served(&kube_client).await {
            Some(tokio::spawn(async move { watcher.watch_network_policies().await }))
        } else {
            info!("API server does not serve network policies, not watching them");
            None
        };

        Ok(Self {
            namespace_watcher,
            pod_watcher,
            service_watcher,
            network_policy_watcher,
        })
    }

    /// Runs the controller until a watcher stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("SDN agent controller running");

        let network_policy_watcher: OptionFuture<_> = self.network_policy_watcher.as_mut().into();
        tokio::pin!(network_policy_watcher);

        // Watchers run forever; any of them returning is fatal
        tokio::select! {
            result = &mut self.namespace_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Namespace watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Namespace watcher error: {}", e)))?;
            }
            result = &mut self.pod_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Pod watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Pod watcher error: {}", e)))?;
            }
            result = &mut self.service_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Service watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Service watcher error: {}", e)))?;
            }
            Some(result) = &mut network_policy_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("NetworkPolicy watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("NetworkPolicy watcher error: {}", e)))?;
            }
        }

        Ok(())
    }
}

/// Whether the API server advertises `networkpolicies` in `networking.k8s.io/v1`
async fn network_policies_served(client: &Client) -> bool {
    match client.list_api_group_resources(NETWORK_POLICY_GROUP).await {
        Ok(list) => list.resources.iter().any(|r| r.name == "networkpolicies"),
        Err(e) => {
            warn!("Cannot discover {}: {}", NETWORK_POLICY_GROUP, e);
            false
        }
    }
}
