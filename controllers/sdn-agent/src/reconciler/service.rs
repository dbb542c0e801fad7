//! Service reconciliation.
//!
//! Every service with a cluster IP becomes a /32 network macro, grouped per
//! namespace in a network macro group. The first time a group is created,
//! an ingress rule lets the namespace's zone reach it.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, error, info};

impl Reconciler {
    pub async fn service_created(&self, service: &Service) -> Result<(), ControllerError> {
        let result = self.expose_service(service).await;
        let outcome = match &result {
            Ok(true) => "ok",
            Ok(false) => "skipped",
            Err(_) => "error",
        };
        self.metrics.event("service", "add", outcome);
        result.map(|_| ())
    }

    pub async fn service_updated(&self, service: &Service) -> Result<(), ControllerError> {
        debug!(
            "Service {}/{} updated, nothing to do",
            service.namespace().unwrap_or_default(),
            service.name_any()
        );
        Ok(())
    }

    /// Macros and groups outlive their services
    pub async fn service_deleted(&self, service: &Service) -> Result<(), ControllerError> {
        info!(
            "Service {}/{} deleted, keeping its network macro",
            service.namespace().unwrap_or_default(),
            service.name_any()
        );
        self.metrics.event("service", "delete", "ok");
        Ok(())
    }

    /// Returns false for services without a cluster IP
    async fn expose_service(&self, service: &Service) -> Result<bool, ControllerError> {
        let name = service.name_any();
        let namespace = service.namespace().unwrap_or_else(|| "default".to_string());
        let Some(cluster_ip) = cluster_ip(service) else {
            info!("Service {}/{} is headless, skipping", namespace, name);
            return Ok(false);
        };
        info!("Service {}/{} created with cluster IP {}", namespace, name, cluster_ip);

        self.cache.wait_for_namespace(&namespace, self.namespace_wait).await?;

        let (group, created) = self.cache.ensure_macro_group(&namespace).await?;
        if created {
            let zone_id = {
                let state = self.cache.lock().await;
                state.zones.get(&namespace).map(|zone| zone.id().to_string())
            };
            match zone_id {
                Some(zone_id) => {
                    if let Err(e) = self.cache.allow_zone_to_group(&zone_id, &group).await {
                        error!("Cannot open namespace {} to its services: {}", namespace, e);
                    }
                }
                None => error!("Namespace {} lost its zone before its services were opened", namespace),
            }
        }

        let network = self.cache.ensure_macro(&name, cluster_ip).await?;
        match (network.id.as_deref(), group.id.as_deref()) {
            (Some(network_id), Some(group_id)) => {
                if let Err(e) = self
                    .cache
                    .vsd()
                    .assign_macro_groups(network_id, &[group_id.to_string()])
                    .await
                {
                    error!("Cannot add network macro {} to {}: {}", network.name, group.name, e);
                }
            }
            _ => error!("Network macro {} or group {} has no ID", network.name, group.name),
        }
        info!("Service {}/{} exposed as network macro {}", namespace, name, network.name);
        Ok(true)
    }
}

/// Cluster IP of a service, `None` for headless ones
fn cluster_ip(service: &Service) -> Option<&str> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None")
}
