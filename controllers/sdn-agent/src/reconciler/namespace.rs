//! Namespace reconciliation: one VSD zone per namespace.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, info};

impl Reconciler {
    /// Find or create the namespace's zone and publish it as ready
    pub async fn namespace_created(&self, namespace: &Namespace) -> Result<(), ControllerError> {
        let name = namespace.name_any();
        info!("Namespace {} created", name);
        let result = self.cache.ensure_zone(&name).await;
        self.metrics
            .event("namespace", "add", if result.is_ok() { "ok" } else { "error" });
        let zone_id = result?;
        info!("Namespace {} is backed by zone {}", name, zone_id);
        Ok(())
    }

    pub async fn namespace_updated(&self, namespace: &Namespace) -> Result<(), ControllerError> {
        debug!("Namespace {} updated, nothing to do", namespace.name_any());
        Ok(())
    }

    /// Zones are left on the VSD when their namespace goes away
    pub async fn namespace_deleted(&self, namespace: &Namespace) -> Result<(), ControllerError> {
        info!("Namespace {} deleted, keeping its zone", namespace.name_any());
        self.metrics.event("namespace", "delete", "ok");
        Ok(())
    }
}
