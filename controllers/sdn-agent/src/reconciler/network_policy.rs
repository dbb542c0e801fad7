//! Network policies are observed but not translated into VSD rules.

use crate::reconciler::Reconciler;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::ResourceExt;
use tracing::info;

impl Reconciler {
    pub fn network_policy_created(&self, policy: &NetworkPolicy) {
        info!("Network policy {}/{} created", namespace_of(policy), policy.name_any());
        self.metrics.event("networkpolicy", "add", "ignored");
    }

    pub fn network_policy_updated(&self, policy: &NetworkPolicy) {
        info!("Network policy {}/{} updated", namespace_of(policy), policy.name_any());
        self.metrics.event("networkpolicy", "update", "ignored");
    }

    pub fn network_policy_deleted(&self, policy: &NetworkPolicy) {
        info!("Network policy {}/{} deleted", namespace_of(policy), policy.name_any());
        self.metrics.event("networkpolicy", "delete", "ignored");
    }
}

fn namespace_of(policy: &NetworkPolicy) -> String {
    policy.namespace().unwrap_or_default()
}
