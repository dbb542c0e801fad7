//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating Kubernetes objects and a
//! reconciler wired to the VSD and node agent mocks.

#[cfg(test)]
use crate::bootstrap::bootstrap;
#[cfg(test)]
use crate::ipam::CidrPool;
#[cfg(test)]
use crate::metrics::Metrics;
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crate::sdn::SdnCache;
#[cfg(test)]
use k8s_openapi::api::core::v1::{Namespace, Pod, PodSpec, Service, ServiceSpec};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use node_agent_client::MockNodeAgent;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use vsd_client::MockVsdClient;

#[cfg(test)]
pub const TEST_ENTERPRISE: &str = "acme";
#[cfg(test)]
pub const TEST_DOMAIN: &str = "k8s";

/// Helper to create a test Pod
///
/// `annotations` are `(key, value)` pairs; an empty `node` leaves the pod
/// unscheduled.
#[cfg(test)]
pub fn create_test_pod(name: &str, namespace: &str, uid: &str, node: &str, annotations: &[(&str, &str)]) -> Pod {
    let annotations: BTreeMap<String, String> = annotations
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            resource_version: Some("1".to_string()),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: (!node.is_empty()).then(|| node.to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a test Service; `None` makes it headless
#[cfg(test)]
pub fn create_test_service(name: &str, namespace: &str, cluster_ip: Option<&str>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some(cluster_ip.unwrap_or("None").to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a test Namespace
#[cfg(test)]
pub fn create_test_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to create a reconciler on top of the given mocks
///
/// The VSD mock is bootstrapped first, so the enterprise, domain and both
/// domain policies exist.
#[cfg(test)]
pub async fn create_test_reconciler(vsd: &MockVsdClient, agent: &MockNodeAgent, cluster: &str, bits: u8) -> Reconciler {
    let scope = bootstrap(vsd, TEST_ENTERPRISE, TEST_DOMAIN).await.unwrap();
    let pool = CidrPool::build(cluster.parse().unwrap(), bits, crate::ipam::MAX_POOL_ENTRIES).unwrap();
    let cache = SdnCache::new(Box::new(vsd.clone()), scope, pool);
    let metrics = Arc::new(Metrics::new().unwrap());
    Reconciler::new(cache, Box::new(agent.clone()), metrics)
}

/// Zone ID the mock VSD holds for `namespace`
#[cfg(test)]
pub fn zone_id_of(vsd: &MockVsdClient, namespace: &str) -> String {
    vsd.zone_named(&crate::sdn::naming::zone_name(namespace))
        .and_then(|z| z.id)
        .unwrap()
}
