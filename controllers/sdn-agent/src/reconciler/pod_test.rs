//! Unit tests for the pod reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::PodOutcome;
    use crate::reconciler::pod::Placement;
    use crate::test_utils::*;
    use node_agent_client::MockNodeAgent;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;
    use vsd_client::{MockFailure, MockVsdClient};

    const UID: &str = "0a1b2c3d-0000-4000-8000-000000000001";

    fn setup() -> (MockVsdClient, MockNodeAgent) {
        (MockVsdClient::new("https://vsd:8443"), MockNodeAgent::new())
    }

    fn container_ip(vsd: &MockVsdClient, name: &str) -> String {
        vsd.container_named(name)
            .and_then(|c| c.primary_interface().map(|i| i.ip_address.clone()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_pod_adopts_first_prefix() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let pod = create_test_pod("a", "web", UID, "node-1", &[]);
        let outcome = reconciler.pod_created(&pod).await.unwrap();
        assert_eq!(outcome, PodOutcome::Default);

        let subnets = vsd.subnets_of(&zone_id_of(&vsd, "web"));
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0].name, "web-0");
        assert_eq!(subnets[0].address, "10.0.0.0");
        assert_eq!(subnets[0].netmask, "255.255.255.0");

        // .1 is the subnet gateway
        assert_eq!(container_ip(&vsd, "a_web"), "10.0.0.2");
        let container = vsd.container_named("a_web").unwrap();
        assert_eq!(container.uuid, "0a1b2c3d000040008000000000000001".repeat(2));
        assert_eq!(container.orchestration_id, "Kubernetes");

        let attachment = agent.attachment("node-1", "a_web").unwrap();
        assert_eq!(attachment.ip_address, "10.0.0.2");
        assert_eq!(attachment.subnet, "web-0");
        assert_eq!(attachment.zone, "K8S namespace web");
        assert_eq!(attachment.enterprise, TEST_ENTERPRISE);
        assert_eq!(attachment.domain, TEST_DOMAIN);
        assert_eq!(attachment.gateway.as_deref(), Some("10.0.0.1"));

        let state = reconciler.cache.lock().await;
        assert!(!state.pool.contains(&"10.0.0.0/24".parse().unwrap()));
        assert_eq!(state.pool.len(), 255);
        drop(state);
        assert_eq!(reconciler.metrics.subnets_adopted.get(), 1);
    }

    #[tokio::test]
    async fn test_last_free_address_used_before_new_subnet() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/24", 5).await;
        let domain_id = reconciler.cache.scope().domain_id.clone();
        let zone = vsd.add_zone(&domain_id, "K8S namespace web");
        let subnet = vsd.add_subnet(zone.id.as_deref().unwrap(), "web-0", "10.0.0.0", "255.255.255.248");
        for host in 1..=5 {
            vsd.add_container(&format!("old-{}_web", host), "uuid", &subnet, &format!("10.0.0.{}", host));
        }
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        reconciler
            .pod_created(&create_test_pod("a", "web", UID, "node-1", &[]))
            .await
            .unwrap();
        assert_eq!(container_ip(&vsd, "a_web"), "10.0.0.6");
        assert_eq!(vsd.calls("create_subnet"), 0);

        reconciler
            .pod_created(&create_test_pod("b", "web", "uid-b", "node-1", &[]))
            .await
            .unwrap();
        assert_eq!(vsd.calls("create_subnet"), 1);
        assert_eq!(container_ip(&vsd, "b_web"), "10.0.0.10");
        assert_eq!(agent.attachment("node-1", "b_web").unwrap().subnet, "web-1");
    }

    #[tokio::test]
    async fn test_custom_subnet_with_address() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        let domain_id = reconciler.cache.scope().domain_id.clone();
        let zone = vsd.add_zone(&domain_id, "K8S namespace db");
        vsd.add_subnet(zone.id.as_deref().unwrap(), "storage", "192.168.10.0", "255.255.255.0");
        reconciler.namespace_created(&create_test_namespace("db")).await.unwrap();

        let pinned = create_test_pod(
            "a",
            "db",
            UID,
            "node-1",
            &[("nuage.io/Subnet", "storage"), ("nuage.io/IPAddress", "192.168.10.50")],
        );
        assert_eq!(reconciler.pod_created(&pinned).await.unwrap(), PodOutcome::Custom);
        assert_eq!(container_ip(&vsd, "a_db"), "192.168.10.50");

        let any = create_test_pod("b", "db", "uid-b", "node-1", &[("nuage.io/Subnet", "storage")]);
        assert_eq!(reconciler.pod_created(&any).await.unwrap(), PodOutcome::Custom);
        assert_eq!(container_ip(&vsd, "b_db"), "192.168.10.1");

        // Custom subnets are not part of the pool and never used by default
        assert_eq!(vsd.calls("create_subnet"), 0);
        let plain = create_test_pod("c", "db", "uid-c", "node-1", &[]);
        assert_eq!(reconciler.pod_created(&plain).await.unwrap(), PodOutcome::Default);
        assert_eq!(container_ip(&vsd, "c_db"), "10.0.0.2");
    }

    #[tokio::test]
    async fn test_unknown_custom_subnet_consumes_nothing() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("db")).await.unwrap();

        let pod = create_test_pod("a", "db", UID, "node-1", &[("nuage.io/Subnet", "missing")]);
        let err = reconciler.pod_created(&pod).await.unwrap_err();
        assert!(matches!(err, ControllerError::Placement(_)));

        assert_eq!(vsd.calls("create_container"), 0);
        assert_eq!(vsd.calls("create_subnet"), 0);
        assert!(agent.puts().is_empty());
        assert_eq!(reconciler.cache.lock().await.pool.len(), 256);
    }

    #[tokio::test]
    async fn test_invalid_address_directive() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        let domain_id = reconciler.cache.scope().domain_id.clone();
        let zone = vsd.add_zone(&domain_id, "K8S namespace db");
        vsd.add_subnet(zone.id.as_deref().unwrap(), "storage", "192.168.10.0", "255.255.255.0");
        reconciler.namespace_created(&create_test_namespace("db")).await.unwrap();

        let garbage = create_test_pod(
            "a",
            "db",
            UID,
            "node-1",
            &[("nuage.io/Subnet", "storage"), ("nuage.io/IPAddress", "not-an-ip")],
        );
        assert!(matches!(
            reconciler.pod_created(&garbage).await.unwrap_err(),
            ControllerError::Placement(_)
        ));

        let outside = create_test_pod(
            "b",
            "db",
            "uid-b",
            "node-1",
            &[("nuage.io/Subnet", "storage"), ("nuage.io/IPAddress", "10.9.9.9")],
        );
        assert!(matches!(
            reconciler.pod_created(&outside).await.unwrap_err(),
            ControllerError::Allocation(_)
        ));
        assert_eq!(vsd.calls("create_container"), 0);
    }

    #[tokio::test]
    async fn test_taken_address_directive_is_refused() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        let domain_id = reconciler.cache.scope().domain_id.clone();
        let zone = vsd.add_zone(&domain_id, "K8S namespace db");
        vsd.add_subnet(zone.id.as_deref().unwrap(), "storage", "192.168.10.0", "255.255.255.0");
        reconciler.namespace_created(&create_test_namespace("db")).await.unwrap();

        let directives = [("nuage.io/Subnet", "storage"), ("nuage.io/IPAddress", "192.168.10.7")];
        reconciler
            .pod_created(&create_test_pod("a", "db", UID, "node-1", &directives))
            .await
            .unwrap();
        let err = reconciler
            .pod_created(&create_test_pod("b", "db", "uid-b", "node-1", &directives))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Allocation(_)));
        assert_eq!(vsd.container_count(), 1);
    }

    #[test]
    fn test_annotations_win_over_labels() {
        let mut pod = create_test_pod("a", "db", UID, "", &[("nuage.io/Subnet", "from-annotation")]);
        pod.metadata.labels = Some(BTreeMap::from([
            ("nuage.io/Subnet".to_string(), "from-label".to_string()),
            ("nuage.io/PolicyGroup".to_string(), "frontend".to_string()),
            ("app".to_string(), "db".to_string()),
        ]));

        let placement = Placement::from_pod(&pod).unwrap();
        assert_eq!(placement.subnet.as_deref(), Some("from-annotation"));
        assert_eq!(placement.policy_group.as_deref(), Some("frontend"));
        assert_eq!(placement.address, None);
        assert!(placement.requests_placement());
    }

    #[tokio::test]
    async fn test_policy_group_only_uses_default_placement() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let pod = create_test_pod("a", "web", UID, "node-1", &[("nuage.io/PolicyGroup", "frontend")]);
        assert_eq!(reconciler.pod_created(&pod).await.unwrap(), PodOutcome::Default);
    }

    #[tokio::test]
    async fn test_existing_container_is_reused() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        let domain_id = reconciler.cache.scope().domain_id.clone();
        let zone = vsd.add_zone(&domain_id, "K8S namespace web");
        let subnet = vsd.add_subnet(zone.id.as_deref().unwrap(), "web-0", "10.0.0.0", "255.255.255.0");
        vsd.add_container("a_web", "existing-uuid", &subnet, "10.0.0.7");
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let pod = create_test_pod("a", "web", UID, "node-1", &[]);
        assert_eq!(reconciler.pod_created(&pod).await.unwrap(), PodOutcome::AlreadyAttached);
        assert_eq!(vsd.calls("create_container"), 0);

        let attachment = agent.attachment("node-1", "a_web").unwrap();
        assert_eq!(attachment.uuid, "existing-uuid");
        assert_eq!(attachment.ip_address, "10.0.0.7");
        assert_eq!(attachment.subnet, "web-0");

        let state = reconciler.cache.lock().await;
        let zone = state.zones.get("web").unwrap();
        assert!(zone.subnet(0).unwrap().is_allocated(Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(zone.attachment("a_web").unwrap().address, Ipv4Addr::new(10, 0, 0, 7));
    }

    #[tokio::test]
    async fn test_subnet_conflict_skips_prefix() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        // Someone else already uses the first prefix
        vsd.add_subnet("foreign-zone", "foreign", "10.0.0.0", "255.255.255.0");
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        reconciler
            .pod_created(&create_test_pod("a", "web", UID, "node-1", &[]))
            .await
            .unwrap();

        assert_eq!(vsd.calls("create_subnet"), 2);
        assert_eq!(container_ip(&vsd, "a_web"), "10.0.1.2");
        let state = reconciler.cache.lock().await;
        assert!(!state.pool.contains(&"10.0.0.0/24".parse().unwrap()));
        assert!(state.pool.is_set_aside(&"10.0.0.0/24".parse().unwrap()));
        assert!(!state.pool.contains(&"10.0.1.0/24".parse().unwrap()));
        assert_eq!(state.pool.len(), 254);
    }

    #[tokio::test]
    async fn test_refused_prefix_stays_default_for_owning_zone() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        // Namespace db already owns the first prefix but is not loaded yet
        let domain_id = reconciler.cache.scope().domain_id.clone();
        let db = vsd.add_zone(&domain_id, "K8S namespace db");
        vsd.add_subnet(db.id.as_deref().unwrap(), "db-0", "10.0.0.0", "255.255.255.0");

        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();
        reconciler
            .pod_created(&create_test_pod("a", "web", UID, "node-1", &[]))
            .await
            .unwrap();
        assert_eq!(container_ip(&vsd, "a_web"), "10.0.1.2");

        reconciler.namespace_created(&create_test_namespace("db")).await.unwrap();
        {
            let state = reconciler.cache.lock().await;
            assert!(!state.pool.is_set_aside(&"10.0.0.0/24".parse().unwrap()));
            let zone = state.zones.get("db").unwrap();
            assert!(!zone.subnet(0).unwrap().is_custom());
            assert_eq!(zone.subnet(0).unwrap().free(), 254);
        }

        let outcome = reconciler
            .pod_created(&create_test_pod("b", "db", "0a1b2c3d-0000-4000-8000-000000000002", "node-1", &[]))
            .await
            .unwrap();
        assert_eq!(outcome, PodOutcome::Default);
        assert_eq!(container_ip(&vsd, "b_db"), "10.0.0.1");

        let names: Vec<String> = vsd.subnets_of(&zone_id_of(&vsd, "db")).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["db-0"]);
        let state = reconciler.cache.lock().await;
        assert_eq!(state.zones.get("db").unwrap().subnet(0).unwrap().free(), 253);
        assert_eq!(state.pool.len(), 254);
    }

    #[tokio::test]
    async fn test_subnet_create_failure_keeps_prefix() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();
        vsd.fail_next("create_subnet", MockFailure::Api, 1);

        let pod = create_test_pod("a", "web", UID, "node-1", &[]);
        assert!(matches!(
            reconciler.pod_created(&pod).await.unwrap_err(),
            ControllerError::Vsd(_)
        ));
        assert!(
            reconciler
                .cache
                .lock()
                .await
                .pool
                .contains(&"10.0.0.0/24".parse().unwrap())
        );

        reconciler.pod_created(&pod).await.unwrap();
        assert_eq!(container_ip(&vsd, "a_web"), "10.0.0.2");
    }

    #[tokio::test]
    async fn test_container_failure_rolls_back_address() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();
        vsd.fail_next("create_container", MockFailure::Api, 1);

        let pod = create_test_pod("a", "web", UID, "node-1", &[]);
        assert!(reconciler.pod_created(&pod).await.is_err());
        assert!(agent.puts().is_empty());

        reconciler.pod_created(&pod).await.unwrap();
        assert_eq!(container_ip(&vsd, "a_web"), "10.0.0.2");
        assert_eq!(vsd.calls("create_subnet"), 1);
    }

    #[tokio::test]
    async fn test_pool_exhausted() {
        let (vsd, agent) = setup();
        // One /30: the gateway and a single pod address
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/30", 0).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        reconciler
            .pod_created(&create_test_pod("a", "web", UID, "node-1", &[]))
            .await
            .unwrap();
        let err = reconciler
            .pod_created(&create_test_pod("b", "web", "uid-b", "node-1", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::PoolExhausted(_)));
    }

    #[tokio::test]
    async fn test_unscheduled_pod_is_held_until_scheduled() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let unscheduled = create_test_pod("a", "web", UID, "", &[]);
        reconciler.pod_created(&unscheduled).await.unwrap();
        assert!(agent.puts().is_empty());
        assert_eq!(reconciler.pending_pods().await, vec!["a_web".to_string()]);

        let scheduled = create_test_pod("a", "web", UID, "node-2", &[]);
        reconciler.pod_updated(&unscheduled, &scheduled).await.unwrap();
        assert_eq!(agent.puts(), vec![("node-2".to_string(), "a_web".to_string())]);
        assert!(reconciler.pending_pods().await.is_empty());

        // Later updates do not push again
        reconciler.pod_updated(&scheduled, &scheduled).await.unwrap();
        assert_eq!(agent.puts().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_push_keeps_pod_pending() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let unscheduled = create_test_pod("a", "web", UID, "", &[]);
        reconciler.pod_created(&unscheduled).await.unwrap();
        agent.set_unreachable("node-2", true);

        let scheduled = create_test_pod("a", "web", UID, "node-2", &[]);
        assert!(matches!(
            reconciler.pod_updated(&unscheduled, &scheduled).await.unwrap_err(),
            ControllerError::NodeAgent(_)
        ));
        assert_eq!(reconciler.pending_pods().await, vec!["a_web".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_releases_address_for_reuse() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let first = create_test_pod("a", "web", UID, "", &[]);
        reconciler.pod_created(&first).await.unwrap();
        assert_eq!(container_ip(&vsd, "a_web"), "10.0.0.2");

        reconciler.pod_deleted(&first).await.unwrap();
        assert!(vsd.container_named("a_web").is_none());
        assert!(reconciler.pending_pods().await.is_empty());
        assert_eq!(reconciler.metrics.addresses_released.get(), 1);

        reconciler
            .pod_created(&create_test_pod("b", "web", "uid-b", "node-1", &[]))
            .await
            .unwrap();
        assert_eq!(container_ip(&vsd, "b_web"), "10.0.0.2");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let pod = create_test_pod("a", "web", UID, "", &[]);
        reconciler.pod_created(&pod).await.unwrap();
        reconciler.pod_deleted(&pod).await.unwrap();
        reconciler.pod_deleted(&pod).await.unwrap();
        assert_eq!(reconciler.metrics.addresses_released.get(), 1);

        // The replayed delete did not free an address handed out since
        reconciler
            .pod_created(&create_test_pod("b", "web", "uid-b", "", &[]))
            .await
            .unwrap();
        reconciler.pod_deleted(&pod).await.unwrap();
        let state = reconciler.cache.lock().await;
        let zone = state.zones.get("web").unwrap();
        assert!(zone.subnet(0).unwrap().is_allocated(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[tokio::test]
    async fn test_delete_on_scheduled_pod_clears_node_agent() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let pod = create_test_pod("a", "web", UID, "node-1", &[]);
        reconciler.pod_created(&pod).await.unwrap();
        reconciler.pod_deleted(&pod).await.unwrap();

        assert_eq!(agent.deletes(), vec![("node-1".to_string(), "a_web".to_string())]);
        assert!(agent.attachment("node-1", "a_web").is_none());
        assert_eq!(reconciler.metrics.addresses_released.get(), 1);
        // The node agent owns the container once it has it
        assert_eq!(vsd.calls("delete_container"), 0);
    }

    #[tokio::test]
    async fn test_delete_with_unreachable_node_cleans_up_vsd() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let pod = create_test_pod("a", "web", UID, "node-1", &[]);
        reconciler.pod_created(&pod).await.unwrap();
        agent.set_unreachable("node-1", true);

        reconciler.pod_deleted(&pod).await.unwrap();
        assert!(vsd.container_named("a_web").is_none());
        assert_eq!(reconciler.metrics.addresses_released.get(), 1);
    }

    #[tokio::test]
    async fn test_delete_after_restart_uses_vsd_address() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        let domain_id = reconciler.cache.scope().domain_id.clone();
        let zone = vsd.add_zone(&domain_id, "K8S namespace web");
        let subnet = vsd.add_subnet(zone.id.as_deref().unwrap(), "web-0", "10.0.0.0", "255.255.255.0");
        vsd.add_container("a_web", "uuid", &subnet, "10.0.0.9");
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        reconciler
            .pod_deleted(&create_test_pod("a", "web", UID, "", &[]))
            .await
            .unwrap();
        let state = reconciler.cache.lock().await;
        let zone = state.zones.get("web").unwrap();
        assert!(!zone.subnet(0).unwrap().is_allocated(Ipv4Addr::new(10, 0, 0, 9)));
    }

    #[tokio::test]
    async fn test_pod_waits_for_its_namespace() {
        let (vsd, agent) = setup();
        let reconciler = Arc::new(create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await);

        let handle = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                let pod = create_test_pod("a", "web", UID, "node-1", &[]);
                reconciler.pod_created(&pod).await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("pod handler did not resume after the namespace appeared")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PodOutcome::Default);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_gives_up_on_missing_namespace() {
        let (vsd, agent) = setup();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;

        let started = tokio::time::Instant::now();
        let err = reconciler
            .pod_created(&create_test_pod("a", "ghost", UID, "node-1", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NamespaceNotReady(_)));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(vsd.calls("create_container"), 0);
    }
}
