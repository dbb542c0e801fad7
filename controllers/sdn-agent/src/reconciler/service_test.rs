//! Unit tests for the service reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use node_agent_client::MockNodeAgent;
    use std::time::Duration;
    use vsd_client::{MockFailure, MockVsdClient};

    #[tokio::test]
    async fn test_service_becomes_grouped_macro() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        let agent = MockNodeAgent::new();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();

        reconciler
            .service_created(&create_test_service("frontend", "web", Some("172.30.0.10")))
            .await
            .unwrap();
        reconciler
            .service_created(&create_test_service("backend", "web", Some("172.30.0.11")))
            .await
            .unwrap();

        assert_eq!(vsd.calls("create_network_macro_group"), 1);
        assert_eq!(vsd.calls("create_network_macro"), 2);
        assert_eq!(vsd.calls("assign_macro_groups"), 2);

        let scope = reconciler.cache.scope().clone();
        let (group, _) = reconciler.cache.ensure_macro_group("web").await.unwrap();
        let network = reconciler.cache.ensure_macro("frontend", "172.30.0.10").await.unwrap();
        assert_eq!(vsd.groups_of(network.id.as_deref().unwrap()), vec![group.id.clone().unwrap()]);

        // One zone-to-services rule per namespace, next to the intra-namespace rule
        let rules = vsd.acl_entries_of(scope.ingress_template_id.as_deref().unwrap());
        assert_eq!(rules.len(), 2);
        let rule = rules.iter().find(|r| r.network_type == "NETWORK_MACRO_GROUP").unwrap();
        assert_eq!(rule.location_id, Some(zone_id_of(&vsd, "web")));
    }

    #[tokio::test]
    async fn test_headless_service_is_skipped() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        let agent = MockNodeAgent::new();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;

        reconciler
            .service_created(&create_test_service("db", "web", None))
            .await
            .unwrap();
        assert_eq!(vsd.calls("create_network_macro"), 0);
        assert_eq!(vsd.calls("list_network_macro_groups"), 0);
    }

    #[tokio::test]
    async fn test_service_waits_for_namespace() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        let agent = MockNodeAgent::new();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8)
            .await
            .with_namespace_wait(Duration::from_millis(200));

        let err = reconciler
            .service_created(&create_test_service("frontend", "ghost", Some("172.30.0.10")))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NamespaceNotReady(_)));
        assert_eq!(vsd.calls("create_network_macro"), 0);
    }

    #[tokio::test]
    async fn test_failed_group_assignment_is_not_fatal() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        let agent = MockNodeAgent::new();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();
        vsd.fail_next("assign_macro_groups", MockFailure::Api, 1);

        reconciler
            .service_created(&create_test_service("frontend", "web", Some("172.30.0.10")))
            .await
            .unwrap();
        assert_eq!(vsd.calls("create_network_macro"), 1);
    }

    #[tokio::test]
    async fn test_service_delete_keeps_macro() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        let agent = MockNodeAgent::new();
        let reconciler = create_test_reconciler(&vsd, &agent, "10.0.0.0/16", 8).await;
        reconciler.namespace_created(&create_test_namespace("web")).await.unwrap();
        let service = create_test_service("frontend", "web", Some("172.30.0.10"));

        reconciler.service_created(&service).await.unwrap();
        reconciler.service_updated(&service).await.unwrap();
        reconciler.service_deleted(&service).await.unwrap();
        assert_eq!(vsd.calls("delete_container"), 0);
        assert_eq!(vsd.calls("create_network_macro"), 1);
    }
}
