//! Unit tests for host registration and leader election

#[cfg(test)]
mod tests {
    use crate::election::{ElectionConfig, LeaderElector};
    use crate::error::ElectionError;
    use crate::mock::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn elector(store: &MemoryStore, identity: &str) -> LeaderElector {
        LeaderElector::new(Arc::new(store.clone()), ElectionConfig::new(identity))
    }

    #[test]
    fn test_keys_and_renew_interval() {
        let config = ElectionConfig::new("node-1");
        assert_eq!(config.host_key(), "/sdn-agent/hosts/node-1");
        assert_eq!(config.leader_key(), "/sdn-agent/leader");
        assert_eq!(config.renew_interval(), Duration::from_secs(3));

        let mut single = ElectionConfig::new("node-1");
        single.nr_clients = 0;
        assert_eq!(single.renew_interval(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_host_claims_key() {
        let store = MemoryStore::new();
        let handle = elector(&store, "node-1").register_host().await.unwrap();

        assert_eq!(handle.key(), "/sdn-agent/hosts/node-1");
        assert_eq!(store.get("/sdn-agent/hosts/node-1").as_deref(), Some("node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_host_duplicate_identity() {
        let store = MemoryStore::new();
        store.insert("/sdn-agent/hosts/node-1", "node-1");

        let result = elector(&store, "node-1").register_host().await;
        assert!(matches!(result, Err(ElectionError::DuplicateIdentity(id)) if id == "node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_leader_among_competitors() {
        let store = MemoryStore::new();
        let first = elector(&store, "node-1").acquire_leadership().await.unwrap();
        assert_eq!(store.get("/sdn-agent/leader").as_deref(), Some("node-1"));

        let second = elector(&store, "node-2");
        let third = elector(&store, "node-3");
        let waiting_2 = tokio::spawn(async move { second.acquire_leadership().await });
        let waiting_3 = tokio::spawn(async move { third.acquire_leadership().await });

        // Renewals keep the key alive; neither competitor may win
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!waiting_2.is_finished());
        assert!(!waiting_3.is_finished());
        assert!(store.renewals("/sdn-agent/leader") >= 9);
        drop(first);

        // With the holder gone, expiry releases the key to exactly one waiter
        store.expire("/sdn-agent/leader");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let winners = [waiting_2.is_finished(), waiting_3.is_finished()];
        assert_eq!(winners.iter().filter(|w| **w).count(), 1);
        let leader = store.get("/sdn-agent/leader").unwrap();
        assert!(leader == "node-2" || leader == "node-3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_releases_waiter() {
        let store = MemoryStore::new();
        store.insert("/sdn-agent/leader", "node-9");

        let waiter = elector(&store, "node-1");
        let waiting = tokio::spawn(async move { waiter.acquire_leadership().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());

        // A rewrite by the holder keeps the waiter blocked
        store.insert("/sdn-agent/leader", "node-9");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());

        store.delete("/sdn-agent/leader");
        let handle = waiting.await.unwrap().unwrap();
        assert_eq!(handle.key(), "/sdn-agent/leader");
        assert_eq!(store.get("/sdn-agent/leader").as_deref(), Some("node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_reports_lost_key() {
        let store = MemoryStore::new();
        let mut handle = elector(&store, "node-1").acquire_leadership().await.unwrap();

        store.expire("/sdn-agent/leader");
        let err = handle.lost().await;
        assert!(matches!(err, ElectionError::LeaseLost(key) if key == "/sdn-agent/leader"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_reports_takeover() {
        let store = MemoryStore::new();
        let mut handle = elector(&store, "node-1").register_host().await.unwrap();

        store.insert("/sdn-agent/hosts/node-1", "impostor");
        let err = handle.lost().await;
        assert!(matches!(err, ElectionError::LeaseLost(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_stops_on_store_error() {
        let store = MemoryStore::new();
        let mut handle = elector(&store, "node-1").register_host().await.unwrap();

        store.fail_next_swap("/sdn-agent/hosts/node-1");
        let err = handle.lost().await;
        assert!(matches!(err, ElectionError::Store(_)));
    }
}
