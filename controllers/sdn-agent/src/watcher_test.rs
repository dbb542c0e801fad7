//! Unit tests for the object tracker

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use crate::watcher::{Change, ObjectTracker, key_of};
    use k8s_openapi::api::core::v1::Pod;
    use kube_runtime::watcher::Event;

    fn pod(name: &str, version: &str) -> Pod {
        let mut pod = create_test_pod(name, "web", &format!("uid-{}", name), "", &[]);
        pod.metadata.resource_version = Some(version.to_string());
        pod
    }

    fn keys(changes: &[Change<Pod>]) -> Vec<(&'static str, String)> {
        changes.iter().map(|c| (c.verb(), key_of(c.object()))).collect()
    }

    #[test]
    fn test_apply_add_then_update() {
        let mut tracker = ObjectTracker::new();

        let added = tracker.handle(Event::Apply(pod("a", "1")));
        assert_eq!(keys(&added), vec![("add", "web/a".to_string())]);

        // Same version again is not a change
        assert!(tracker.handle(Event::Apply(pod("a", "1"))).is_empty());

        let updated = tracker.handle(Event::Apply(pod("a", "2")));
        match &updated[..] {
            [Change::Updated { old, new }] => {
                assert_eq!(old.metadata.resource_version.as_deref(), Some("1"));
                assert_eq!(new.metadata.resource_version.as_deref(), Some("2"));
            }
            other => panic!("expected one update, got {:?}", keys(other)),
        }
    }

    #[test]
    fn test_delete_forgets_object() {
        let mut tracker = ObjectTracker::new();
        tracker.handle(Event::Apply(pod("a", "1")));

        let deleted = tracker.handle(Event::Delete(pod("a", "2")));
        assert_eq!(keys(&deleted), vec![("delete", "web/a".to_string())]);
        assert!(tracker.is_empty());

        // A reappearing object is new again
        let added = tracker.handle(Event::Apply(pod("a", "3")));
        assert_eq!(keys(&added), vec![("add", "web/a".to_string())]);
    }

    #[test]
    fn test_relist_reports_vanished_objects() {
        let mut tracker = ObjectTracker::new();
        tracker.handle(Event::Init);
        tracker.handle(Event::InitApply(pod("a", "1")));
        tracker.handle(Event::InitApply(pod("b", "1")));
        tracker.handle(Event::InitApply(pod("c", "1")));
        assert!(tracker.handle(Event::InitDone).is_empty());
        assert_eq!(tracker.len(), 3);

        // Watch restarts; b is gone and c changed
        tracker.handle(Event::Init);
        assert!(tracker.handle(Event::InitApply(pod("a", "1"))).is_empty());
        let changed = tracker.handle(Event::InitApply(pod("c", "5")));
        assert_eq!(keys(&changed), vec![("update", "web/c".to_string())]);

        let gone = tracker.handle(Event::InitDone);
        assert_eq!(keys(&gone), vec![("delete", "web/b".to_string())]);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_stray_init_done_deletes_nothing() {
        let mut tracker = ObjectTracker::new();
        tracker.handle(Event::Apply(pod("a", "1")));
        assert!(tracker.handle(Event::InitDone).is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_key_of_cluster_scoped_object() {
        assert_eq!(key_of(&create_test_namespace("web")), "web");
    }
}
