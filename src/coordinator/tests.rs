//! Coordinator Module Tests
//!
//! ## Test Scopes
//! - **Writes**: ack policies, Unavailable vs Timeout, background retry of missed owners.
//! - **Reads**: merge of concurrent versions, read-repair, tombstones and TTL.
//! - **Hand-off**: entries follow ownership after the ring changes.
//! - **Scenarios**: full clusters on the simulated network (node loss, concurrent writers,
//!   delete + purge).

#[cfg(test)]
mod tests {
    use crate::config::AckPolicy;
    use crate::error::KvError;
    use crate::node::Node;
    use crate::storage::{PutOutcome, now_ms};
    use crate::testing::{SimNetwork, build_node, kill, spawn_cluster, test_config, wait_until};
    use std::sync::Arc;
    use std::time::Duration;

    /// Nodes on ports 7200.. that know each other but run no loops, so the
    /// membership view stays exactly as the test sets it up.
    fn static_cluster(
        net: &Arc<SimNetwork>,
        n: usize,
        rf: usize,
        tweak: impl Fn(&mut crate::config::NodeConfig),
    ) -> Vec<Arc<Node>> {
        let nodes: Vec<Arc<Node>> = (0..n)
            .map(|i| {
                let mut config = test_config(7200 + i as u16, Vec::new(), rf);
                tweak(&mut config);
                build_node(net, &format!("node-{}", i + 1), config)
            })
            .collect();
        for node in &nodes {
            for other in &nodes {
                node.table().update(other.table().local());
            }
        }
        nodes
    }

    /// Lets already spawned deliveries run before the network changes again.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn down(net: &SimNetwork, node: &Node, is_down: bool) {
        net.set_down(&node.table().local(), is_down);
    }

    /// First key whose owner set does not contain `node`.
    fn key_not_owned_by(node: &Node) -> String {
        (0..)
            .map(|i| format!("key-{i}"))
            .find(|key| !node.placement().owners_for(key).contains(node.id()))
            .unwrap()
    }

    fn value_on(node: &Node, key: &str) -> Option<Vec<u8>> {
        node.store().get_live(key, now_ms()).map(|entry| entry.value)
    }

    // ============================================================
    // SINGLE NODE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_put_then_get() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 1, 2, |_| {});
        let coordinator = nodes[0].coordinator();

        let written = coordinator.put("foo", b"bar".to_vec(), None).await.unwrap();
        assert_eq!(written.acked, 1);
        assert_eq!(written.required, 1);

        let read = coordinator.get("foo").await.unwrap();
        assert_eq!(read.value.as_deref(), Some(&b"bar"[..]));
        assert_eq!(read.version, Some(written.version));
        assert!(!read.conflict_resolved);

        assert!(!coordinator.get("missing").await.unwrap().is_found());
    }

    #[tokio::test]
    async fn test_overwrite_dominates_previous_version() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 1, 1, |_| {});
        let coordinator = nodes[0].coordinator();

        let first = coordinator.put("k", b"1".to_vec(), None).await.unwrap();
        let second = coordinator.put("k", b"2".to_vec(), None).await.unwrap();

        assert!(second.version.dominates(&first.version));
        let read = coordinator.get("k").await.unwrap();
        assert_eq!(read.value.as_deref(), Some(&b"2"[..]));
    }

    #[tokio::test]
    async fn test_replica_apply_is_idempotent() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 1, 1, |_| {});
        let coordinator = nodes[0].coordinator();
        coordinator.put("k", b"v".to_vec(), None).await.unwrap();
        let entry = coordinator.read_replica("k").unwrap();

        assert_eq!(coordinator.apply_replica(entry.clone()), PutOutcome::Superseded);
        assert_eq!(coordinator.apply_replica(entry.clone()), PutOutcome::Superseded);
        assert_eq!(coordinator.read_replica("k"), Some(entry));
    }

    #[tokio::test]
    async fn test_ttl_expires_value() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 1, 1, |_| {});
        let coordinator = nodes[0].coordinator();

        coordinator
            .put("short", b"v".to_vec(), Some(Duration::ZERO))
            .await
            .unwrap();
        coordinator
            .put("long", b"v".to_vec(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        assert!(!coordinator.get("short").await.unwrap().is_found());
        assert!(coordinator.get("long").await.unwrap().is_found());
        assert_eq!(nodes[0].store().purge_expired(now_ms()), 1);
    }

    // ============================================================
    // WRITE POLICY TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_write_all_reports_partial_acks() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 3, 3, |c| c.write_acks = AckPolicy::All);
        down(&net, &nodes[2], true);

        let err = nodes[0]
            .coordinator()
            .put("k", b"v".to_vec(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, KvError::Timeout { acked: 2, required: 3 }));
        assert!(err.is_uncertain());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_quorum_tolerates_one_failure() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 3, 3, |c| c.write_acks = AckPolicy::Quorum);
        down(&net, &nodes[2], true);

        let written = nodes[0]
            .coordinator()
            .put("k", b"v".to_vec(), None)
            .await
            .unwrap();
        assert_eq!((written.acked, written.required), (2, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_owners_are_unavailable() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 2, 1, |_| {});
        let key = key_not_owned_by(&nodes[0]);
        down(&net, &nodes[1], true);

        let write = nodes[0].coordinator().put(&key, b"v".to_vec(), None).await;
        assert!(matches!(write, Err(KvError::Unavailable { .. })));

        let read = nodes[0].coordinator().get(&key).await;
        assert!(matches!(read, Err(KvError::Unavailable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_owner_is_retried_in_background() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 2, 2, |_| {});
        down(&net, &nodes[1], true);

        nodes[0]
            .coordinator()
            .put("k", b"v".to_vec(), None)
            .await
            .unwrap();
        settle().await;
        assert_eq!(value_on(&nodes[1], "k"), None);

        down(&net, &nodes[1], false);
        let delivered = wait_until(Duration::from_secs(3), || value_on(&nodes[1], "k").is_some()).await;
        assert!(delivered, "retry should reach the recovered owner");
    }

    // ============================================================
    // READ TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_read_repairs_stale_replica() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 2, 2, |c| c.repair_attempts = 0);
        down(&net, &nodes[1], true);
        nodes[0]
            .coordinator()
            .put("k", b"fresh".to_vec(), None)
            .await
            .unwrap();
        settle().await;
        down(&net, &nodes[1], false);
        assert_eq!(value_on(&nodes[1], "k"), None);

        let read = nodes[1].coordinator().get("k").await.unwrap();
        assert_eq!(read.value.as_deref(), Some(&b"fresh"[..]));

        let repaired = wait_until(Duration::from_secs(1), || {
            value_on(&nodes[1], "k").as_deref() == Some(&b"fresh"[..])
        })
        .await;
        assert!(repaired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_writes_converge() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 3, 3, |c| c.repair_attempts = 0);

        // Each writer is cut off from everyone else while it writes.
        down(&net, &nodes[0], true);
        nodes[0].coordinator().put("x", b"1".to_vec(), None).await.unwrap();
        settle().await;
        down(&net, &nodes[0], false);
        down(&net, &nodes[1], true);
        nodes[1].coordinator().put("x", b"2".to_vec(), None).await.unwrap();
        settle().await;
        down(&net, &nodes[1], false);

        let read = nodes[2].coordinator().get("x").await.unwrap();
        assert!(read.conflict_resolved);
        let winner = read.value.clone().unwrap();

        let agreed = wait_until(Duration::from_secs(1), || {
            nodes.iter().all(|node| value_on(node, "x") == Some(winner.clone()))
        })
        .await;
        assert!(agreed, "all replicas should hold the merged value");

        let versions: Vec<_> = nodes
            .iter()
            .map(|node| node.store().get("x").unwrap().version)
            .collect();
        assert!(versions.iter().all(|v| *v == versions[0]));

        let again = nodes[0].coordinator().get("x").await.unwrap();
        assert_eq!(again.value, Some(winner));
        assert!(!again.conflict_resolved);
    }

    #[tokio::test]
    async fn test_delete_through_non_owner_follows_owner_writes() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 3, 2, |_| {});
        let keys: Vec<String> = (0..)
            .map(|i| format!("key-{i}"))
            .filter(|key| {
                let owners = nodes[0].placement().owners_for(key);
                owners.contains(nodes[0].id()) && !owners.contains(nodes[2].id())
            })
            .take(50)
            .collect();

        for key in &keys {
            nodes[0].coordinator().put(key, b"a".to_vec(), None).await.unwrap();
            let written = nodes[0].coordinator().put(key, b"b".to_vec(), None).await.unwrap();

            let deleted = nodes[2].coordinator().delete(key).await.unwrap();
            assert!(deleted.version.dominates(&written.version));

            let read = nodes[2].coordinator().get(key).await.unwrap();
            assert!(!read.is_found(), "{key} came back after delete");
            assert!(!read.conflict_resolved);
        }
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates_instead_of_overflowing() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 1, 1, |_| {});
        let coordinator = nodes[0].coordinator();

        coordinator
            .put("k", b"v".to_vec(), Some(Duration::from_millis(u64::MAX)))
            .await
            .unwrap();

        assert_eq!(nodes[0].store().get("k").unwrap().expiry, Some(u64::MAX));
        assert!(coordinator.get("k").await.unwrap().is_found());
        assert_eq!(nodes[0].store().purge_expired(now_ms()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_hides_value_then_purges() {
        let net = SimNetwork::new();
        let nodes = static_cluster(&net, 3, 2, |_| {});
        let coordinator = nodes[0].coordinator();

        coordinator.put("foo", b"bar".to_vec(), None).await.unwrap();
        coordinator.delete("foo").await.unwrap();
        settle().await;

        assert!(!coordinator.get("foo").await.unwrap().is_found());
        for node in &nodes {
            assert_eq!(value_on(node, "foo"), None);
        }

        let owners = nodes[0].placement().owners_for("foo");
        let after_grace = now_ms() + nodes[0].config().tombstone_grace_ms + 1;
        for node in nodes.iter().filter(|n| owners.contains(n.id())) {
            assert!(node.store().get("foo").is_some_and(|e| e.tombstone));
            assert_eq!(node.store().purge_expired(after_grace), 1);
            assert!(node.store().get("foo").is_none());
        }
    }

    // ============================================================
    // HAND-OFF TESTS
    // ============================================================

    #[tokio::test]
    async fn test_hand_off_moves_keys_to_new_owner() {
        let net = SimNetwork::new();
        let nodes: Vec<Arc<Node>> = (0..2)
            .map(|i| build_node(&net, &format!("node-{}", i + 1), test_config(7300 + i, Vec::new(), 1)))
            .collect();

        let keys: Vec<String> = (0..50).map(|i| format!("key-{i}")).collect();
        for key in &keys {
            nodes[0].coordinator().put(key, b"v".to_vec(), None).await.unwrap();
        }
        assert_eq!(nodes[0].store().len(), keys.len());

        nodes[0].table().update(nodes[1].table().local());
        nodes[1].table().update(nodes[0].table().local());
        let moved: Vec<&String> = keys
            .iter()
            .filter(|key| nodes[0].placement().owners_for(key).contains(nodes[1].id()))
            .collect();
        assert!(!moved.is_empty());

        let report = nodes[0].coordinator().hand_off().await;

        assert_eq!(report.pushed, moved.len());
        assert_eq!(report.dropped, moved.len());
        assert_eq!(report.failed, 0);
        for key in &moved {
            assert!(value_on(&nodes[1], key).is_some());
            assert!(nodes[0].store().get(key).is_none());
        }
        assert_eq!(nodes[0].store().len() + nodes[1].store().len(), keys.len());
    }

    // ============================================================
    // CLUSTER SCENARIOS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_survivor_serves_key_after_primary_dies() {
        let net = SimNetwork::new();
        let nodes = spawn_cluster(&net, 3, 2).await;

        nodes[0].coordinator().put("foo", b"bar".to_vec(), None).await.unwrap();
        let owners = nodes[0].placement().owners_for("foo");
        let replicated = wait_until(Duration::from_secs(2), || {
            nodes
                .iter()
                .filter(|n| owners.contains(n.id()))
                .all(|n| value_on(n, "foo").is_some())
        })
        .await;
        assert!(replicated);

        let primary = nodes.iter().find(|n| *n.id() == owners[0]).unwrap();
        let survivor = nodes.iter().find(|n| *n.id() != owners[0]).unwrap();
        kill(&net, primary).await;

        let read = survivor.coordinator().get("foo").await.unwrap();
        assert_eq!(read.value.as_deref(), Some(&b"bar"[..]));

        let dead = wait_until(Duration::from_secs(10), || {
            !survivor.placement().owners_for("foo").contains(&owners[0])
        })
        .await;
        assert!(dead, "dead primary should leave the owner set");
        let read = survivor.coordinator().get("foo").await.unwrap();
        assert_eq!(read.value.as_deref(), Some(&b"bar"[..]));

        for node in nodes.iter().filter(|n| *n.id() != owners[0]) {
            node.halt().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hand_off_restores_replication_after_loss() {
        let net = SimNetwork::new();
        let nodes = spawn_cluster(&net, 3, 2).await;
        for i in 0..30 {
            nodes[0]
                .coordinator()
                .put(&format!("key-{i}"), b"v".to_vec(), None)
                .await
                .unwrap();
        }

        kill(&net, &nodes[2]).await;

        let restored = wait_until(Duration::from_secs(10), || {
            (0..30).all(|i| {
                let key = format!("key-{i}");
                nodes[..2].iter().all(|n| value_on(n, &key).is_some())
            })
        })
        .await;
        assert!(restored, "both survivors should own a copy of every key");

        nodes[0].halt().await;
        nodes[1].halt().await;
    }
}
