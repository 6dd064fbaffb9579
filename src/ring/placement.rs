use arc_swap::ArcSwap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::snapshot::RingSnapshot;
use crate::membership::table::MembershipTable;
use crate::membership::types::{Member, NodeId};

/// Resolves key ownership against the current alive set.
///
/// Readers load the current snapshot lock-free. The snapshot is rebuilt
/// lazily on lookup when the membership table's alive epoch moved, and
/// eagerly by the node's maintenance loop; either way it is swapped in whole.
pub struct PlacementManager {
    table: Arc<MembershipTable>,
    current: ArcSwap<RingSnapshot>,
    rebuilds: AtomicU64,
    virtual_nodes: usize,
    replication_factor: usize,
}

impl PlacementManager {
    pub fn new(table: Arc<MembershipTable>, virtual_nodes: usize, replication_factor: usize) -> Self {
        let initial = RingSnapshot::build(
            0,
            table.alive_epoch(),
            table.snapshot(),
            virtual_nodes,
            replication_factor,
        );

        Self {
            table,
            current: ArcSwap::from_pointee(initial),
            rebuilds: AtomicU64::new(0),
            virtual_nodes,
            replication_factor,
        }
    }

    /// The ring for the current alive set.
    pub fn current(&self) -> Arc<RingSnapshot> {
        let snapshot = self.current.load_full();
        if snapshot.membership_epoch == self.table.alive_epoch() {
            return snapshot;
        }
        self.rebuild()
    }

    /// Builds a snapshot from the table and swaps it in, unless a concurrent
    /// rebuild already installed one for a newer alive epoch.
    pub fn rebuild(&self) -> Arc<RingSnapshot> {
        let membership_epoch = self.table.alive_epoch();
        let alive = self.table.snapshot();
        let epoch = self.rebuilds.fetch_add(1, Ordering::AcqRel) + 1;

        let fresh = Arc::new(RingSnapshot::build(
            epoch,
            membership_epoch,
            alive,
            self.virtual_nodes,
            self.replication_factor,
        ));

        self.current.rcu(|installed| {
            if installed.membership_epoch > fresh.membership_epoch {
                Arc::clone(installed)
            } else {
                Arc::clone(&fresh)
            }
        });

        let installed = self.current.load_full();
        tracing::debug!(
            "Ring rebuilt: epoch={} members={} (alive epoch {})",
            installed.epoch,
            installed.node_count(),
            installed.membership_epoch
        );
        installed
    }

    pub fn owners_for(&self, key: &str) -> Vec<NodeId> {
        self.current().owners_for(key)
    }

    pub fn replicas_for(&self, key: &str) -> Vec<Member> {
        self.current().replicas_for(key)
    }

    pub fn is_local_owner(&self, key: &str) -> bool {
        self.owners_for(key).contains(self.table.local_id())
    }
}
