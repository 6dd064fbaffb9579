use std::collections::HashMap;

use crate::membership::types::{Member, NodeId};

/// Position of a key or virtual node on the 64-bit ring.
pub fn ring_position(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(head)
}

/// An immutable view of key ownership derived from one alive set.
///
/// Snapshots are never mutated; a membership change produces a new one and
/// operations that already hold an `Arc` to the old one finish against it.
#[derive(Debug)]
pub struct RingSnapshot {
    /// Local rebuild counter.
    pub epoch: u64,
    /// Alive epoch of the membership table this snapshot was built from.
    pub membership_epoch: u64,
    replication_factor: usize,
    tokens: Vec<(u64, NodeId)>,
    members: HashMap<NodeId, Member>,
}

impl RingSnapshot {
    pub fn build(
        epoch: u64,
        membership_epoch: u64,
        alive: Vec<Member>,
        virtual_nodes: usize,
        replication_factor: usize,
    ) -> Self {
        let mut tokens = Vec::with_capacity(alive.len() * virtual_nodes);
        for member in &alive {
            for vnode in 0..virtual_nodes {
                let label = format!("{}#{}", member.id, vnode);
                tokens.push((ring_position(label.as_bytes()), member.id.clone()));
            }
        }
        tokens.sort();

        let members = alive.into_iter().map(|m| (m.id.clone(), m)).collect();

        Self {
            epoch,
            membership_epoch,
            replication_factor,
            tokens,
            members,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.members.len()
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn member(&self, id: &NodeId) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.contains_key(id)
    }

    /// Primary first, then the next distinct physical nodes clockwise.
    pub fn owners_for(&self, key: &str) -> Vec<NodeId> {
        let wanted = self.replication_factor.min(self.members.len());
        let mut owners: Vec<NodeId> = Vec::with_capacity(wanted);
        if wanted == 0 {
            return owners;
        }

        let position = ring_position(key.as_bytes());
        let start = self.tokens.partition_point(|(token, _)| *token < position);

        for offset in 0..self.tokens.len() {
            let (_, node) = &self.tokens[(start + offset) % self.tokens.len()];
            if !owners.contains(node) {
                owners.push(node.clone());
                if owners.len() == wanted {
                    break;
                }
            }
        }
        owners
    }

    pub fn replicas_for(&self, key: &str) -> Vec<Member> {
        self.owners_for(key)
            .iter()
            .filter_map(|id| self.members.get(id).cloned())
            .collect()
    }

    pub fn primary_for(&self, key: &str) -> Option<NodeId> {
        self.owners_for(key).into_iter().next()
    }
}
