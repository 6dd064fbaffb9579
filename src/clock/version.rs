use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::membership::types::NodeId;

/// Outcome of comparing two version stamps.
///
/// Vector clocks form a partial order: `Concurrent` is a real answer and is
/// carried through to the merge policy rather than collapsed early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Dominates,
    Dominated,
    Concurrent,
    Equal,
}

/// Per-key causality metadata: a vector clock `NodeId -> counter`.
///
/// Counters are hybrid logical ticks issued by [`super::VersionClock`], so the
/// largest `(counter, node)` pair doubles as a last-writer-wins key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VersionStamp {
    counters: BTreeMap<NodeId, u64>,
}

impl VersionStamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn get(&self, node: &NodeId) -> u64 {
        self.counters.get(node).copied().unwrap_or(0)
    }

    pub fn with(mut self, node: NodeId, counter: u64) -> Self {
        self.counters.insert(node, counter);
        self
    }

    pub(crate) fn set(&mut self, node: NodeId, counter: u64) {
        self.counters.insert(node, counter);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &u64)> {
        self.counters.iter()
    }

    pub fn max_counter(&self) -> u64 {
        self.counters.values().copied().max().unwrap_or(0)
    }

    /// The most recent write recorded in this stamp, ordered by counter and
    /// then by node id.
    pub fn last_write(&self) -> Option<(u64, &NodeId)> {
        self.counters
            .iter()
            .map(|(node, counter)| (*counter, node))
            .max()
    }

    pub fn compare(&self, other: &VersionStamp) -> Causality {
        let mut ahead = false;
        let mut behind = false;

        for (node, &counter) in &self.counters {
            let theirs = other.get(node);
            if counter > theirs {
                ahead = true;
            } else if counter < theirs {
                behind = true;
            }
        }
        for (node, &counter) in &other.counters {
            if !self.counters.contains_key(node) && counter > 0 {
                behind = true;
            }
        }

        match (ahead, behind) {
            (false, false) => Causality::Equal,
            (true, false) => Causality::Dominates,
            (false, true) => Causality::Dominated,
            (true, true) => Causality::Concurrent,
        }
    }

    pub fn dominates(&self, other: &VersionStamp) -> bool {
        self.compare(other) == Causality::Dominates
    }

    /// Componentwise maximum.
    pub fn merge(&self, other: &VersionStamp) -> VersionStamp {
        let mut counters = self.counters.clone();
        for (node, &counter) in &other.counters {
            let slot = counters.entry(node.clone()).or_insert(0);
            if counter > *slot {
                *slot = counter;
            }
        }
        VersionStamp { counters }
    }
}
