//! Conflict resolution between concurrent replicas of the same key.

use std::cmp::Ordering;

use super::types::Entry;
use crate::clock::{Causality, VersionStamp};

/// Picks the surviving value among pairwise-concurrent siblings.
///
/// Implementations must be deterministic and independent of sibling order so
/// that every node resolving the same siblings reaches the same entry.
pub trait MergePolicy: Send + Sync + 'static {
    /// `siblings` contains no dominated versions. The returned entry's version
    /// is replaced by the merge of all sibling versions.
    fn resolve(&self, siblings: &[Entry]) -> Option<Entry>;

    fn name(&self) -> &'static str;
}

/// Highest hybrid tick wins; node id breaks ties, then tombstones beat values.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriterWins;

impl MergePolicy for LastWriterWins {
    fn resolve(&self, siblings: &[Entry]) -> Option<Entry> {
        siblings.iter().max_by(|a, b| lww_order(a, b)).cloned()
    }

    fn name(&self) -> &'static str {
        "last-writer-wins"
    }
}

fn lww_order(a: &Entry, b: &Entry) -> Ordering {
    a.version
        .last_write()
        .cmp(&b.version.last_write())
        .then(a.tombstone.cmp(&b.tombstone))
        .then_with(|| a.value.cmp(&b.value))
}

/// Outcome of reconciling replica responses.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entry: Entry,
    /// More than one concurrent version had to be merged.
    pub conflicted: bool,
}

/// Drops dominated versions, then merges whatever concurrent siblings remain.
pub fn reconcile(policy: &dyn MergePolicy, entries: Vec<Entry>) -> Option<Resolution> {
    let mut survivors: Vec<Entry> = Vec::new();

    for candidate in entries {
        let mut keep = true;
        let mut i = 0;
        while i < survivors.len() {
            match candidate.version.compare(&survivors[i].version) {
                Causality::Dominated => {
                    keep = false;
                    break;
                }
                Causality::Equal => {
                    // Same version, keep one representative deterministically.
                    if lww_order(&candidate, &survivors[i]) == Ordering::Greater {
                        survivors.swap_remove(i);
                        continue;
                    }
                    keep = false;
                    break;
                }
                Causality::Dominates => {
                    survivors.swap_remove(i);
                    continue;
                }
                Causality::Concurrent => {}
            }
            i += 1;
        }
        if keep {
            survivors.push(candidate);
        }
    }

    match survivors.len() {
        0 => None,
        1 => survivors.pop().map(|entry| Resolution {
            entry,
            conflicted: false,
        }),
        _ => {
            let version = survivors
                .iter()
                .fold(VersionStamp::new(), |acc, e| acc.merge(&e.version));
            let mut entry = policy.resolve(&survivors)?;
            entry.version = version;
            Some(Resolution {
                entry,
                conflicted: true,
            })
        }
    }
}
