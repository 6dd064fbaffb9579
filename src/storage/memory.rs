use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::sync::Arc;

use super::merge::{LastWriterWins, MergePolicy, reconcile};
use super::types::{Entry, PutOutcome, now_ms};
use crate::clock::{Causality, VersionStamp};

/// Per-node replica storage.
///
/// `DashMap` shards its locks, so only operations on the same key (or keys
/// hashing to the same shard) synchronise. Ordering between writes to one key
/// comes from version comparison, never from arrival order.
pub struct LocalStore {
    entries: DashMap<String, Entry>,
    policy: Arc<dyn MergePolicy>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(Arc::new(LastWriterWins))
    }
}

impl LocalStore {
    pub fn new(policy: Arc<dyn MergePolicy>) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &Arc<dyn MergePolicy> {
        &self.policy
    }

    /// Applies `incoming` unless the stored version already covers it.
    ///
    /// A concurrent incoming version is merged with the stored one, so the
    /// stored version afterwards dominates both writes.
    pub fn put(&self, incoming: Entry) -> PutOutcome {
        match self.entries.entry(incoming.key.clone()) {
            MapEntry::Vacant(slot) => {
                slot.insert(incoming);
                PutOutcome::Applied
            }
            MapEntry::Occupied(mut slot) => {
                let stored = slot.get_mut();
                match incoming.version.compare(&stored.version) {
                    Causality::Dominates => {
                        *stored = incoming;
                        PutOutcome::Applied
                    }
                    Causality::Dominated | Causality::Equal => PutOutcome::Superseded,
                    Causality::Concurrent => {
                        match reconcile(self.policy.as_ref(), vec![stored.clone(), incoming]) {
                            Some(resolution) => {
                                tracing::debug!(
                                    "Merged concurrent write for {:?} using {}",
                                    resolution.entry.key,
                                    self.policy.name()
                                );
                                *stored = resolution.entry;
                                PutOutcome::Applied
                            }
                            None => PutOutcome::Superseded,
                        }
                    }
                }
            }
        }
    }

    /// Raw entry, tombstones and expired entries included.
    pub fn get(&self, key: &str) -> Option<Entry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Entry as a client would see it.
    pub fn get_live(&self, key: &str, now: u64) -> Option<Entry> {
        self.get(key).filter(|entry| entry.is_visible(now))
    }

    /// Writes a tombstone that stays until `grace_ms` has passed.
    pub fn delete(&self, key: &str, version: VersionStamp, grace_ms: u64) -> PutOutcome {
        self.put(Entry::tombstone(
            key.to_string(),
            version,
            now_ms().saturating_add(grace_ms),
        ))
    }

    pub fn scan_for_repair(&self, keys: &[String]) -> Vec<Entry> {
        keys.iter().filter_map(|key| self.get(key)).collect()
    }

    /// Physically removes tombstones past their grace period and values past
    /// their TTL. The check is repeated under the key's lock so an entry that
    /// was overwritten in between is left alone.
    pub fn purge_expired(&self, now: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| {
                self.entries
                    .remove_if(key, |_, entry| entry.is_expired(now))
                    .is_some()
            })
            .count()
    }

    /// Drops a replica this node no longer owns, provided it has not changed.
    pub fn remove_if_version(&self, key: &str, version: &VersionStamp) -> bool {
        self.entries
            .remove_if(key, |_, entry| &entry.version == version)
            .is_some()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
