use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::replica::ReplicaClient;
use super::types::{CoordinatorSettings, HandOffReport, ReadOutcome, WriteOutcome};
use crate::clock::{VersionClock, VersionStamp};
use crate::error::{KvError, KvResult};
use crate::membership::types::{Member, NodeId};
use crate::ring::{PlacementManager, RingSnapshot};
use crate::storage::{Entry, LocalStore, PutOutcome, now_ms, reconcile};

/// Entries pushed at once during a hand-off pass.
const HAND_OFF_CONCURRENCY: usize = 16;

/// Serves client operations from any node.
///
/// Writes are stamped here on top of the owners' current versions and fanned
/// out to every owner; reads gather all owner copies, merge them and repair
/// the replicas that were behind.
pub struct Coordinator {
    local_id: NodeId,
    store: Arc<LocalStore>,
    placement: Arc<PlacementManager>,
    clock: VersionClock,
    client: Arc<dyn ReplicaClient>,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(
        local_id: NodeId,
        store: Arc<LocalStore>,
        placement: Arc<PlacementManager>,
        client: Arc<dyn ReplicaClient>,
        settings: CoordinatorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            clock: VersionClock::new(local_id.clone()),
            local_id,
            store,
            placement,
            client,
            settings,
        })
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn placement(&self) -> &Arc<PlacementManager> {
        &self.placement
    }

    // ============================================================
    // CLIENT OPERATIONS
    // ============================================================

    pub async fn put(
        self: &Arc<Self>,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<WriteOutcome> {
        let owners = self.owners(key)?;
        let expiry = ttl.map(|ttl| {
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            now_ms().saturating_add(ttl_ms)
        });
        let version = self.next_version(key, &owners).await;
        self.write(Entry::live(key.to_string(), value, version, expiry), owners)
            .await
    }

    /// Writes a tombstone that replicas keep for the configured grace period.
    pub async fn delete(self: &Arc<Self>, key: &str) -> KvResult<WriteOutcome> {
        let owners = self.owners(key)?;
        let expiry = now_ms().saturating_add(self.settings.tombstone_grace_ms);
        let version = self.next_version(key, &owners).await;
        self.write(Entry::tombstone(key.to_string(), version, expiry), owners)
            .await
    }

    pub async fn get(self: &Arc<Self>, key: &str) -> KvResult<ReadOutcome> {
        let owners = self.owners(key)?;
        let required = self.settings.read_acks.required(owners.len());
        let deadline = Instant::now() + self.settings.request_timeout;

        let (replies, failed) = self.gather(key, &owners, deadline).await;
        if replies.len() < required {
            return Err(self.unmet(key, replies.len(), required, failed, owners.len()));
        }

        let entries: Vec<Entry> = replies.iter().filter_map(|(_, e)| e.clone()).collect();
        let Some(resolution) = reconcile(self.store.policy().as_ref(), entries) else {
            return Ok(ReadOutcome::default());
        };
        let merged = resolution.entry;
        self.clock.observe(&merged.version);

        let now = now_ms();
        let stale: Vec<Member> = replies
            .into_iter()
            .filter(|(_, entry)| entry.as_ref().is_none_or(|e| e.version != merged.version))
            .map(|(owner, _)| owner)
            .collect();
        if !stale.is_empty() && !merged.is_expired(now) {
            self.spawn_read_repair(merged.clone(), stale);
        }

        Ok(ReadOutcome {
            value: merged.is_visible(now).then(|| merged.value.clone()),
            version: Some(merged.version),
            conflict_resolved: resolution.conflicted,
        })
    }

    // ============================================================
    // REPLICA-SIDE OPERATIONS
    // ============================================================

    /// Applies a write received from another coordinator.
    pub fn apply_replica(&self, entry: Entry) -> PutOutcome {
        self.clock.observe(&entry.version);
        self.store.put(entry)
    }

    pub fn read_replica(&self, key: &str) -> Option<Entry> {
        self.store.get(key)
    }

    /// Pushes every local entry to its current owners and drops copies
    /// this node no longer owns once every owner has them.
    pub async fn hand_off(&self) -> HandOffReport {
        let ring = self.placement.current();
        let now = now_ms();
        let entries = self
            .store
            .entries()
            .into_iter()
            .filter(|entry| !entry.is_expired(now));

        let mut passes = futures::stream::iter(entries)
            .map(|entry| self.hand_off_entry(&ring, entry))
            .buffer_unordered(HAND_OFF_CONCURRENCY);

        let mut report = HandOffReport::default();
        while let Some(one) = passes.next().await {
            report.pushed += one.pushed;
            report.failed += one.failed;
            report.dropped += one.dropped;
        }

        if report != HandOffReport::default() {
            debug!(
                "Hand-off on ring epoch {}: pushed={} failed={} dropped={}",
                ring.epoch, report.pushed, report.failed, report.dropped
            );
        }
        report
    }

    // ============================================================
    // INTERNALS
    // ============================================================

    fn owners(&self, key: &str) -> KvResult<Vec<Member>> {
        let owners = self.placement.replicas_for(key);
        if owners.is_empty() {
            return Err(KvError::Unavailable {
                key: key.to_string(),
            });
        }
        Ok(owners)
    }

    /// Stamps a new write of `key` so that it descends from every copy the
    /// reachable owners hold, whether or not this node is one of them.
    async fn next_version(self: &Arc<Self>, key: &str, owners: &[Member]) -> VersionStamp {
        let deadline = Instant::now() + self.settings.request_timeout;
        let (replies, _) = self.gather(key, owners, deadline).await;
        let base = replies
            .into_iter()
            .filter_map(|(_, entry)| entry)
            .chain(self.store.get(key))
            .fold(VersionStamp::default(), |base, entry| base.merge(&entry.version));
        self.clock.next(&base)
    }

    /// Asks every owner for its copy of `key` until all answered or the
    /// deadline passed. Returns the replies and the number of failed calls.
    async fn gather(
        self: &Arc<Self>,
        key: &str,
        owners: &[Member],
        deadline: Instant,
    ) -> (Vec<(Member, Option<Entry>)>, usize) {
        let mut calls = FuturesUnordered::new();
        for owner in owners {
            let this = Arc::clone(self);
            let owner = owner.clone();
            let key = key.to_string();
            calls.push(tokio::spawn(async move {
                let result = this.fetch_from(&owner, &key).await;
                (owner, result)
            }));
        }

        let mut replies = Vec::with_capacity(owners.len());
        let mut failed = 0usize;
        while let Some(joined) = tokio::time::timeout_at(deadline, calls.next())
            .await
            .ok()
            .flatten()
        {
            match joined {
                Ok((owner, Ok(entry))) => replies.push((owner, entry)),
                Ok((owner, Err(e))) => {
                    debug!("Read of {:?} from {} failed: {}", key, owner.id, e);
                    failed += 1;
                }
                Err(e) => {
                    warn!("Read task for {:?} panicked: {}", key, e);
                    failed += 1;
                }
            }
        }
        (replies, failed)
    }

    async fn hand_off_entry(&self, ring: &RingSnapshot, entry: Entry) -> HandOffReport {
        let mut report = HandOffReport::default();
        let owners = ring.replicas_for(&entry.key);
        if owners.is_empty() {
            return report;
        }
        let remote: Vec<&Member> = owners.iter().filter(|m| m.id != self.local_id).collect();

        let results =
            futures::future::join_all(remote.iter().map(|owner| self.replicate_to(owner, &entry)))
                .await;
        report.pushed = results.iter().filter(|r| r.is_ok()).count();
        report.failed = results.len() - report.pushed;

        let still_owner = owners.iter().any(|m| m.id == self.local_id);
        if !still_owner
            && report.pushed == remote.len()
            && self.store.remove_if_version(&entry.key, &entry.version)
        {
            report.dropped = 1;
        }
        report
    }

    async fn write(self: &Arc<Self>, entry: Entry, owners: Vec<Member>) -> KvResult<WriteOutcome> {
        let required = self.settings.write_acks.required(owners.len());
        let deadline = Instant::now() + self.settings.request_timeout;

        let mut calls: FuturesUnordered<_> = owners
            .iter()
            .map(|owner| self.spawn_delivery(owner.clone(), entry.clone()))
            .collect();

        let mut acked = 0usize;
        let mut failed = 0usize;
        while acked < required {
            match tokio::time::timeout_at(deadline, calls.next()).await {
                Ok(Some(Ok(Ok(_)))) => acked += 1,
                Ok(Some(_)) => failed += 1,
                Ok(None) | Err(_) => break,
            }
        }

        if acked < required {
            return Err(self.unmet(&entry.key, acked, required, failed, owners.len()));
        }

        Ok(WriteOutcome {
            version: entry.version,
            acked,
            required,
        })
    }

    fn unmet(&self, key: &str, acked: usize, required: usize, failed: usize, owners: usize) -> KvError {
        if acked == 0 && failed == owners {
            KvError::Unavailable {
                key: key.to_string(),
            }
        } else {
            KvError::Timeout { acked, required }
        }
    }

    /// Sends `entry` to one owner. The first attempt's result is reported
    /// through the returned channel; a failed owner keeps being retried in
    /// the background after that.
    fn spawn_delivery(
        self: &Arc<Self>,
        owner: Member,
        entry: Entry,
    ) -> oneshot::Receiver<KvResult<PutOutcome>> {
        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let first = this.replicate_to(&owner, &entry).await;
            let failed = first.is_err();
            let _ = tx.send(first);
            if failed {
                this.retry_replicate(owner, entry).await;
            }
        });
        rx
    }

    async fn retry_replicate(&self, owner: Member, entry: Entry) {
        let mut delay_ms = 150u64;

        for attempt in 1..=self.settings.repair_attempts {
            let jitter = rand::random::<u64>() % 50;
            tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
            delay_ms = (delay_ms * 2).min(1200);

            match self.replicate_to(&owner, &entry).await {
                Ok(_) => {
                    debug!(
                        "Delivered {:?} to {} on retry {}",
                        entry.key, owner.id, attempt
                    );
                    return;
                }
                Err(e) => debug!("Retry {} of {:?} to {} failed: {}", attempt, entry.key, owner.id, e),
            }
        }

        warn!(
            "Giving up on replicating {:?} to {}; hand-off or read-repair will catch up",
            entry.key, owner.id
        );
    }

    fn spawn_read_repair(self: &Arc<Self>, merged: Entry, targets: Vec<Member>) {
        debug!(
            "Read-repairing {:?} on {} replica(s)",
            merged.key,
            targets.len()
        );
        for target in targets {
            let this = Arc::clone(self);
            let entry = merged.clone();
            tokio::spawn(async move {
                if let Err(e) = this.replicate_to(&target, &entry).await {
                    warn!("Read-repair of {:?} on {} failed: {}", entry.key, target.id, e);
                }
            });
        }
    }

    async fn replicate_to(&self, owner: &Member, entry: &Entry) -> KvResult<PutOutcome> {
        if owner.id == self.local_id {
            return Ok(self.apply_replica(entry.clone()));
        }
        tokio::time::timeout(
            self.settings.request_timeout,
            self.client.replicate(owner, entry),
        )
        .await
        .unwrap_or_else(|_| Err(timed_out(owner)))
    }

    async fn fetch_from(&self, owner: &Member, key: &str) -> KvResult<Option<Entry>> {
        if owner.id == self.local_id {
            return Ok(self.read_replica(key));
        }
        let entry = tokio::time::timeout(self.settings.request_timeout, self.client.fetch(owner, key))
            .await
            .unwrap_or_else(|_| Err(timed_out(owner)))?;
        if let Some(entry) = &entry {
            self.clock.observe(&entry.version);
        }
        Ok(entry)
    }
}

fn timed_out(owner: &Member) -> KvError {
    KvError::Transport(format!("request to {} at {} timed out", owner.id, owner.http_addr))
}
