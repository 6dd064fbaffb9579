use dashmap::DashMap;

use crate::membership::types::{Member, NodeId};

struct Broadcast {
    member: Member,
    remaining: u32,
}

/// Infection-style retransmit queue of recently changed members.
///
/// Each change is piggybacked on outgoing digests a bounded number of times
/// (`mult * ceil(log2(n + 1))`), then dropped. A newer record for the same
/// member replaces the queued one.
pub struct DisseminationQueue {
    pending: DashMap<NodeId, Broadcast>,
    retransmit_mult: u32,
}

impl DisseminationQueue {
    pub fn new(retransmit_mult: u32) -> Self {
        Self {
            pending: DashMap::new(),
            retransmit_mult,
        }
    }

    pub fn retransmit_limit(&self, cluster_size: usize) -> u32 {
        let rounds = ((cluster_size + 1) as f64).log2().ceil() as u32;
        self.retransmit_mult * rounds.max(1)
    }

    pub fn enqueue(&self, member: Member, cluster_size: usize) {
        let remaining = self.retransmit_limit(cluster_size);
        self.pending
            .insert(member.id.clone(), Broadcast { member, remaining });
    }

    /// Up to `max` records, preferring the least transmitted ones.
    pub fn digest(&self, max: usize) -> Vec<Member> {
        let mut candidates: Vec<(NodeId, u32)> = self
            .pending
            .iter()
            .map(|b| (b.key().clone(), b.value().remaining))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut digest = Vec::with_capacity(max.min(candidates.len()));
        for (id, _) in candidates.into_iter().take(max) {
            let exhausted = match self.pending.get_mut(&id) {
                Some(mut broadcast) => {
                    broadcast.remaining = broadcast.remaining.saturating_sub(1);
                    digest.push(broadcast.member.clone());
                    broadcast.remaining == 0
                }
                None => false,
            };
            if exhausted {
                self.pending.remove_if(&id, |_, b| b.remaining == 0);
            }
        }
        digest
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
