use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

use super::types::{Member, NodeId, NodeState};

/// This node's view of the cluster.
///
/// The table is the only owner of membership state. The gossip engine feeds it
/// remote assertions through [`MembershipTable::update`] and local failure
/// detector verdicts through `mark_*`; placement reads the alive set.
pub struct MembershipTable {
    local_id: NodeId,
    members: DashMap<NodeId, Member>,
    /// Highest incarnation seen for members that were garbage-collected,
    /// with the time they were forgotten.
    removed: DashMap<NodeId, (u64, Instant)>,
    leaving: AtomicBool,
    alive_epoch: watch::Sender<u64>,
}

impl MembershipTable {
    pub fn new(local: Member) -> Self {
        let local_id = local.id.clone();
        let members = DashMap::new();
        members.insert(local_id.clone(), local);
        let (alive_epoch, _) = watch::channel(0);

        Self {
            local_id,
            members,
            removed: DashMap::new(),
            leaving: AtomicBool::new(false),
            alive_epoch,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn local(&self) -> Member {
        self.members
            .get(&self.local_id)
            .map(|m| m.value().clone())
            .unwrap_or_else(|| unreachable!("local member is never removed"))
    }

    pub fn get(&self, id: &NodeId) -> Option<Member> {
        self.members.get(id).map(|m| m.value().clone())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[cfg(test)]
    pub(crate) fn removed_len(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Counter bumped whenever the set of alive members (or an alive member's
    /// address) changes.
    pub fn alive_epoch(&self) -> u64 {
        *self.alive_epoch.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.alive_epoch.subscribe()
    }

    fn bump_alive_epoch(&self) {
        self.alive_epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Applies a membership assertion received from gossip.
    ///
    /// Higher incarnation always wins; at equal incarnation the worse state
    /// wins. Returns whether our view changed.
    pub fn update(&self, info: Member) -> bool {
        if info.id == self.local_id {
            return self.refute(&info);
        }

        let id = info.id.clone();
        if let Some(floor) = self.removed.get(&id)
            && info.incarnation <= floor.0
        {
            return false;
        }

        let (changed, alive_changed) = match self.members.entry(id.clone()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if !info.supersedes(existing) {
                    (false, false)
                } else {
                    let was_alive = existing.state == NodeState::Alive;
                    let moved = existing.http_addr != info.http_addr
                        || existing.gossip_addr != info.gossip_addr;

                    if existing.state != info.state {
                        info!(
                            "Member {} {:?} -> {:?} (inc={})",
                            info.id, existing.state, info.state, info.incarnation
                        );
                    }
                    existing.state = info.state;
                    existing.incarnation = info.incarnation;
                    existing.gossip_addr = info.gossip_addr;
                    existing.http_addr = info.http_addr;
                    existing.last_updated = Some(Instant::now());

                    let is_alive = existing.state == NodeState::Alive;
                    (true, was_alive != is_alive || (is_alive && moved))
                }
            }
            Entry::Vacant(slot) => {
                info!(
                    "Discovered new member {} at {} ({:?}, inc={})",
                    info.id, info.gossip_addr, info.state, info.incarnation
                );
                let alive = info.state == NodeState::Alive;
                let mut member = info;
                member.last_updated = Some(Instant::now());
                slot.insert(member);
                (true, alive)
            }
        };

        if changed {
            self.removed.remove(&id);
        }
        if alive_changed {
            self.bump_alive_epoch();
        }
        changed
    }

    /// Someone believes we are suspect or dead: bump our incarnation past the
    /// claim and assert Alive again.
    fn refute(&self, claim: &Member) -> bool {
        if claim.state == NodeState::Alive || self.leaving.load(Ordering::Acquire) {
            return false;
        }
        let Some(mut local) = self.members.get_mut(&self.local_id) else {
            return false;
        };
        if claim.incarnation < local.incarnation {
            return false;
        }

        local.incarnation = claim.incarnation + 1;
        local.state = NodeState::Alive;
        local.last_updated = Some(Instant::now());
        info!(
            "Refuting {:?} claim about ourselves, incarnation now {}",
            claim.state, local.incarnation
        );
        true
    }

    fn transition(&self, id: &NodeId, from: &[NodeState], to: NodeState) -> Option<Member> {
        if id == &self.local_id {
            return None;
        }
        let updated = {
            let mut member = self.members.get_mut(id)?;
            if !from.contains(&member.state) {
                return None;
            }
            member.state = to;
            member.last_updated = Some(Instant::now());
            member.clone()
        };
        if from.contains(&NodeState::Alive) || to == NodeState::Alive {
            self.bump_alive_epoch();
        }
        Some(updated)
    }

    /// Failed direct and indirect probes.
    pub fn mark_suspect(&self, id: &NodeId) -> Option<Member> {
        self.transition(id, &[NodeState::Alive], NodeState::Suspect)
    }

    pub fn mark_dead(&self, id: &NodeId) -> Option<Member> {
        self.transition(id, &[NodeState::Alive, NodeState::Suspect], NodeState::Dead)
    }

    /// Graceful shutdown: we are Left from here on and stop refuting.
    pub fn mark_left_local(&self) -> Member {
        self.leaving.store(true, Ordering::Release);
        if let Some(mut local) = self.members.get_mut(&self.local_id) {
            local.state = NodeState::Left;
            local.last_updated = Some(Instant::now());
        }
        self.bump_alive_epoch();
        self.local()
    }

    /// Suspects that did not refute within `timeout` are declared dead.
    pub fn expire_suspects(&self, timeout: Duration) -> Vec<Member> {
        let now = Instant::now();
        let overdue: Vec<NodeId> = self
            .members
            .iter()
            .filter(|m| {
                m.state == NodeState::Suspect
                    && m.last_updated
                        .is_none_or(|since| now.duration_since(since) > timeout)
            })
            .map(|m| m.id.clone())
            .collect();

        overdue
            .into_iter()
            .filter_map(|id| self.transition(&id, &[NodeState::Suspect], NodeState::Dead))
            .collect()
    }

    /// Forgets members that have been Dead or Left for longer than `retention`.
    /// Their resurrection floors are kept for one more `retention` window.
    pub fn collect_garbage(&self, retention: Duration) -> usize {
        let now = Instant::now();
        self.removed
            .retain(|_, (_, forgotten)| now.duration_since(*forgotten) <= retention);

        let stale: Vec<NodeId> = self
            .members
            .iter()
            .filter(|m| {
                m.id != self.local_id
                    && m.state.is_gone()
                    && m.last_updated
                        .is_none_or(|since| now.duration_since(since) > retention)
            })
            .map(|m| m.id.clone())
            .collect();

        let mut removed = 0;
        for id in stale {
            if let Some((id, member)) = self.members.remove_if(&id, |_, m| m.state.is_gone()) {
                tracing::debug!("Forgetting {:?} member {}", member.state, id);
                self.removed.insert(id, (member.incarnation, now));
                removed += 1;
            }
        }
        removed
    }

    /// Alive members, the local node included while it is not leaving.
    pub fn snapshot(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| m.state == NodeState::Alive)
            .map(|m| m.value().clone())
            .collect()
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.iter().map(|m| m.value().clone()).collect()
    }

    pub fn alive_peers(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| m.id != self.local_id && m.state == NodeState::Alive)
            .map(|m| m.value().clone())
            .collect()
    }

    /// Peers the failure detector should keep probing.
    pub fn probe_candidates(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| {
                m.id != self.local_id
                    && matches!(m.state, NodeState::Alive | NodeState::Suspect)
            })
            .map(|m| m.value().clone())
            .collect()
    }

    pub fn dead_peers(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| m.id != self.local_id && m.state == NodeState::Dead)
            .map(|m| m.value().clone())
            .collect()
    }
}
