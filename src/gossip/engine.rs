use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dissemination::DisseminationQueue;
use super::transport::GossipTransport;
use super::types::GossipMessage;
use crate::config::NodeConfig;
use crate::membership::table::MembershipTable;
use crate::membership::types::Member;

/// Drives the membership table towards convergence.
///
/// Three loops run per node: a receive loop, a gossip round loop
/// (dissemination, push-pull sync, suspect expiry, GC) and a probe loop
/// (direct + indirect failure detection).
pub struct GossipEngine {
    table: Arc<MembershipTable>,
    transport: Arc<dyn GossipTransport>,
    queue: DisseminationQueue,
    config: NodeConfig,
    seq: AtomicU64,
    round: AtomicU64,
    /// Probes we sent, keyed by sequence number.
    pending_acks: DashMap<u64, oneshot::Sender<()>>,
    /// Probes sent on behalf of another node: our seq -> (requester, their seq, sent at).
    relays: DashMap<u64, (SocketAddr, u64, Instant)>,
    cancel: CancellationToken,
}

impl GossipEngine {
    pub fn new(
        table: Arc<MembershipTable>,
        transport: Arc<dyn GossipTransport>,
        config: NodeConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            table,
            transport,
            queue: DisseminationQueue::new(config.retransmit_mult),
            config,
            seq: AtomicU64::new(1),
            round: AtomicU64::new(0),
            pending_acks: DashMap::new(),
            relays: DashMap::new(),
            cancel,
        })
    }

    pub fn table(&self) -> &Arc<MembershipTable> {
        &self.table
    }

    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!("Starting gossip engine on {}", self.transport.local_addr());

        let receive = {
            let engine = self.clone();
            tokio::spawn(async move { engine.receive_loop().await })
        };
        let gossip = {
            let engine = self.clone();
            tokio::spawn(async move { engine.gossip_loop().await })
        };
        let probe = {
            let engine = self.clone();
            tokio::spawn(async move { engine.probe_loop().await })
        };

        vec![receive, gossip, probe]
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn digest(&self) -> Vec<Member> {
        self.queue.digest(self.config.max_digest)
    }

    async fn send(&self, target: SocketAddr, msg: GossipMessage) {
        if let Err(e) = self.transport.send(target, &msg).await {
            warn!("Failed to send {} to {}: {}", msg.kind(), target, e);
        }
    }

    /// Queues a member record for infection-style re-gossip.
    fn disseminate(&self, member: Member) {
        self.queue.enqueue(member, self.table.len());
    }

    fn apply(&self, members: Vec<Member>) {
        for member in members {
            let id = member.id.clone();
            if self.table.update(member)
                && let Some(current) = self.table.get(&id)
            {
                self.disseminate(current);
            }
        }
    }

    // ============================================================
    // LOOPS
    // ============================================================

    async fn receive_loop(self: Arc<Self>) {
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.transport.recv() => received,
            };
            match received {
                Ok((src, msg)) => self.handle_message(msg, src).await,
                Err(e) => {
                    warn!("Failed to receive gossip message: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
        debug!("Gossip receive loop stopped");
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval());
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.run_gossip_round().await,
            }
        }
        debug!("Gossip round loop stopped");
    }

    async fn probe_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval());
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.probe_round().await,
            }
        }
        debug!("Probe loop stopped");
    }

    // ============================================================
    // ROUNDS
    // ============================================================

    /// One dissemination round.
    pub async fn run_gossip_round(&self) {
        let round = self.round.fetch_add(1, Ordering::Relaxed) + 1;
        let peers = self.table.alive_peers();

        if peers.is_empty() && !self.config.seeds.is_empty() {
            self.join().await;
        }

        let targets: Vec<Member> = peers
            .choose_multiple(&mut rand::thread_rng(), self.config.gossip_fanout)
            .cloned()
            .collect();
        if !targets.is_empty() {
            let digest = self.digest();
            for target in &targets {
                let msg = GossipMessage::Gossip {
                    from: self.table.local_id().clone(),
                    digest: digest.clone(),
                };
                self.send(target.gossip_addr, msg).await;
            }
        }

        if round % self.config.sync_every == 0 {
            self.push_pull_sync(&peers).await;
        }

        for dead in self.table.expire_suspects(self.config.suspect_timeout()) {
            warn!("Member {} declared dead after suspicion timeout", dead.id);
            self.disseminate(dead);
        }

        self.expire_relays();

        let forgotten = self.table.collect_garbage(self.config.dead_retention());
        if forgotten > 0 {
            debug!("Garbage-collected {} departed member(s)", forgotten);
        }
    }

    /// Full-state exchange with one alive peer, and one dead peer so that
    /// healed partitions find each other again.
    async fn push_pull_sync(&self, peers: &[Member]) {
        let members = self.table.members();
        let mut targets: Vec<SocketAddr> = Vec::new();
        if let Some(peer) = peers.choose(&mut rand::thread_rng()) {
            targets.push(peer.gossip_addr);
        }
        if let Some(dead) = self.table.dead_peers().choose(&mut rand::thread_rng()) {
            targets.push(dead.gossip_addr);
        }

        for target in targets {
            let msg = GossipMessage::Sync {
                from: self.table.local_id().clone(),
                members: members.clone(),
                want_reply: true,
            };
            self.send(target, msg).await;
        }
    }

    /// Probes one random peer, falling back to indirect probes before
    /// declaring it suspect.
    pub async fn probe_round(&self) {
        let candidates = self.table.probe_candidates();
        let Some(target) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            return;
        };

        let seq = self.next_seq();
        let (tx, mut rx) = oneshot::channel();
        self.pending_acks.insert(seq, tx);

        let ping = GossipMessage::Ping {
            from: self.table.local_id().clone(),
            seq,
            digest: self.digest(),
        };
        self.send(target.gossip_addr, ping).await;

        let timeout = self.config.probe_timeout();
        if tokio::time::timeout(timeout, &mut rx).await.is_ok() {
            return;
        }

        let helpers: Vec<Member> = self
            .table
            .alive_peers()
            .into_iter()
            .filter(|m| m.id != target.id)
            .collect::<Vec<_>>()
            .choose_multiple(&mut rand::thread_rng(), self.config.indirect_probes)
            .cloned()
            .collect();
        debug!(
            "No ack from {} within {:?}, asking {} peer(s) to probe",
            target.id,
            timeout,
            helpers.len()
        );
        for helper in &helpers {
            let req = GossipMessage::PingReq {
                from: self.table.local_id().clone(),
                seq,
                target: target.gossip_addr,
            };
            self.send(helper.gossip_addr, req).await;
        }

        if !helpers.is_empty() && tokio::time::timeout(timeout, &mut rx).await.is_ok() {
            return;
        }

        self.pending_acks.remove(&seq);
        if let Some(suspect) = self.table.mark_suspect(&target.id) {
            warn!(
                "Node {} at {} suspected (no direct or indirect ack)",
                suspect.id, suspect.gossip_addr
            );
            self.disseminate(suspect);
        }
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    pub async fn join(&self) {
        let local = self.table.local();
        for seed in &self.config.seeds {
            if *seed == local.gossip_addr {
                continue;
            }
            debug!("Sending join request to {}", seed);
            self.send(*seed, GossipMessage::Join { member: local.clone() })
                .await;
        }
    }

    /// Announces our departure directly to every alive peer so they drop us
    /// from placement without waiting for the failure detector.
    pub async fn leave(&self) {
        let left = self.table.mark_left_local();
        info!("Leaving cluster (inc={})", left.incarnation);

        let peers = self.table.alive_peers();
        for peer in peers {
            let msg = GossipMessage::Gossip {
                from: left.id.clone(),
                digest: vec![left.clone()],
            };
            self.send(peer.gossip_addr, msg).await;
        }
    }

    // ============================================================
    // MESSAGE HANDLING
    // ============================================================

    pub async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) {
        debug!("Received {} from {}", msg.kind(), src);
        match msg {
            GossipMessage::Ping { seq, digest, .. } => {
                self.apply(digest);
                let ack = GossipMessage::Ack {
                    from: self.table.local_id().clone(),
                    seq,
                    digest: self.digest(),
                };
                self.send(src, ack).await;
            }

            GossipMessage::Ack { seq, digest, .. } => {
                self.apply(digest);
                self.handle_ack(seq).await;
            }

            GossipMessage::PingReq { seq, target, .. } => {
                self.handle_ping_req(src, seq, target).await;
            }

            GossipMessage::Gossip { digest, .. } => {
                self.apply(digest);
                let reply = GossipMessage::GossipReply {
                    from: self.table.local_id().clone(),
                    digest: self.digest(),
                };
                self.send(src, reply).await;
            }

            GossipMessage::GossipReply { digest, .. } => {
                self.apply(digest);
            }

            GossipMessage::Join { member } => {
                info!("Node {} joining cluster at {}", member.id, member.gossip_addr);
                let reply_to = member.gossip_addr;
                self.apply(vec![member]);
                let sync = GossipMessage::Sync {
                    from: self.table.local_id().clone(),
                    members: self.table.members(),
                    want_reply: false,
                };
                self.send(reply_to, sync).await;
                info!("Cluster size now: {}", self.table.len());
            }

            GossipMessage::Sync {
                members,
                want_reply,
                ..
            } => {
                self.apply(members);
                if want_reply {
                    let sync = GossipMessage::Sync {
                        from: self.table.local_id().clone(),
                        members: self.table.members(),
                        want_reply: false,
                    };
                    self.send(src, sync).await;
                }
            }
        }
    }

    async fn handle_ack(&self, seq: u64) {
        if let Some((_, tx)) = self.pending_acks.remove(&seq) {
            let _ = tx.send(());
            return;
        }
        if let Some((_, (requester, their_seq, _))) = self.relays.remove(&seq) {
            let ack = GossipMessage::Ack {
                from: self.table.local_id().clone(),
                seq: their_seq,
                digest: self.digest(),
            };
            self.send(requester, ack).await;
        }
    }

    async fn handle_ping_req(&self, requester: SocketAddr, their_seq: u64, target: SocketAddr) {
        let seq = self.next_seq();
        self.relays
            .insert(seq, (requester, their_seq, Instant::now()));

        let ping = GossipMessage::Ping {
            from: self.table.local_id().clone(),
            seq,
            digest: self.digest(),
        };
        self.send(target, ping).await;
    }

    /// Relays whose target never answered.
    fn expire_relays(&self) {
        let ttl = self.config.probe_timeout() * 2;
        self.relays.retain(|_, (_, _, since)| since.elapsed() < ttl);
    }
}
