//! In-process cluster harness.
//!
//! `SimNetwork` routes gossip datagrams through channels and replica calls
//! straight into the target's coordinator. Addresses can be taken down to
//! simulate crashed or partitioned nodes; traffic to or from a down address
//! is dropped (gossip) or fails fast (replica calls).

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use crate::config::NodeConfig;
use crate::coordinator::{Coordinator, ReplicaClient};
use crate::error::{KvError, KvResult};
use crate::gossip::{GossipMessage, GossipTransport};
use crate::membership::{Member, NodeId};
use crate::node::Node;
use crate::storage::{Entry, PutOutcome};

type Datagram = (SocketAddr, Vec<u8>);

#[derive(Default)]
pub struct SimNetwork {
    mailboxes: DashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    replicas: DashMap<SocketAddr, Arc<Coordinator>>,
    down: DashSet<SocketAddr>,
    blocked: DashSet<(SocketAddr, SocketAddr)>,
    latency: DashMap<SocketAddr, Duration>,
}

impl SimNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, addr: SocketAddr) -> Arc<SimGossipTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.insert(addr, tx);
        Arc::new(SimGossipTransport {
            addr,
            net: self.clone(),
            inbox: Mutex::new(rx),
        })
    }

    pub fn client(self: &Arc<Self>, from: SocketAddr) -> Arc<SimReplicaClient> {
        Arc::new(SimReplicaClient {
            from,
            net: self.clone(),
        })
    }

    pub fn register(&self, node: &Node) {
        let local = node.table().local();
        self.replicas
            .insert(local.http_addr, node.coordinator().clone());
    }

    pub fn set_down(&self, member: &Member, down: bool) {
        for addr in [member.gossip_addr, member.http_addr] {
            if down {
                self.down.insert(addr);
            } else {
                self.down.remove(&addr);
            }
        }
    }

    pub fn is_down(&self, addr: &SocketAddr) -> bool {
        self.down.contains(addr)
    }

    /// Drops gossip between two addresses in both directions.
    pub fn block_link(&self, a: SocketAddr, b: SocketAddr) {
        self.blocked.insert((a, b));
        self.blocked.insert((b, a));
    }

    /// Delays every replica call to `member` by `delay`.
    pub fn set_latency(&self, member: &Member, delay: Duration) {
        self.latency.insert(member.http_addr, delay);
    }

    fn delivers(&self, from: &SocketAddr, to: &SocketAddr) -> bool {
        !self.is_down(from) && !self.is_down(to) && !self.blocked.contains(&(*from, *to))
    }
}

pub struct SimGossipTransport {
    addr: SocketAddr,
    net: Arc<SimNetwork>,
    inbox: Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

#[async_trait]
impl GossipTransport for SimGossipTransport {
    async fn send(&self, target: SocketAddr, msg: &GossipMessage) -> Result<()> {
        if !self.net.delivers(&self.addr, &target) {
            return Ok(());
        }
        let encoded = bincode::serialize(msg)?;
        if let Some(mailbox) = self.net.mailboxes.get(&target) {
            let _ = mailbox.send((self.addr, encoded));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(SocketAddr, GossipMessage)> {
        let mut inbox = self.inbox.lock().await;
        loop {
            let (src, bytes) = inbox.recv().await.ok_or_else(|| anyhow!("mailbox closed"))?;
            if self.net.is_down(&self.addr) {
                continue;
            }
            return Ok((src, bincode::deserialize(&bytes)?));
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

pub struct SimReplicaClient {
    from: SocketAddr,
    net: Arc<SimNetwork>,
}

impl SimReplicaClient {
    async fn reach(&self, target: &Member) -> KvResult<Arc<Coordinator>> {
        let delay = self.net.latency.get(&target.http_addr).map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.net.is_down(&self.from) || self.net.is_down(&target.http_addr) {
            return Err(KvError::Transport(format!("{} unreachable", target.id)));
        }
        self.net
            .replicas
            .get(&target.http_addr)
            .map(|c| c.value().clone())
            .ok_or_else(|| KvError::Transport(format!("no replica at {}", target.http_addr)))
    }
}

#[async_trait]
impl ReplicaClient for SimReplicaClient {
    async fn replicate(&self, target: &Member, entry: &Entry) -> KvResult<PutOutcome> {
        let coordinator = self.reach(target).await?;
        let wire: Entry = serde_json::from_slice(&serde_json::to_vec(entry)?)?;
        Ok(coordinator.apply_replica(wire))
    }

    async fn fetch(&self, target: &Member, key: &str) -> KvResult<Option<Entry>> {
        Ok(self.reach(target).await?.read_replica(key))
    }
}

// ============================================================
// CLUSTER HELPERS
// ============================================================

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Fast timers so paused-clock tests converge in few simulated seconds.
pub fn test_config(port: u16, seeds: Vec<SocketAddr>, replication_factor: usize) -> NodeConfig {
    NodeConfig {
        bind: addr(port),
        http: Some(addr(port + 1000)),
        seeds,
        replication_factor,
        virtual_nodes: 32,
        gossip_interval_ms: 50,
        probe_timeout_ms: 20,
        suspect_timeout_ms: 300,
        dead_retention_ms: 5_000,
        request_timeout_ms: 100,
        maintenance_interval_ms: 100,
        sync_every: 4,
        ..NodeConfig::default()
    }
}

pub fn build_node(net: &Arc<SimNetwork>, name: &str, config: NodeConfig) -> Arc<Node> {
    let transport = net.transport(config.bind);
    let client = net.client(config.http_addr());
    let node = Node::with_id(NodeId::from(name), config, transport, client)
        .expect("valid test config");
    net.register(&node);
    node
}

/// Starts `n` nodes on ports 7000.. with the first as the seed of the
/// others, and waits until every node sees all of them alive.
pub async fn spawn_cluster(net: &Arc<SimNetwork>, n: usize, replication_factor: usize) -> Vec<Arc<Node>> {
    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let port = 7000 + i as u16;
        let seeds = if i == 0 { Vec::new() } else { vec![addr(7000)] };
        let node = build_node(net, &format!("node-{}", i + 1), test_config(port, seeds, replication_factor));
        node.start().await;
        nodes.push(node);
    }

    let converged = wait_until(Duration::from_secs(10), || {
        nodes.iter().all(|node| node.table().snapshot().len() == n)
    })
    .await;
    assert!(converged, "cluster of {n} did not converge");
    nodes
}

/// Polls `check` on the (usually paused) tokio clock.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Crashes a node: its loops stop and the network drops its traffic.
pub async fn kill(net: &SimNetwork, node: &Node) {
    net.set_down(&node.table().local(), true);
    node.halt().await;
}
