//! Node assembly.
//!
//! Wires the membership table, gossip engine, placement manager, local store
//! and coordinator of one process together and owns their background tasks.

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{self, HttpReplicaClient};
use crate::config::NodeConfig;
use crate::coordinator::{Coordinator, CoordinatorSettings, ReplicaClient};
use crate::error::KvResult;
use crate::gossip::{GossipEngine, GossipTransport, UdpTransport};
use crate::membership::{Member, MembershipTable, NodeId, NodeState};
use crate::ring::PlacementManager;
use crate::storage::{LocalStore, now_ms};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

pub struct Node {
    config: NodeConfig,
    table: Arc<MembershipTable>,
    engine: Arc<GossipEngine>,
    placement: Arc<PlacementManager>,
    store: Arc<LocalStore>,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Binds the UDP gossip socket and builds an HTTP replica client.
    pub async fn bind(config: NodeConfig) -> anyhow::Result<Arc<Self>> {
        let transport = Arc::new(UdpTransport::bind(config.bind).await?);
        let client = Arc::new(HttpReplicaClient::new(config.request_timeout()));
        Ok(Self::new(config, transport, client)?)
    }

    pub fn new(
        config: NodeConfig,
        transport: Arc<dyn GossipTransport>,
        client: Arc<dyn ReplicaClient>,
    ) -> KvResult<Arc<Self>> {
        Self::with_id(NodeId::new(), config, transport, client)
    }

    pub fn with_id(
        id: NodeId,
        config: NodeConfig,
        transport: Arc<dyn GossipTransport>,
        client: Arc<dyn ReplicaClient>,
    ) -> KvResult<Arc<Self>> {
        config.validate()?;

        let local = Member::new(id.clone(), transport.local_addr(), config.http_addr());
        let table = Arc::new(MembershipTable::new(local));
        let cancel = CancellationToken::new();

        let engine = GossipEngine::new(table.clone(), transport, config.clone(), cancel.clone());
        let placement = Arc::new(PlacementManager::new(
            table.clone(),
            config.virtual_nodes,
            config.replication_factor,
        ));
        let store = Arc::new(LocalStore::default());
        let coordinator = Coordinator::new(
            id,
            store.clone(),
            placement.clone(),
            client,
            CoordinatorSettings::from(&config),
        );

        Ok(Arc::new(Self {
            config,
            table,
            engine,
            placement,
            store,
            coordinator,
            cancel,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> &NodeId {
        self.table.local_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<MembershipTable> {
        &self.table
    }

    pub fn engine(&self) -> &Arc<GossipEngine> {
        &self.engine
    }

    pub fn placement(&self) -> &Arc<PlacementManager> {
        &self.placement
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn router(&self) -> Router {
        api::router(self.coordinator.clone(), self.table.clone())
    }

    /// Starts gossip and maintenance. `Join` goes to the seeds right away and
    /// is resent every gossip round until another member is known.
    pub async fn start(self: &Arc<Self>) {
        let local = self.table.local();
        info!(
            "Node {} starting (gossip {}, http {})",
            local.id, local.gossip_addr, local.http_addr
        );
        if self.config.seeds.is_empty() {
            info!("No seeds configured, starting as founder");
        } else {
            self.engine.join().await;
        }

        let mut handles = self.engine.start();
        let node = self.clone();
        handles.push(tokio::spawn(async move { node.maintenance_loop().await }));
        self.tasks.lock().await.extend(handles);
    }

    /// Announces departure, then stops every loop.
    pub async fn shutdown(&self) {
        self.engine.leave().await;
        self.halt().await;
        info!("Node {} stopped", self.id());
    }

    /// Stops every loop without telling the cluster, as a crash would.
    pub async fn halt(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut alive = self.table.subscribe();
        let mut purge = tokio::time::interval(self.config.maintenance_interval());
        let mut stats = tokio::time::interval(STATS_INTERVAL);
        let mut handed_off = self.placement.current().membership_epoch;
        let mut hand_off: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = alive.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = purge.tick() => {
                    let purged = self.store.purge_expired(now_ms());
                    if purged > 0 {
                        debug!("Purged {} expired entries", purged);
                    }
                }
                _ = stats.tick() => self.log_stats(),
            }

            // One pass at a time; a change seen mid-pass is picked up on a later tick.
            let ring = self.placement.current();
            let idle = hand_off.as_ref().is_none_or(|pass| pass.is_finished());
            if ring.membership_epoch != handed_off && idle {
                handed_off = ring.membership_epoch;
                info!(
                    "Ring changed (epoch {}, {} alive member(s)), handing off entries",
                    ring.epoch,
                    ring.node_count()
                );
                let coordinator = self.coordinator.clone();
                hand_off = Some(tokio::spawn(async move {
                    coordinator.hand_off().await;
                }));
            }
        }
        if let Some(pass) = hand_off {
            pass.abort();
        }
        debug!("Maintenance loop stopped");
    }

    fn log_stats(&self) {
        let members = self.table.members();
        let count = |state: NodeState| members.iter().filter(|m| m.state == state).count();
        info!(
            "Cluster stats: alive={} suspect={} dead={} left={} entries={} ring_epoch={}",
            count(NodeState::Alive),
            count(NodeState::Suspect),
            count(NodeState::Dead),
            count(NodeState::Left),
            self.store.len(),
            self.placement.current().epoch
        );
    }
}
