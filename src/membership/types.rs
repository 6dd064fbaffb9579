use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Health state of a member.
///
/// The declaration order is the precedence used when two assertions carry
/// the same incarnation: `Left > Dead > Suspect > Alive`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
    Left,
}

impl NodeState {
    /// Dead and Left members are excluded from placement and probing.
    pub fn is_gone(&self) -> bool {
        matches!(self, NodeState::Dead | NodeState::Left)
    }
}

/// Represents a single member in the cluster.
///
/// Contains identity, network addressing, and current lifecycle state.
/// The `incarnation` field is a logical clock owned by the member itself: only
/// the member bumps it, which is how it refutes a false "Suspect" or "Dead".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    /// Local instant of the last accepted change; never leaves the process.
    #[serde(skip)]
    pub last_updated: Option<Instant>,
}

impl Member {
    pub fn new(id: NodeId, gossip_addr: SocketAddr, http_addr: SocketAddr) -> Self {
        Self {
            id,
            gossip_addr,
            http_addr,
            state: NodeState::Alive,
            incarnation: 1,
            last_updated: Some(Instant::now()),
        }
    }

    /// Whether an assertion `self` should replace what we know as `other`.
    pub fn supersedes(&self, other: &Member) -> bool {
        if self.incarnation != other.incarnation {
            return self.incarnation > other.incarnation;
        }
        self.state > other.state
    }
}
