use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::membership::types::{Member, NodeId};

/// The wire protocol for membership traffic between nodes.
///
/// - `Ping/Ack`: direct failure detection; both carry a piggybacked digest.
/// - `PingReq`: asks a peer to probe `target` on our behalf and relay the Ack.
/// - `Gossip/GossipReply`: digest exchange with a random peer.
/// - `Join`: sent by new nodes to seed nodes to enter the cluster.
/// - `Sync`: full-state push-pull used for joins and periodic anti-entropy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        seq: u64,
        digest: Vec<Member>,
    },

    Ack {
        from: NodeId,
        seq: u64,
        digest: Vec<Member>,
    },

    PingReq {
        from: NodeId,
        seq: u64,
        target: SocketAddr,
    },

    Gossip {
        from: NodeId,
        digest: Vec<Member>,
    },

    GossipReply {
        from: NodeId,
        digest: Vec<Member>,
    },

    Join {
        member: Member,
    },

    Sync {
        from: NodeId,
        members: Vec<Member>,
        want_reply: bool,
    },
}

impl GossipMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            GossipMessage::Ping { .. } => "ping",
            GossipMessage::Ack { .. } => "ack",
            GossipMessage::PingReq { .. } => "ping-req",
            GossipMessage::Gossip { .. } => "gossip",
            GossipMessage::GossipReply { .. } => "gossip-reply",
            GossipMessage::Join { .. } => "join",
            GossipMessage::Sync { .. } => "sync",
        }
    }
}
