//! Gossip Module
//!
//! SWIM-style membership dissemination and failure detection over UDP.
//!
//! ## Protocol
//! - **Probing**: each round one random peer gets a `Ping`. Without an `Ack` within the
//!   probe timeout, `PingReq` asks other peers to probe it for us. Still nothing and the
//!   peer becomes `Suspect`; it is declared `Dead` if it does not refute in time.
//! - **Dissemination**: changed member records are piggybacked on every message for a
//!   bounded number of transmissions (`DisseminationQueue`).
//! - **Anti-entropy**: periodic push-pull `Sync` of the full table with one random peer.
//! - **Join / Leave**: new nodes send `Join` to the seeds; leaving nodes announce `Left`.

pub mod dissemination;
pub mod engine;
pub mod transport;
pub mod types;

pub use dissemination::DisseminationQueue;
pub use engine::GossipEngine;
pub use transport::{GossipTransport, UdpTransport};
pub use types::GossipMessage;
