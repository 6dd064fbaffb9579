//! Distributed Key-Value Cluster Library
//!
//! An in-memory key-value store that stays available through node churn and
//! network partitions, trading strict consistency for availability. Any node
//! accepts Set / Get / Delete; replicas converge through version merging,
//! read-repair and hand-off.
//!
//! ## Architecture Modules
//! - **`storage`**: Per-node versioned entries with tombstones, TTL and a pluggable
//!   merge policy for concurrent writes.
//! - **`clock`**: Vector-clock version stamps whose counters are hybrid logical ticks.
//! - **`membership`**: The local view of the cluster and the incarnation rules that
//!   decide between conflicting assertions.
//! - **`gossip`**: SWIM-style failure detection and dissemination over UDP.
//! - **`ring`**: Consistent hashing with virtual nodes; maps keys to owner lists.
//! - **`coordinator`**: Fans client operations out to owners, reconciles replies and
//!   repairs stale replicas.
//! - **`api`**: HTTP endpoints for clients and for replica traffic between nodes.
//! - **`node`**: Assembles the above and runs the background loops.

pub mod api;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gossip;
pub mod membership;
pub mod node;
pub mod ring;
pub mod storage;

#[cfg(test)]
mod testing;
