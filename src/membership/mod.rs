//! Membership Module
//!
//! Per-node view of the cluster topology, driven by the gossip engine (inspired by SWIM).
//!
//! ## Core Mechanisms
//! - **Member states**: `Alive -> Suspect -> Dead`, plus `Left` for graceful departures.
//! - **Incarnation Numbers**: higher incarnation wins; at equal incarnation the worse state
//!   wins (`Left > Dead > Suspect > Alive`). A node told it is suspect bumps its own
//!   incarnation and re-asserts `Alive`.
//! - **Garbage collection**: Dead/Left members are forgotten after a retention window and
//!   stale gossip about them is ignored afterwards.
//! - **Alive epoch**: a `watch` channel that ticks whenever the alive set changes, which is
//!   what the placement ring keys its snapshots on.

pub mod table;
pub mod types;

pub use table::MembershipTable;
pub use types::{Member, NodeId, NodeState};
