//! Ring / Placement Module
//!
//! Maps keys to an ordered owner list (primary first, then replicas).
//!
//! ## Core Concepts
//! - **Consistent hashing**: each node places `virtual_nodes` tokens on a 64-bit ring
//!   (blake3 of `"{node_id}#{i}"`). A key's primary owns the first token clockwise of the
//!   key's hash; replicas are the next distinct physical nodes.
//! - **Bounded churn**: a single join or leave only changes owner lists that contain the
//!   node in question.
//! - **Copy-on-write snapshots**: `RingSnapshot` is immutable and shared via `Arc`;
//!   `PlacementManager` swaps in a new one whenever the alive set changes.

pub mod placement;
pub mod snapshot;

pub use placement::PlacementManager;
pub use snapshot::{RingSnapshot, ring_position};
