//! Version Clock Module
//!
//! Causality metadata attached to every stored value.
//!
//! ## Core Concepts
//! - **VersionStamp**: a vector clock (`NodeId -> counter`). Two stamps are either ordered
//!   or concurrent; `compare` keeps that distinction for the merge policy.
//! - **VersionClock**: per-node issuer of hybrid logical ticks used as vector clock counters.
//!   The highest `(tick, node)` pair of a stamp is its last-writer-wins key.

pub mod hybrid;
pub mod version;

pub use hybrid::VersionClock;
pub use version::{Causality, VersionStamp};
