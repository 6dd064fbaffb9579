//! Local Storage Module
//!
//! The replica-side half of the key-value store: what one node keeps for the keys it owns.
//!
//! ## Core Concepts
//! - **Entry**: value bytes plus a `VersionStamp`, a tombstone flag and an optional expiry.
//! - **Versioned writes**: `put` only applies versions that are not already covered, which
//!   makes replication and read-repair idempotent.
//! - **Tombstones**: deletes are writes. A tombstone is kept for a grace period so that it
//!   wins against stale replicas during read-repair, then purged.
//! - **Merge policy**: concurrent versions are resolved deterministically (`LastWriterWins`
//!   by default).

pub mod memory;
pub mod merge;
pub mod types;

pub use memory::LocalStore;
pub use merge::{LastWriterWins, MergePolicy, Resolution, reconcile};
pub use types::{Entry, PutOutcome, now_ms};
