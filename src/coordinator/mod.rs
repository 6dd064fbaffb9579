//! Coordinator Module
//!
//! Any node can coordinate any client operation.
//!
//! ## Write path
//! 1. Resolve the owner set from the current ring snapshot.
//! 2. Stamp a new version that causally follows the locally stored one.
//! 3. Send the entry to every owner in parallel (local owners are applied in-process).
//! 4. Return once the write ack policy is met; owners that failed keep being retried
//!    in the background with exponential backoff.
//!
//! ## Read path
//! 1. Query every owner in parallel until all replied or the deadline passed.
//! 2. Drop dominated versions, merge concurrent survivors with the merge policy.
//! 3. Push the merged entry to replicas that returned a stale, concurrent or missing copy.
//!
//! A `Superseded` reply counts as an acknowledgment: the replica already holds
//! something at least as new.

pub mod replica;
pub mod service;
pub mod types;

pub use replica::ReplicaClient;
pub use service::Coordinator;
pub use types::{CoordinatorSettings, HandOffReport, ReadOutcome, WriteOutcome};

#[cfg(test)]
mod tests;
