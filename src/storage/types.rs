use serde::{Deserialize, Serialize};

use crate::clock::VersionStamp;

/// A versioned value held by one replica.
///
/// Tombstones keep the version of the delete so it can be merged against
/// concurrent writes; their `expiry` marks the end of the grace period after
/// which the entry may be physically purged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    pub version: VersionStamp,
    pub tombstone: bool,
    /// Unix milliseconds.
    pub expiry: Option<u64>,
}

impl Entry {
    pub fn live(key: String, value: Vec<u8>, version: VersionStamp, expiry: Option<u64>) -> Self {
        Self {
            key,
            value,
            version,
            tombstone: false,
            expiry,
        }
    }

    pub fn tombstone(key: String, version: VersionStamp, expiry: u64) -> Self {
        Self {
            key,
            value: Vec::new(),
            version,
            tombstone: true,
            expiry: Some(expiry),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry.is_some_and(|expiry| now >= expiry)
    }

    /// Whether a client read should see this entry.
    pub fn is_visible(&self, now: u64) -> bool {
        !self.tombstone && !self.is_expired(now)
    }
}

/// Result of applying a write to a replica.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PutOutcome {
    Applied,
    /// The stored version already covers the incoming one. Not an error.
    Superseded,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
