use serde::Serialize;
use std::time::Duration;

use crate::clock::VersionStamp;
use crate::config::{AckPolicy, NodeConfig};

/// Result of a successful Set or Delete.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub version: VersionStamp,
    pub acked: usize,
    pub required: usize,
}

/// Result of a successful Get.
///
/// `value` is `None` when the key is absent, deleted or expired.
#[derive(Debug, Clone, Default)]
pub struct ReadOutcome {
    pub value: Option<Vec<u8>>,
    pub version: Option<VersionStamp>,
    /// More than one concurrent version had to be merged.
    pub conflict_resolved: bool,
}

impl ReadOutcome {
    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }
}

/// What one hand-off pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandOffReport {
    pub pushed: usize,
    pub failed: usize,
    /// Local copies dropped because this node no longer owns the key.
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub write_acks: AckPolicy,
    pub read_acks: AckPolicy,
    pub request_timeout: Duration,
    pub tombstone_grace_ms: u64,
    pub repair_attempts: usize,
}

impl From<&NodeConfig> for CoordinatorSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            write_acks: config.write_acks,
            read_acks: config.read_acks,
            request_timeout: config.request_timeout(),
            tombstone_grace_ms: config.tombstone_grace_ms,
            repair_attempts: config.repair_attempts,
        }
    }
}
