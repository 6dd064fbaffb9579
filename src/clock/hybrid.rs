use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::version::VersionStamp;
use crate::membership::types::NodeId;

/// Low bits of a tick reserved for the logical counter.
const LOGICAL_BITS: u32 = 16;

/// Issues version stamps for writes coordinated by this node.
///
/// Ticks are hybrid logical timestamps: wall-clock milliseconds in the high
/// bits, a logical counter in the low bits. A tick is always strictly greater
/// than every tick previously issued or observed, so the local component
/// never goes backwards when the wall clock does, and seeding from the wall
/// clock keeps it increasing across restarts.
pub struct VersionClock {
    node_id: NodeId,
    last: AtomicU64,
}

impl VersionClock {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            last: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn tick(&self) -> u64 {
        let wall = wall_ms() << LOGICAL_BITS;
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        wall.max(prev + 1)
    }

    /// Stamp for a new write that causally follows `base`.
    pub fn next(&self, base: &VersionStamp) -> VersionStamp {
        self.observe(base);
        let tick = self.tick();
        let mut stamp = base.clone();
        stamp.set(self.node_id.clone(), tick);
        stamp
    }

    /// Advance past every counter carried by a stamp received from elsewhere.
    pub fn observe(&self, stamp: &VersionStamp) {
        self.last.fetch_max(stamp.max_counter(), Ordering::AcqRel);
    }

    pub fn last_tick(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
