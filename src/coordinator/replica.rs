use async_trait::async_trait;

use crate::error::KvResult;
use crate::membership::types::Member;
use crate::storage::{Entry, PutOutcome};

/// Calls into another node's local store.
///
/// Implementations should fail fast when the target is unreachable; the
/// coordinator additionally bounds every call with its request timeout.
#[async_trait]
pub trait ReplicaClient: Send + Sync + 'static {
    /// Applies `entry` to the target's local store.
    async fn replicate(&self, target: &Member, entry: &Entry) -> KvResult<PutOutcome>;

    /// Raw local entry on the target, tombstones included.
    async fn fetch(&self, target: &Member, key: &str) -> KvResult<Option<Entry>>;
}
