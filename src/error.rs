//! Error taxonomy surfaced to clients of the coordinator.
//!
//! Conflicts and stale writes are deliberately absent: a merged read and a
//! superseded write are both successful outcomes (see `ReadOutcome` and
//! `PutOutcome`).

use thiserror::Error;

pub type KvResult<T> = std::result::Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
    /// No owner of the key could be reached.
    #[error("no reachable owner for key {key:?}")]
    Unavailable { key: String },

    /// The acknowledgment threshold was not met before the deadline. The write
    /// may still have been applied on `acked` owners.
    #[error("timed out waiting for acknowledgments: {acked}/{required}")]
    Timeout { acked: usize, required: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl KvError {
    /// A timed out write that reached at least one owner has an unknown outcome.
    pub fn is_uncertain(&self) -> bool {
        matches!(self, KvError::Timeout { acked, .. } if *acked > 0)
    }
}

impl From<bincode::Error> for KvError {
    fn from(e: bincode::Error) -> Self {
        KvError::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        KvError::Codec(e.to_string())
    }
}
