//! HTTP Protocol
//!
//! Endpoints and Data Transfer Objects for client traffic and for the
//! internode replica calls. Bodies are JSON except for client values, which
//! travel as raw bytes.

use serde::{Deserialize, Serialize};

use crate::clock::VersionStamp;
use crate::membership::types::{Member, NodeId};
use crate::storage::{Entry, PutOutcome};

// --- API Endpoints ---

/// Public endpoint for Set / Get / Delete; the key follows as a path segment.
pub const ENDPOINT_KV: &str = "/kv";
/// Internal endpoint applying an entry to the receiver's local store.
pub const ENDPOINT_REPLICATE: &str = "/internal/replicate";
/// Internal endpoint returning the receiver's raw local entry (`?key=`).
pub const ENDPOINT_ENTRY: &str = "/internal/entry";
/// The local membership table.
pub const ENDPOINT_MEMBERS: &str = "/cluster/members";

// --- Data Transfer Objects ---

#[derive(Debug, Default, Deserialize)]
pub struct PutParams {
    /// Time to live in milliseconds.
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct EntryParams {
    pub key: String,
}

/// Reply to a client Set or Delete.
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    pub version: Option<VersionStamp>,
    pub acked: usize,
    pub required: usize,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub entry: Entry,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub outcome: PutOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchResponse {
    pub entry: Option<Entry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembersResponse {
    pub local: NodeId,
    pub members: Vec<Member>,
}
