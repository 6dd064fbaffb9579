//! HTTP surface of a node: the client KV API, the internal replica endpoints
//! used by coordinators, and a membership listing.

pub mod client;
pub mod handlers;
pub mod protocol;

pub use client::HttpReplicaClient;
pub use handlers::router;
