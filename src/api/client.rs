use async_trait::async_trait;
use std::time::Duration;

use super::protocol::{
    ENDPOINT_ENTRY, ENDPOINT_REPLICATE, FetchResponse, ReplicateRequest, ReplicateResponse,
};
use crate::coordinator::ReplicaClient;
use crate::error::{KvError, KvResult};
use crate::membership::types::Member;
use crate::storage::{Entry, PutOutcome};

/// `ReplicaClient` over the internal HTTP endpoints.
pub struct HttpReplicaClient {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpReplicaClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
        }
    }
}

fn transport(target: &Member, e: reqwest::Error) -> KvError {
    KvError::Transport(format!("{} at {}: {}", target.id, target.http_addr, e))
}

#[async_trait]
impl ReplicaClient for HttpReplicaClient {
    async fn replicate(&self, target: &Member, entry: &Entry) -> KvResult<PutOutcome> {
        let url = format!("http://{}{}", target.http_addr, ENDPOINT_REPLICATE);
        let response = self
            .http_client
            .post(url)
            .json(&ReplicateRequest {
                entry: entry.clone(),
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport(target, e))?
            .error_for_status()
            .map_err(|e| transport(target, e))?;

        let body: ReplicateResponse = response.json().await.map_err(|e| transport(target, e))?;
        Ok(body.outcome)
    }

    async fn fetch(&self, target: &Member, key: &str) -> KvResult<Option<Entry>> {
        let url = format!("http://{}{}", target.http_addr, ENDPOINT_ENTRY);
        let response = self
            .http_client
            .get(url)
            .query(&[("key", key)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport(target, e))?
            .error_for_status()
            .map_err(|e| transport(target, e))?;

        let body: FetchResponse = response.json().await.map_err(|e| transport(target, e))?;
        Ok(body.entry)
    }
}
