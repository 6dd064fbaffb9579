//! Node configuration.
//!
//! Values come from an optional TOML file and are then overridden by CLI
//! flags in `main.rs`. Every duration is expressed in milliseconds.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{KvError, KvResult};

/// How many owner acknowledgments an operation needs before it succeeds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// Any single responsive owner.
    #[default]
    Any,
    /// A strict majority of the owner set.
    Quorum,
    /// Every owner.
    All,
}

impl AckPolicy {
    pub fn required(&self, owners: usize) -> usize {
        match self {
            AckPolicy::Any => owners.min(1),
            AckPolicy::Quorum => owners / 2 + 1,
            AckPolicy::All => owners,
        }
    }
}

impl std::str::FromStr for AckPolicy {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" | "one" => Ok(AckPolicy::Any),
            "quorum" => Ok(AckPolicy::Quorum),
            "all" => Ok(AckPolicy::All),
            other => Err(KvError::InvalidConfig(format!("unknown ack policy {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// UDP address used for gossip.
    pub bind: SocketAddr,
    /// HTTP address for client and replica traffic. Defaults to `bind` port + 1000.
    pub http: Option<SocketAddr>,
    pub seeds: Vec<SocketAddr>,

    pub replication_factor: usize,
    pub virtual_nodes: usize,
    pub write_acks: AckPolicy,
    pub read_acks: AckPolicy,

    pub gossip_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub suspect_timeout_ms: u64,
    pub dead_retention_ms: u64,
    pub request_timeout_ms: u64,
    pub tombstone_grace_ms: u64,
    pub maintenance_interval_ms: u64,

    pub gossip_fanout: usize,
    pub indirect_probes: usize,
    pub max_digest: usize,
    pub retransmit_mult: u32,
    pub sync_every: u64,
    pub repair_attempts: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            http: None,
            seeds: Vec::new(),
            replication_factor: 2,
            virtual_nodes: 64,
            write_acks: AckPolicy::Any,
            read_acks: AckPolicy::Any,
            gossip_interval_ms: 200,
            probe_timeout_ms: 100,
            suspect_timeout_ms: 2_000,
            dead_retention_ms: 30_000,
            request_timeout_ms: 500,
            tombstone_grace_ms: 60_000,
            maintenance_interval_ms: 1_000,
            gossip_fanout: 3,
            indirect_probes: 3,
            max_digest: 16,
            retransmit_mult: 3,
            sync_every: 10,
            repair_attempts: 3,
        }
    }
}

impl NodeConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http
            .unwrap_or_else(|| SocketAddr::new(self.bind.ip(), self.bind.port() + 1000))
    }

    pub fn validate(&self) -> KvResult<()> {
        let checks = [
            ("replication_factor", self.replication_factor as u64),
            ("virtual_nodes", self.virtual_nodes as u64),
            ("gossip_interval_ms", self.gossip_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("suspect_timeout_ms", self.suspect_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("maintenance_interval_ms", self.maintenance_interval_ms),
            ("gossip_fanout", self.gossip_fanout as u64),
            ("max_digest", self.max_digest as u64),
            ("retransmit_mult", self.retransmit_mult as u64),
            ("sync_every", self.sync_every),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(KvError::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        if self.bind.port() > u16::MAX - 1000 && self.http.is_none() {
            return Err(KvError::InvalidConfig(
                "bind port too high to derive an http port; set `http` explicitly".into(),
            ));
        }
        Ok(())
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn suspect_timeout(&self) -> Duration {
        Duration::from_millis(self.suspect_timeout_ms)
    }

    pub fn dead_retention(&self) -> Duration {
        Duration::from_millis(self.dead_retention_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_policy_required() {
        assert_eq!(AckPolicy::Any.required(3), 1);
        assert_eq!(AckPolicy::Any.required(0), 0);
        assert_eq!(AckPolicy::Quorum.required(3), 2);
        assert_eq!(AckPolicy::Quorum.required(2), 2);
        assert_eq!(AckPolicy::All.required(3), 3);
    }

    #[test]
    fn test_ack_policy_parse() {
        assert_eq!("quorum".parse::<AckPolicy>().unwrap(), AckPolicy::Quorum);
        assert_eq!("ALL".parse::<AckPolicy>().unwrap(), AckPolicy::All);
        assert!("most".parse::<AckPolicy>().is_err());
    }

    #[test]
    fn test_http_addr_defaults_to_bind_plus_1000() {
        let config = NodeConfig {
            bind: "127.0.0.1:5000".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(config.http_addr().port(), 6000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            bind = "10.0.0.1:7000"
            seeds = ["10.0.0.2:7000"]
            replication_factor = 3
            write_acks = "quorum"
            "#,
        )
        .unwrap();

        assert_eq!(config.replication_factor, 3);
        assert_eq!(config.write_acks, AckPolicy::Quorum);
        assert_eq!(config.seeds.len(), 1);
        assert_eq!(config.virtual_nodes, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = NodeConfig {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(KvError::InvalidConfig(_))));
    }
}
