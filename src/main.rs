use clap::Parser;
use distributed_kv::config::{AckPolicy, NodeConfig};
use distributed_kv::node::Node;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// One node of the key-value cluster.
#[derive(Debug, Parser)]
#[command(name = "kv-node", version)]
struct Cli {
    /// UDP address for gossip, e.g. 127.0.0.1:5000
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// HTTP address for clients and replicas (default: gossip port + 1000)
    #[arg(long)]
    http: Option<SocketAddr>,

    /// Gossip address of an existing member; repeatable
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    #[arg(long)]
    replication_factor: Option<usize>,

    #[arg(long)]
    virtual_nodes: Option<usize>,

    /// any | quorum | all
    #[arg(long)]
    write_acks: Option<AckPolicy>,

    /// any | quorum | all
    #[arg(long)]
    read_acks: Option<AckPolicy>,

    /// TOML file with any `NodeConfig` field; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if self.http.is_some() {
            config.http = self.http;
        }
        if !self.seeds.is_empty() {
            config.seeds = self.seeds;
        }
        if let Some(rf) = self.replication_factor {
            config.replication_factor = rf;
        }
        if let Some(vnodes) = self.virtual_nodes {
            config.virtual_nodes = vnodes;
        }
        if let Some(acks) = self.write_acks {
            config.write_acks = acks;
        }
        if let Some(acks) = self.read_acks {
            config.read_acks = acks;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;

    tracing::info!("Starting node on {}", config.bind);
    if !config.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.seeds);
    }

    let http_addr = config.http_addr();
    let node = Node::bind(config).await?;
    tracing::info!("Node ID: {}", node.id());
    node.start().await;

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, node.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    node.shutdown().await;
    Ok(())
}
