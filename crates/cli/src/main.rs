//! `abci-relay`: run a forwarding proxy, or boot a local cluster of nodes.

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use abci_relay_harness::{Cluster, ClusterConfig};
use abci_relay_protocol::AbciClient;
use abci_relay_protocol::AbciServer;
use abci_relay_proxy::ProxyApplication;
use clap::{Args, Parser, Subcommand};
use tracing::{Dispatch, info};

use crate::config::RelayConfig;

/// Forwarding proxy and local cluster launcher for protocol applications.
#[derive(Parser, Debug)]
#[command(name = "abci-relay", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "abci-relay.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a standalone forwarding proxy in front of an application.
    Proxy(ProxyArgs),
    /// Boot a local cluster of nodes until interrupted.
    Cluster(ClusterArgs),
}

#[derive(Args, Debug)]
struct ProxyArgs {
    /// Override the listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the upstream application address.
    #[arg(long)]
    upstream: Option<SocketAddr>,

    /// Override the interception prefix.
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Args, Debug)]
struct ClusterArgs {
    /// Override the number of nodes.
    #[arg(long)]
    nodes: Option<usize>,

    /// Override the identity of the first node.
    #[arg(long)]
    first_id: Option<u8>,

    /// Override the directory holding node working directories.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Override the consensus engine executable.
    #[arg(long)]
    engine: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration from TOML file, or use defaults if the file does not exist.
    let config: RelayConfig = if Path::new(&cli.config).exists() {
        let contents = std::fs::read_to_string(&cli.config)?;
        toml::from_str(&contents)?
    } else {
        info!(path = %cli.config, "config file not found, using defaults");
        toml::from_str("")?
    };

    match cli.command {
        Command::Proxy(args) => run_proxy(config, args).await,
        Command::Cluster(args) => run_cluster(config, args).await,
    }
}

async fn run_proxy(config: RelayConfig, args: ProxyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen = args.listen.unwrap_or(config.proxy.listen);
    let upstream = args.upstream.unwrap_or(config.proxy.upstream);
    let prefix = args.prefix.unwrap_or(config.proxy.prefix);

    let client = Arc::new(AbciClient::connect(upstream, config.engine.retry.to_policy()).await?);
    info!(%upstream, "connected to application");

    let proxy = ProxyApplication::new(client.clone(), prefix.clone().into_bytes())
        .with_dispatch(tracing::dispatcher::get_default(Dispatch::clone));
    let server = AbciServer::builder()
        .name("proxy")
        .bind(listen, Arc::new(proxy))
        .await?;
    info!(addr = %server.local_addr(), %upstream, %prefix, "proxy listening");

    shutdown_signal().await?;

    server.shutdown().await?;
    client.close().await?;
    info!("abci-relay proxy shut down");
    Ok(())
}

async fn run_cluster(
    config: RelayConfig,
    args: ClusterArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = config.engine.to_engine_config();
    if let Some(binary) = args.engine {
        engine.binary = binary;
    }

    let cluster_config = ClusterConfig::builder()
        .nodes(args.nodes.unwrap_or(config.cluster.nodes))
        .first_id(args.first_id.unwrap_or(config.cluster.first_id))
        .root(args.root.unwrap_or(config.cluster.root))
        .engine(engine)
        .prefix(config.proxy.prefix.into_bytes())
        .build();

    let cluster = Cluster::start(cluster_config).await?;
    for node in cluster.nodes() {
        info!(
            node = %node.id(),
            proxy = %node.proxy_addr(),
            rpc = node.ports().rpc,
            dir = %node.working_dir().display(),
            "node running"
        );
    }

    shutdown_signal().await?;

    cluster.teardown().await?;
    info!("abci-relay cluster shut down");
    Ok(())
}

/// Resolve once SIGINT or SIGTERM arrives.
async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("received SIGINT");
        }
        _ = terminate.recv() => { info!("received SIGTERM"); }
    }
    Ok(())
}
