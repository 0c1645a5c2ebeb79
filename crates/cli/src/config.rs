//! TOML configuration of the `abci-relay` binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use abci_relay_harness::EngineConfig;
use abci_relay_protocol::RetryPolicy;
use serde::Deserialize;

/// Top-level configuration, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct RelayConfig {
    /// Standalone proxy settings.
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Local cluster settings.
    #[serde(default)]
    pub cluster: ClusterFileConfig,
    /// Consensus engine settings shared by every node.
    #[serde(default)]
    pub engine: EngineFileConfig,
}

/// `[proxy]` section.
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    /// Address the proxy listens on for the consensus engine.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Address of the application every non-intercepted call is relayed to.
    #[serde(default = "default_upstream")]
    pub upstream: SocketAddr,
    /// Transactions starting with this prefix are echoed, not relayed.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream: default_upstream(),
            prefix: default_prefix(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 26658))
}

fn default_upstream() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 26659))
}

fn default_prefix() -> String {
    "echo:".to_owned()
}

/// `[cluster]` section.
#[derive(Debug, Deserialize)]
pub struct ClusterFileConfig {
    /// Number of nodes to boot.
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Identity of the first node.
    #[serde(default)]
    pub first_id: u8,
    /// Directory the node working directories are created in.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for ClusterFileConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            first_id: 0,
            root: default_root(),
        }
    }
}

fn default_nodes() -> usize {
    2
}

fn default_root() -> PathBuf {
    PathBuf::from("abci-relay-data")
}

/// `[engine]` section.
#[derive(Debug, Deserialize)]
pub struct EngineFileConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    #[serde(default)]
    pub base_args: Vec<String>,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_graceful_exit_codes")]
    pub graceful_exit_codes: Vec<i32>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineFileConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            base_args: Vec::new(),
            host: default_host(),
            stop_timeout_ms: default_stop_timeout_ms(),
            graceful_exit_codes: default_graceful_exit_codes(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineFileConfig {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig::new(&self.binary)
            .with_base_args(self.base_args.iter().cloned())
            .with_host(self.host)
            .with_stop_timeout(Duration::from_millis(self.stop_timeout_ms))
            .with_graceful_exit_codes(self.graceful_exit_codes.iter().copied())
            .with_retry(self.retry.to_policy())
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("tendermint")
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_stop_timeout_ms() -> u64 {
    10_000
}

fn default_graceful_exit_codes() -> Vec<i32> {
    vec![0, 1]
}

/// `[engine.retry]` section: how clients dial their application.
#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

fn default_attempts() -> u32 {
    20
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    500
}
