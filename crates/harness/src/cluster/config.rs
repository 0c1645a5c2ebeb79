//! Configuration types for nodes and local clusters.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use abci_relay_protocol::RetryPolicy;
use abci_relay_proxy::DEFAULT_PREFIX;

use super::{MAX_NODE_ID, NodeId};
use crate::error::HarnessError;

/// How to run the consensus engine of a node.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Executable of the consensus engine.
    pub binary: PathBuf,
    /// Arguments placed before the subcommand, e.g. a script path when
    /// `binary` is an interpreter.
    pub base_args: Vec<String>,
    /// Address every service of the node binds and advertises.
    pub host: IpAddr,
    /// How long `stop` waits for the engine after the interrupt.
    pub stop_timeout: Duration,
    /// Exit codes accepted as a clean shutdown besides death by interrupt.
    pub graceful_exit_codes: Vec<i32>,
    /// Dial policy for the node's application client.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tendermint"),
            base_args: Vec::new(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            stop_timeout: Duration::from_secs(10),
            graceful_exit_codes: vec![0, 1],
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_base_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_graceful_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.graceful_exit_codes = codes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for a local cluster of nodes with consecutive identities.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of nodes.
    pub nodes: usize,
    /// Identity of the first node; the others follow consecutively.
    pub first_id: u8,
    /// Directory holding every node's working directory.
    pub root: PathBuf,
    /// Consensus engine settings shared by all nodes.
    pub engine: EngineConfig,
    /// Interception prefix of every node's proxy.
    pub prefix: Vec<u8>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 1,
            first_id: 0,
            root: std::env::temp_dir().join("abci-relay"),
            engine: EngineConfig::default(),
            prefix: DEFAULT_PREFIX.to_vec(),
        }
    }
}

impl ClusterConfig {
    /// Create a new builder for `ClusterConfig`.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Identities of every node, validated against [`MAX_NODE_ID`].
    pub fn node_ids(&self) -> Result<Vec<NodeId>, HarnessError> {
        if self.nodes == 0 {
            return Err(HarnessError::Configuration(
                "a cluster needs at least one node".into(),
            ));
        }
        let last = usize::from(self.first_id) + self.nodes - 1;
        if last > usize::from(MAX_NODE_ID) {
            return Err(HarnessError::Configuration(format!(
                "{} nodes starting at id {} exceed the maximum id {MAX_NODE_ID}",
                self.nodes, self.first_id
            )));
        }
        (usize::from(self.first_id)..=last)
            .map(|id| {
                let id = u8::try_from(id)
                    .map_err(|_| HarnessError::Configuration(format!("node id {id} out of range")))?;
                NodeId::new(id)
            })
            .collect()
    }
}

/// Builder for `ClusterConfig`.
#[derive(Debug, Default)]
pub struct ClusterConfigBuilder {
    nodes: Option<usize>,
    first_id: Option<u8>,
    root: Option<PathBuf>,
    engine: Option<EngineConfig>,
    prefix: Option<Vec<u8>>,
}

impl ClusterConfigBuilder {
    /// Set the number of nodes.
    #[must_use]
    pub fn nodes(mut self, count: usize) -> Self {
        self.nodes = Some(count);
        self
    }

    /// Set the identity of the first node.
    #[must_use]
    pub fn first_id(mut self, id: u8) -> Self {
        self.first_id = Some(id);
        self
    }

    /// Set the directory holding the node working directories.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Set the consensus engine configuration.
    #[must_use]
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the proxy interception prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Build the `ClusterConfig`.
    #[must_use]
    pub fn build(self) -> ClusterConfig {
        let defaults = ClusterConfig::default();
        ClusterConfig {
            nodes: self.nodes.unwrap_or(defaults.nodes),
            first_id: self.first_id.unwrap_or(defaults.first_id),
            root: self.root.unwrap_or(defaults.root),
            engine: self.engine.unwrap_or(defaults.engine),
            prefix: self.prefix.unwrap_or(defaults.prefix),
        }
    }
}
