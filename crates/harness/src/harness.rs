//! Local multi-node clusters.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{info, warn};

use crate::cluster::{ClusterConfig, Node, NodeId};
use crate::error::HarnessError;

/// A set of nodes with consecutive identities, each seeded with all others.
///
/// Nodes are constructed first, then started one by one in identity order;
/// the consensus engines are relied upon to retry peers that are not up
/// yet.
#[derive(Debug)]
pub struct Cluster {
    nodes: Vec<Node>,
    root: PathBuf,
}

impl Cluster {
    /// Initialize and start every node described by `config`.
    ///
    /// If any node fails to start, the nodes already running are stopped
    /// before the error is returned.
    pub async fn start(config: ClusterConfig) -> Result<Self, HarnessError> {
        let ids = config.node_ids()?;
        let prefix = Bytes::from(config.prefix);

        let mut nodes = Vec::with_capacity(ids.len());
        for id in &ids {
            let node = Node::builder()
                .id(id.get())
                .root(config.root.clone())
                .engine(config.engine.clone())
                .prefix(prefix.clone())
                .build()
                .await?;
            nodes.push(node);
        }

        let mut cluster = Self {
            nodes,
            root: config.root,
        };
        for index in 0..cluster.nodes.len() {
            if let Err(e) = cluster.nodes[index].start(&ids).await {
                if let Err(rollback) = cluster.stop_all().await {
                    warn!(error = %rollback, "stopping the cluster after a failed start also failed");
                }
                return Err(e);
            }
        }

        info!(nodes = cluster.nodes.len(), root = %cluster.root.display(), "cluster started");
        Ok(cluster)
    }

    /// Get a node by index.
    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.nodes.get_mut(index)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(Node::id).collect()
    }

    /// Directory holding every node's working directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop every node, collecting all failures.
    pub async fn teardown(mut self) -> Result<(), HarnessError> {
        self.stop_all().await?;
        info!(root = %self.root.display(), "cluster stopped");
        Ok(())
    }

    async fn stop_all(&mut self) -> Result<(), HarnessError> {
        let mut errors = Vec::new();
        for node in &mut self.nodes {
            if let Err(e) = node.stop().await {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Cluster { errors })
        }
    }
}
