//! Error types for the node harness.

use std::path::PathBuf;
use std::time::Duration;

use abci_relay_protocol::TransportError;
use thiserror::Error;

use crate::cluster::NodeId;

/// Errors that can occur while preparing, starting, or stopping nodes.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid node or cluster configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The node's working directory could not be created.
    #[error("cannot create working directory {}: {source}", .path.display())]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `init` of the consensus engine failed or could not be run.
    #[error("consensus engine init failed for node {node}: {reason}{}", format_output(.output))]
    EngineInit {
        node: NodeId,
        reason: String,
        output: String,
    },

    /// The consensus engine process could not be spawned.
    #[error("cannot spawn consensus engine for node {node}: {source}")]
    EngineSpawn {
        node: NodeId,
        #[source]
        source: std::io::Error,
    },

    /// The interrupt signal could not be delivered to the engine process.
    #[error("cannot interrupt consensus engine of node {node}: {reason}")]
    EngineSignal { node: NodeId, reason: String },

    /// The engine exited with a status other than an interrupt or a
    /// configured graceful exit code.
    #[error("consensus engine of node {node} exited with {status}{}", format_output(.output))]
    EngineExit {
        node: NodeId,
        status: String,
        output: String,
    },

    /// The engine ignored the interrupt and was killed.
    #[error(
        "consensus engine of node {node} did not exit within {timeout:?} and was killed{}",
        format_output(.output)
    )]
    EngineTimeout {
        node: NodeId,
        timeout: Duration,
        output: String,
    },

    /// A protocol server or client of a node failed.
    #[error("{service} of node {node}: {source}")]
    Service {
        node: NodeId,
        service: &'static str,
        #[source]
        source: TransportError,
    },

    /// One or more steps of a node's stop sequence failed.
    #[error("stopping node {node} failed: {}", join_errors(.errors))]
    Teardown {
        node: NodeId,
        errors: Vec<HarnessError>,
    },

    /// One or more nodes of a cluster failed to stop.
    #[error("cluster teardown failed: {}", join_errors(.errors))]
    Cluster { errors: Vec<HarnessError> },
}

fn join_errors(errors: &[HarnessError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_output(output: &str) -> String {
    if output.trim().is_empty() {
        String::new()
    } else {
        format!("\n--- engine output ---\n{}", output.trim_end())
    }
}
