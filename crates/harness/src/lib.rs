//! Harness that boots local networks of consensus engines, each talking to
//! its application through a forwarding proxy.
//!
//! # Quick Start
//!
//! ```no_run
//! use abci_relay_harness::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), HarnessError> {
//!     let config = ClusterConfig::builder()
//!         .nodes(2)
//!         .root("/tmp/relay")
//!         .build();
//!     let cluster = Cluster::start(config).await?;
//!
//!     let node = cluster.node(0).expect("node 0");
//!     println!("proxy listening on {}", node.proxy_addr());
//!
//!     cluster.teardown().await
//! }
//! ```

pub mod application;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod harness;
pub mod output;

pub use application::{CapturedCall, FailureMode, RecordingApplication};
pub use cluster::{
    ClusterConfig, ClusterConfigBuilder, EngineConfig, MAX_NODE_ID, Node, NodeBuilder, NodeId,
    NodeState, Peer, PeerList, PortKind, PortSet,
};
pub use engine::EngineProcess;
pub use error::HarnessError;
pub use harness::Cluster;
pub use output::OutputBuffer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::application::{FailureMode, RecordingApplication};
    pub use crate::cluster::{ClusterConfig, EngineConfig, Node, NodeId, NodeState, PortSet};
    pub use crate::error::HarnessError;
    pub use crate::harness::Cluster;
    pub use abci_relay_protocol::{AbciClient, Application, RetryPolicy, TxResult};
}
