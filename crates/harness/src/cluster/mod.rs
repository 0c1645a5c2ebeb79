//! Node identities, the port layout, and node lifecycle.

mod config;
mod identity;
mod node;
mod peers;
mod ports;

pub use config::{ClusterConfig, ClusterConfigBuilder, EngineConfig};
pub use identity::{MAX_NODE_ID, NodeId};
pub use node::{Node, NodeBuilder, NodeState};
pub use peers::{Peer, PeerList};
pub use ports::{PortKind, PortSet};
