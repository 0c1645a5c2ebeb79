use std::fmt;
use std::net::{IpAddr, SocketAddr};

use super::{NodeId, PortKind};

/// Peer-to-peer address of another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub host: IpAddr,
    pub p2p_port: u16,
}

impl Peer {
    pub fn new(id: NodeId, host: IpAddr) -> Self {
        Self {
            host,
            p2p_port: PortKind::P2p.port_for(id),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SocketAddr::new(self.host, self.p2p_port).fmt(f)
    }
}

/// Seed list handed to a node's consensus engine.
///
/// Displays as the comma-separated `host:port` list the engine expects;
/// an empty list displays as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerList(Vec<Peer>);

impl PeerList {
    /// Peers for every identity in `candidates` except `self_id`, in the
    /// order given. Duplicates are kept.
    pub fn excluding(self_id: NodeId, candidates: &[NodeId], host: IpAddr) -> Self {
        Self(
            candidates
                .iter()
                .filter(|id| **id != self_id)
                .map(|id| Peer::new(*id, host))
                .collect(),
        )
    }

    pub fn peers(&self) -> &[Peer] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, peer) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            peer.fmt(f)?;
        }
        Ok(())
    }
}
