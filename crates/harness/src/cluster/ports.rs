//! Fixed port layout: every service of node `n` listens on `base + n`.

use std::fmt;

use super::NodeId;

/// A service a node exposes on its own port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Forwarding proxy the engine talks to.
    Proxy,
    /// Consensus engine RPC endpoint.
    Rpc,
    /// Consensus engine peer-to-peer endpoint.
    P2p,
    /// Backing application behind the proxy.
    App,
    /// Reserved for an RPC proxy in front of the engine.
    RpcProxy,
}

impl PortKind {
    pub const ALL: [PortKind; 5] = [
        PortKind::Proxy,
        PortKind::Rpc,
        PortKind::P2p,
        PortKind::App,
        PortKind::RpcProxy,
    ];

    /// First port of the block reserved for this service.
    ///
    /// Blocks are 100 ports wide, which is what bounds node identities.
    pub const fn base(self) -> u16 {
        match self {
            PortKind::Proxy => 50_000,
            PortKind::Rpc => 50_100,
            PortKind::P2p => 50_200,
            PortKind::App => 50_300,
            PortKind::RpcProxy => 50_400,
        }
    }

    pub fn port_for(self, id: NodeId) -> u16 {
        self.base() + u16::from(id.get())
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortKind::Proxy => "proxy",
            PortKind::Rpc => "rpc",
            PortKind::P2p => "p2p",
            PortKind::App => "app",
            PortKind::RpcProxy => "rpc-proxy",
        };
        f.write_str(name)
    }
}

/// All ports of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSet {
    pub proxy: u16,
    pub rpc: u16,
    pub p2p: u16,
    pub app: u16,
    pub rpc_proxy: u16,
}

impl PortSet {
    pub fn for_node(id: NodeId) -> Self {
        Self {
            proxy: PortKind::Proxy.port_for(id),
            rpc: PortKind::Rpc.port_for(id),
            p2p: PortKind::P2p.port_for(id),
            app: PortKind::App.port_for(id),
            rpc_proxy: PortKind::RpcProxy.port_for(id),
        }
    }

    pub fn get(&self, kind: PortKind) -> u16 {
        match kind {
            PortKind::Proxy => self.proxy,
            PortKind::Rpc => self.rpc,
            PortKind::P2p => self.p2p,
            PortKind::App => self.app,
            PortKind::RpcProxy => self.rpc_proxy,
        }
    }
}
