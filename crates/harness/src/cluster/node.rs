//! One node of a local network: application, client, proxy, and engine.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use abci_relay_protocol::{AbciClient, AbciServer, DynApplication, TransportError};
use abci_relay_proxy::{DEFAULT_PREFIX, ProxyApplication};
use bytes::Bytes;
use tracing::{info, warn};

use super::{EngineConfig, NodeId, PeerList, PortSet};
use crate::application::RecordingApplication;
use crate::engine::EngineProcess;
use crate::error::HarnessError;
use crate::output::OutputBuffer;

/// Upper bound on closing the application client during teardown.
const CLIENT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a node's services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Initialized on disk, nothing running.
    Created,
    /// Every service has been started.
    Running,
    /// Stopped, or a start attempt was rolled back.
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// A single node of a local test network.
///
/// A node owns an application server running a [`RecordingApplication`], a
/// client connected to it, a proxy server wrapping that client in a
/// [`ProxyApplication`], and the consensus engine process pointed at the
/// proxy. Every port derives from the node's identity, so nodes with
/// distinct identities can run side by side.
///
/// Dropping a running node kills the engine and cancels every server
/// without waiting; call [`stop`](Self::stop) for an orderly shutdown.
pub struct Node {
    id: NodeId,
    ports: PortSet,
    working_dir: PathBuf,
    engine: EngineConfig,
    prefix: Bytes,
    application: Arc<RecordingApplication>,
    state: NodeState,

    engine_output: OutputBuffer,
    proxy_output: OutputBuffer,
    app_output: OutputBuffer,

    app_server: Option<AbciServer>,
    client: Option<Arc<AbciClient>>,
    proxy_server: Option<AbciServer>,
    engine_process: Option<EngineProcess>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("working_dir", &self.working_dir)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Initialize node `id` under `root` with the default engine settings.
    pub async fn new(id: u8, root: impl Into<PathBuf>) -> Result<Self, HarnessError> {
        Self::builder().id(id).root(root).build().await
    }

    /// Create a builder for a `Node`.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Address the consensus engine uses to reach this node's proxy.
    pub fn proxy_addr(&self) -> SocketAddr {
        SocketAddr::new(self.engine.host, self.ports.proxy)
    }

    /// Address of the application server behind the proxy.
    pub fn app_addr(&self) -> SocketAddr {
        SocketAddr::new(self.engine.host, self.ports.app)
    }

    /// Seeds this node hands to its engine when started with `peers`.
    pub fn peer_list(&self, peers: &[NodeId]) -> PeerList {
        PeerList::excluding(self.id, peers, self.engine.host)
    }

    /// The stub application behind the proxy.
    pub fn application(&self) -> &Arc<RecordingApplication> {
        &self.application
    }

    /// Captured stdout and stderr of the consensus engine.
    pub fn engine_output(&self) -> String {
        self.engine_output.contents()
    }

    /// Log records of the proxy and its server.
    pub fn proxy_output(&self) -> String {
        self.proxy_output.contents()
    }

    /// Log records of the application server.
    pub fn app_output(&self) -> String {
        self.app_output.contents()
    }

    /// Start every service, seeding the engine with `peers` minus this node.
    ///
    /// Services start in dependency order: application server, client,
    /// proxy server, then the engine. If a step fails, the steps before it
    /// are torn down again and the original error is returned.
    pub async fn start(&mut self, peers: &[NodeId]) -> Result<(), HarnessError> {
        if self.state == NodeState::Running {
            return Err(HarnessError::Configuration(format!(
                "node {} is already running",
                self.id
            )));
        }

        match self.start_services(peers).await {
            Ok(()) => {
                self.state = NodeState::Running;
                info!(
                    node = %self.id,
                    proxy = %self.proxy_addr(),
                    app = %self.app_addr(),
                    "node started"
                );
                Ok(())
            }
            Err(e) => {
                warn!(node = %self.id, error = %e, "node start failed, rolling back");
                for failure in self.teardown().await {
                    warn!(node = %self.id, error = %failure, "rollback step failed");
                }
                self.state = NodeState::Stopped;
                Err(e)
            }
        }
    }

    async fn start_services(&mut self, peers: &[NodeId]) -> Result<(), HarnessError> {
        let node = self.id;

        let app: Arc<dyn DynApplication> = self.application.clone();
        let app_server = AbciServer::builder()
            .name(format!("app-{node}"))
            .dispatch(self.app_output.dispatch())
            .bind(self.app_addr(), app)
            .await
            .map_err(|source| HarnessError::Service {
                node,
                service: "application server",
                source,
            })?;
        self.app_server = Some(app_server);

        let client = AbciClient::connect(self.app_addr(), self.engine.retry.clone())
            .await
            .map_err(|source| HarnessError::Service {
                node,
                service: "application client",
                source,
            })?;
        let client = Arc::new(client);
        self.client = Some(Arc::clone(&client));

        let proxy = ProxyApplication::new(client, self.prefix.clone())
            .with_dispatch(self.proxy_output.dispatch());
        let proxy_server = AbciServer::builder()
            .name(format!("proxy-{node}"))
            .dispatch(self.proxy_output.dispatch())
            .bind(self.proxy_addr(), Arc::new(proxy))
            .await
            .map_err(|source| HarnessError::Service {
                node,
                service: "proxy server",
                source,
            })?;
        self.proxy_server = Some(proxy_server);

        let peers = self.peer_list(peers);
        let args = self.engine.node_args(&self.working_dir, &self.ports, &peers);
        let process = EngineProcess::spawn(&self.engine, node, &args, self.engine_output.clone())?;
        self.engine_process = Some(process);
        Ok(())
    }

    /// Stop every service in reverse start order.
    ///
    /// Each step is attempted even if an earlier one failed; all failures
    /// are returned together as [`HarnessError::Teardown`]. The working
    /// directory is left in place. Stopping a node that is not running is a
    /// no-op.
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        if self.state != NodeState::Running {
            return Ok(());
        }

        let errors = self.teardown().await;
        self.state = NodeState::Stopped;
        if errors.is_empty() {
            info!(node = %self.id, "node stopped");
            Ok(())
        } else {
            Err(HarnessError::Teardown {
                node: self.id,
                errors,
            })
        }
    }

    async fn teardown(&mut self) -> Vec<HarnessError> {
        let node = self.id;
        let mut errors = Vec::new();

        if let Some(process) = self.engine_process.take()
            && let Err(e) = process
                .stop(self.engine.stop_timeout, &self.engine.graceful_exit_codes)
                .await
        {
            errors.push(e);
        }

        if let Some(server) = self.proxy_server.take()
            && let Err(source) = server.shutdown().await
        {
            errors.push(HarnessError::Service {
                node,
                service: "proxy server",
                source,
            });
        }

        if let Some(client) = self.client.take()
            && let Err(source) = close_client(&client).await
        {
            errors.push(HarnessError::Service {
                node,
                service: "application client",
                source,
            });
        }

        if let Some(server) = self.app_server.take()
            && let Err(source) = server.shutdown().await
        {
            errors.push(HarnessError::Service {
                node,
                service: "application server",
                source,
            });
        }

        errors
    }
}

async fn close_client(client: &AbciClient) -> Result<(), TransportError> {
    tokio::time::timeout(CLIENT_CLOSE_TIMEOUT, client.close())
        .await
        .unwrap_or(Err(TransportError::ShutdownTimeout(CLIENT_CLOSE_TIMEOUT)))
}

/// Builder for `Node`.
#[derive(Debug, Default)]
pub struct NodeBuilder {
    id: Option<u8>,
    root: Option<PathBuf>,
    engine: Option<EngineConfig>,
    application: Option<RecordingApplication>,
    prefix: Option<Bytes>,
}

impl NodeBuilder {
    /// Set the node identity, at most [`MAX_NODE_ID`](super::MAX_NODE_ID).
    #[must_use]
    pub fn id(mut self, id: u8) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the directory the node's working directory is created in.
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

    /// Set the stub application behind the proxy.
    #[must_use]
    pub fn application(mut self, application: RecordingApplication) -> Self {
        self.application = Some(application);
        self
    }

    /// Set the proxy interception prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Validate the identity, create the working directory, and run the
    /// engine's `init` in it.
    pub async fn build(self) -> Result<Node, HarnessError> {
        let raw = self
            .id
            .ok_or_else(|| HarnessError::Configuration("node id is required".into()))?;
        let id = NodeId::new(raw)?;
        let root = self
            .root
            .ok_or_else(|| HarnessError::Configuration("root directory is required".into()))?;
        let engine = self.engine.unwrap_or_default();

        let working_dir = root.join(id.dir_name());
        tokio::fs::create_dir_all(&working_dir)
            .await
            .map_err(|source| HarnessError::WorkingDir {
                path: working_dir.clone(),
                source,
            })?;
        engine.init(id, &working_dir).await?;

        let application = self
            .application
            .unwrap_or_else(|| RecordingApplication::new(format!("app-{id}")));
        info!(node = %id, dir = %working_dir.display(), "node initialized");

        Ok(Node {
            id,
            ports: PortSet::for_node(id),
            working_dir,
            engine,
            prefix: self
                .prefix
                .unwrap_or_else(|| Bytes::from_static(DEFAULT_PREFIX)),
            application: Arc::new(application),
            state: NodeState::Created,
            engine_output: OutputBuffer::new(),
            proxy_output: OutputBuffer::new(),
            app_output: OutputBuffer::new(),
            app_server: None,
            client: None,
            proxy_server: None,
            engine_process: None,
        })
    }
}
