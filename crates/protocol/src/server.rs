use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, debug, info, info_span, warn};

use crate::application::{DynApplication, handle_request};
use crate::codec::{self, Envelope};
use crate::error::TransportError;
use crate::types::{Request, Response};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running protocol server exposing one application on a TCP address.
///
/// The listener is bound before [`AbciServerBuilder::bind`] returns, so a
/// successfully constructed server is already accepting connections. Each
/// connection is served on its own task; requests on one connection are
/// answered in order.
///
/// Dropping the server cancels the accept loop and every connection task
/// without waiting for them; call [`shutdown`](Self::shutdown) to wait.
#[derive(Debug)]
pub struct AbciServer {
    name: String,
    local_addr: SocketAddr,
    token: CancellationToken,
    handle: JoinHandle<()>,
    shutdown_timeout: Duration,
    _guard: DropGuard,
}

impl AbciServer {
    /// Create a builder for an `AbciServer`.
    pub fn builder() -> AbciServerBuilder {
        AbciServerBuilder::default()
    }

    /// Bind `app` on `addr` with default settings.
    pub async fn bind(
        addr: SocketAddr,
        app: Arc<dyn DynApplication>,
    ) -> Result<Self, TransportError> {
        Self::builder().bind(addr, app).await
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting, close every connection, and wait for all tasks.
    ///
    /// Bounded by the configured shutdown timeout; on timeout the accept loop
    /// and every connection task are aborted before
    /// [`TransportError::ShutdownTimeout`] is returned, so no request is
    /// handed to the application afterwards.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        self.token.cancel();

        match tokio::time::timeout(self.shutdown_timeout, &mut self.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Task(e.to_string())),
            Err(_) => {
                warn!(server = %self.name, timeout = ?self.shutdown_timeout, "connections still busy, aborting");
                // The accept loop owns the connection set; dropping it aborts them.
                self.handle.abort();
                let _ = (&mut self.handle).await;
                Err(TransportError::ShutdownTimeout(self.shutdown_timeout))
            }
        }
    }
}

/// Builder for [`AbciServer`].
#[derive(Debug)]
pub struct AbciServerBuilder {
    name: String,
    dispatch: Option<Dispatch>,
    shutdown_timeout: Duration,
}

impl Default for AbciServerBuilder {
    fn default() -> Self {
        Self {
            name: "abci-server".to_owned(),
            dispatch: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl AbciServerBuilder {
    /// Name used in the server's log records.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Send every log record of the server and its connections to `dispatch`
    /// instead of the caller's default subscriber.
    #[must_use]
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Upper bound for [`AbciServer::shutdown`].
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bind the listener and start serving `app`.
    pub async fn bind(
        self,
        addr: SocketAddr,
        app: Arc<dyn DynApplication>,
    ) -> Result<AbciServer, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let dispatch = self
            .dispatch
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));
        let span = tracing::dispatcher::with_default(&dispatch, || {
            info_span!("abci_server", server = %self.name, addr = %local_addr)
        });

        let token = CancellationToken::new();
        let accept = accept_loop(listener, app, token.clone())
            .instrument(span)
            .with_subscriber(dispatch);
        let handle = tokio::spawn(accept);

        Ok(AbciServer {
            name: self.name,
            local_addr,
            _guard: token.clone().drop_guard(),
            token,
            handle,
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    app: Arc<dyn DynApplication>,
    token: CancellationToken,
) {
    let mut connections = JoinSet::new();
    info!("listening");
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let connection = serve_connection(stream, peer, Arc::clone(&app), token.clone());
                    connections.spawn(connection.in_current_span().with_current_subscriber());
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
    drop(listener);
    info!(open = connections.len(), "stopped accepting connections");
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Arc<dyn DynApplication>,
    token: CancellationToken,
) {
    let mut transport = codec::framed(stream);
    loop {
        let frame = tokio::select! {
            () = token.cancelled() => break,
            frame = transport.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(%peer, error = %e, "read failed, closing connection");
                break;
            }
            None => {
                debug!(%peer, "connection closed by peer");
                break;
            }
        };

        let Envelope { id, body } = match codec::decode::<Request>(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%peer, error = %e, "undecodable request, closing connection");
                break;
            }
        };

        let operation = body.operation();
        debug!(%peer, id, operation, "request");
        let response = handle_request(app.as_ref(), body).await;
        if let Response::Exception { error } = &response {
            warn!(%peer, id, operation, %error, "application failed");
        }

        let payload = match codec::encode(id, &response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%peer, id, operation, error = %e, "failed to encode response");
                break;
            }
        };
        if let Err(e) = transport.send(payload).await {
            warn!(%peer, id, error = %e, "write failed, closing connection");
            break;
        }
    }
}
