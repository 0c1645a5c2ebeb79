use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::Application;
use crate::codec::{self, Envelope, FrameTransport};
use crate::error::{AppError, TransportError};
use crate::types::{
    Header, Request, RequestInfo, RequestQuery, Response, ResponseEndBlock, ResponseInfo,
    ResponseQuery, TxResult, Validator,
};

/// Bounded exponential backoff used when dialing a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of dial attempts, at least one.
    pub attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that dials exactly once.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

/// A persistent client connection to a protocol server.
///
/// Calls are synchronous round trips serialized over one connection. When a
/// round trip fails on the wire the connection is discarded and the next
/// call dials again, so one failed call never leaves a half-read response
/// behind for the next one.
///
/// The client implements [`Application`], which makes it usable as the
/// downstream delegate of a proxy.
#[derive(Debug)]
pub struct AbciClient {
    addr: SocketAddr,
    retry: RetryPolicy,
    connection: Mutex<Option<FrameTransport>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl AbciClient {
    /// Dial `addr`, retrying according to `retry` until the server accepts.
    pub async fn connect(addr: SocketAddr, retry: RetryPolicy) -> Result<Self, TransportError> {
        let transport = dial(addr, &retry).await?;
        Ok(Self {
            addr,
            retry,
            connection: Mutex::new(Some(transport)),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// The server address this client dials.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection. Later calls fail with [`AppError::Closed`].
    pub async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        let mut connection = self.connection.lock().await;
        if let Some(mut transport) = connection.take() {
            SinkExt::<Bytes>::close(&mut transport).await?;
        }
        Ok(())
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, request: Request) -> Result<Response, AppError> {
        if self.is_closed() {
            return Err(AppError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = codec::encode(id, &request)?;

        let mut connection = self.connection.lock().await;
        let mut transport = match connection.take() {
            Some(transport) => transport,
            None => {
                debug!(addr = %self.addr, "re-dialing after a failed round trip");
                dial(self.addr, &self.retry)
                    .await
                    .map_err(|e| AppError::Connection(e.to_string()))?
            }
        };

        let response = round_trip(&mut transport, id, payload).await?;
        *connection = Some(transport);
        Ok(response)
    }
}

async fn dial(addr: SocketAddr, retry: &RetryPolicy) -> Result<FrameTransport, TransportError> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(codec::framed(stream));
            }
            Err(source) if attempt >= attempts => {
                return Err(TransportError::Connect {
                    addr,
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                let delay = retry.backoff(attempt);
                debug!(%addr, attempt, error = %e, ?delay, "dial failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn round_trip(
    transport: &mut FrameTransport,
    id: u64,
    payload: Bytes,
) -> Result<Response, AppError> {
    transport
        .send(payload)
        .await
        .map_err(|e| AppError::Connection(e.to_string()))?;

    let frame = transport
        .next()
        .await
        .ok_or_else(|| AppError::Connection("connection closed by peer".into()))?
        .map_err(|e| AppError::Connection(e.to_string()))?;

    let Envelope { id: answered, body } = codec::decode::<Response>(&frame)?;
    if answered != id {
        return Err(AppError::Connection(format!(
            "response id {answered} does not match request id {id}"
        )));
    }
    Ok(body)
}

fn unexpected(expected: &'static str, response: Response) -> AppError {
    match response {
        Response::Exception { error } => AppError::Remote(error),
        other => AppError::UnexpectedResponse {
            expected,
            got: other.operation(),
        },
    }
}

impl Application for AbciClient {
    async fn info(&self, request: RequestInfo) -> Result<ResponseInfo, AppError> {
        match self.call(Request::Info(request)).await? {
            Response::Info(info) => Ok(info),
            other => Err(unexpected("info", other)),
        }
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<String, AppError> {
        let request = Request::SetOption {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        match self.call(request).await? {
            Response::SetOption { log } => Ok(log),
            other => Err(unexpected("set_option", other)),
        }
    }

    async fn check_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
        match self.call(Request::CheckTx { tx: tx.to_vec() }).await? {
            Response::CheckTx(result) => Ok(result),
            other => Err(unexpected("check_tx", other)),
        }
    }

    async fn deliver_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
        match self.call(Request::DeliverTx { tx: tx.to_vec() }).await? {
            Response::DeliverTx(result) => Ok(result),
            other => Err(unexpected("deliver_tx", other)),
        }
    }

    async fn commit(&self) -> Result<TxResult, AppError> {
        match self.call(Request::Commit).await? {
            Response::Commit(result) => Ok(result),
            other => Err(unexpected("commit", other)),
        }
    }

    async fn query(&self, request: RequestQuery) -> Result<ResponseQuery, AppError> {
        match self.call(Request::Query(request)).await? {
            Response::Query(response) => Ok(response),
            other => Err(unexpected("query", other)),
        }
    }

    async fn init_chain(&self, validators: &[Validator]) -> Result<(), AppError> {
        let request = Request::InitChain {
            validators: validators.to_vec(),
        };
        match self.call(request).await? {
            Response::InitChain => Ok(()),
            other => Err(unexpected("init_chain", other)),
        }
    }

    async fn begin_block(&self, hash: &[u8], header: &Header) -> Result<(), AppError> {
        let request = Request::BeginBlock {
            hash: hash.to_vec(),
            header: header.clone(),
        };
        match self.call(request).await? {
            Response::BeginBlock => Ok(()),
            other => Err(unexpected("begin_block", other)),
        }
    }

    async fn end_block(&self, height: u64) -> Result<ResponseEndBlock, AppError> {
        match self.call(Request::EndBlock { height }).await? {
            Response::EndBlock(response) => Ok(response),
            other => Err(unexpected("end_block", other)),
        }
    }
}
