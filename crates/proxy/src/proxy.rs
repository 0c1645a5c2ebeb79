use std::sync::Arc;

use abci_relay_protocol::{
    AppError, Application, DynApplication, Header, RequestInfo, RequestQuery, ResponseEndBlock,
    ResponseInfo, ResponseQuery, TxResult, Validator,
};
use bytes::Bytes;
use tracing::{Dispatch, info, warn};

use crate::decision::{ForwardingDecision, classify, echo_log};

/// Interception prefix used when none is configured.
pub const DEFAULT_PREFIX: &[u8] = b"echo:";

#[derive(Debug, Clone, Copy)]
enum TxKind {
    Check,
    Deliver,
}

impl TxKind {
    fn operation(self) -> &'static str {
        match self {
            Self::Check => "check_tx",
            Self::Deliver => "deliver_tx",
        }
    }
}

/// Application that relays every call to a downstream delegate, except
/// transactions carrying the interception prefix, which it echoes back.
///
/// The proxy holds no mutable state: the prefix, the log sink and the
/// delegate are fixed at construction, so concurrent calls need no locking.
/// It never retries. Delegate failures are returned as
/// [`AppError::Downstream`], which keeps them distinct from locally answered
/// calls.
///
/// Each call first writes an `info` record naming the operation and its
/// notable arguments into the log sink. The sink defaults to
/// [`Dispatch::none`], which discards everything.
pub struct ProxyApplication {
    next: Arc<dyn DynApplication>,
    prefix: Bytes,
    dispatch: Dispatch,
}

impl std::fmt::Debug for ProxyApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyApplication")
            .field("prefix", &String::from_utf8_lossy(&self.prefix))
            .finish_non_exhaustive()
    }
}

impl ProxyApplication {
    /// Create a proxy in front of `next` intercepting transactions that start
    /// with `prefix`.
    pub fn new(next: Arc<dyn DynApplication>, prefix: impl Into<Bytes>) -> Self {
        Self {
            next,
            prefix: prefix.into(),
            dispatch: Dispatch::none(),
        }
    }

    /// Write the per-call records into `dispatch`.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// The configured interception prefix.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// How a transaction would be handled.
    pub fn decision(&self, tx: &[u8]) -> ForwardingDecision {
        classify(&self.prefix, tx)
    }

    fn record(&self, emit: impl FnOnce()) {
        tracing::dispatcher::with_default(&self.dispatch, emit);
    }

    fn downstream_failure(&self, operation: &'static str, error: AppError) -> AppError {
        self.record(|| warn!(operation, error = %error, "downstream call failed"));
        AppError::downstream(operation, error)
    }

    async fn handle_tx(&self, kind: TxKind, tx: &[u8]) -> Result<TxResult, AppError> {
        let operation = kind.operation();
        let decision = self.decision(tx);
        self.record(|| {
            info!(
                operation,
                tx = %String::from_utf8_lossy(tx),
                %decision,
                "proxy call"
            );
        });

        match decision {
            ForwardingDecision::Intercepted => {
                Ok(TxResult::ok(Vec::new(), echo_log(&self.prefix, tx)))
            }
            ForwardingDecision::Relayed => {
                let relayed = match kind {
                    TxKind::Check => self.next.check_tx(tx).await,
                    TxKind::Deliver => self.next.deliver_tx(tx).await,
                };
                relayed.map_err(|e| self.downstream_failure(operation, e))
            }
        }
    }
}

impl Application for ProxyApplication {
    async fn info(&self, request: RequestInfo) -> Result<ResponseInfo, AppError> {
        self.record(|| info!(operation = "info", version = %request.version, "proxy call"));
        self.next
            .info(request)
            .await
            .map_err(|e| self.downstream_failure("info", e))
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<String, AppError> {
        self.record(|| info!(operation = "set_option", key, value, "proxy call"));
        self.next
            .set_option(key, value)
            .await
            .map_err(|e| self.downstream_failure("set_option", e))
    }

    async fn check_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
        self.handle_tx(TxKind::Check, tx).await
    }

    async fn deliver_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
        self.handle_tx(TxKind::Deliver, tx).await
    }

    async fn commit(&self) -> Result<TxResult, AppError> {
        self.record(|| info!(operation = "commit", "proxy call"));
        self.next
            .commit()
            .await
            .map_err(|e| self.downstream_failure("commit", e))
    }

    async fn query(&self, request: RequestQuery) -> Result<ResponseQuery, AppError> {
        self.record(|| {
            info!(
                operation = "query",
                path = %request.path,
                height = request.height,
                prove = request.prove,
                "proxy call"
            );
        });
        self.next
            .query(request)
            .await
            .map_err(|e| self.downstream_failure("query", e))
    }

    async fn init_chain(&self, validators: &[Validator]) -> Result<(), AppError> {
        self.record(|| info!(operation = "init_chain", validators = validators.len(), "proxy call"));
        self.next
            .init_chain(validators)
            .await
            .map_err(|e| self.downstream_failure("init_chain", e))
    }

    async fn begin_block(&self, hash: &[u8], header: &Header) -> Result<(), AppError> {
        self.record(|| {
            info!(
                operation = "begin_block",
                hash = ?hash,
                height = header.height,
                chain_id = %header.chain_id,
                "proxy call"
            );
        });
        self.next
            .begin_block(hash, header)
            .await
            .map_err(|e| self.downstream_failure("begin_block", e))
    }

    async fn end_block(&self, height: u64) -> Result<ResponseEndBlock, AppError> {
        self.record(|| info!(operation = "end_block", height, "proxy call"));
        self.next
            .end_block(height)
            .await
            .map_err(|e| self.downstream_failure("end_block", e))
    }
}
