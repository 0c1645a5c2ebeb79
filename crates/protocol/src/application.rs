use std::future::Future;

use async_trait::async_trait;

use crate::error::AppError;
use crate::types::{
    Header, Request, RequestInfo, RequestQuery, Response, ResponseEndBlock, ResponseInfo,
    ResponseQuery, TxResult, Validator,
};

/// Strongly-typed application trait with native `async fn`.
///
/// Every operation has a base implementation answering with an empty,
/// successful response, so an application overrides only the calls it cares
/// about.
///
/// This trait is **not** object-safe. Every `Application` automatically
/// implements [`DynApplication`], which is what servers and proxies hold.
pub trait Application: Send + Sync {
    /// Return metadata about the application state.
    fn info(
        &self,
        _request: RequestInfo,
    ) -> impl Future<Output = Result<ResponseInfo, AppError>> + Send {
        async { Ok(ResponseInfo::default()) }
    }

    /// Set a non-consensus option; returns a diagnostic log line.
    fn set_option(
        &self,
        _key: &str,
        _value: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send {
        async { Ok(String::new()) }
    }

    /// Validate a transaction before it enters the mempool.
    fn check_tx(&self, _tx: &[u8]) -> impl Future<Output = Result<TxResult, AppError>> + Send {
        async { Ok(TxResult::default()) }
    }

    /// Execute a transaction in the current block.
    fn deliver_tx(&self, _tx: &[u8]) -> impl Future<Output = Result<TxResult, AppError>> + Send {
        async { Ok(TxResult::default()) }
    }

    /// Persist the current block; `data` carries the application hash.
    fn commit(&self) -> impl Future<Output = Result<TxResult, AppError>> + Send {
        async { Ok(TxResult::default()) }
    }

    /// Read application state.
    fn query(
        &self,
        _request: RequestQuery,
    ) -> impl Future<Output = Result<ResponseQuery, AppError>> + Send {
        async { Ok(ResponseQuery::default()) }
    }

    /// Receive the genesis validator set.
    fn init_chain(
        &self,
        _validators: &[Validator],
    ) -> impl Future<Output = Result<(), AppError>> + Send {
        async { Ok(()) }
    }

    /// Signal the start of a block.
    fn begin_block(
        &self,
        _hash: &[u8],
        _header: &Header,
    ) -> impl Future<Output = Result<(), AppError>> + Send {
        async { Ok(()) }
    }

    /// Signal the end of a block; returns validator set changes.
    fn end_block(
        &self,
        _height: u64,
    ) -> impl Future<Output = Result<ResponseEndBlock, AppError>> + Send {
        async { Ok(ResponseEndBlock::default()) }
    }
}

/// Object-safe application trait for use behind `Arc<dyn DynApplication>`.
///
/// Do not implement this directly; implement [`Application`] and rely on the
/// blanket implementation.
#[async_trait]
pub trait DynApplication: Send + Sync {
    async fn info(&self, request: RequestInfo) -> Result<ResponseInfo, AppError>;

    async fn set_option(&self, key: &str, value: &str) -> Result<String, AppError>;

    async fn check_tx(&self, tx: &[u8]) -> Result<TxResult, AppError>;

    async fn deliver_tx(&self, tx: &[u8]) -> Result<TxResult, AppError>;

    async fn commit(&self) -> Result<TxResult, AppError>;

    async fn query(&self, request: RequestQuery) -> Result<ResponseQuery, AppError>;

    async fn init_chain(&self, validators: &[Validator]) -> Result<(), AppError>;

    async fn begin_block(&self, hash: &[u8], header: &Header) -> Result<(), AppError>;

    async fn end_block(&self, height: u64) -> Result<ResponseEndBlock, AppError>;
}

#[async_trait]
impl<T: Application + Sync> DynApplication for T {
    async fn info(&self, request: RequestInfo) -> Result<ResponseInfo, AppError> {
        Application::info(self, request).await
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<String, AppError> {
        Application::set_option(self, key, value).await
    }

    async fn check_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
        Application::check_tx(self, tx).await
    }

    async fn deliver_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
        Application::deliver_tx(self, tx).await
    }

    async fn commit(&self) -> Result<TxResult, AppError> {
        Application::commit(self).await
    }

    async fn query(&self, request: RequestQuery) -> Result<ResponseQuery, AppError> {
        Application::query(self, request).await
    }

    async fn init_chain(&self, validators: &[Validator]) -> Result<(), AppError> {
        Application::init_chain(self, validators).await
    }

    async fn begin_block(&self, hash: &[u8], header: &Header) -> Result<(), AppError> {
        Application::begin_block(self, hash, header).await
    }

    async fn end_block(&self, height: u64) -> Result<ResponseEndBlock, AppError> {
        Application::end_block(self, height).await
    }
}

/// Run one wire request against `app`, turning failures into
/// [`Response::Exception`].
pub async fn handle_request(app: &dyn DynApplication, request: Request) -> Response {
    let result = match request {
        Request::Info(req) => app.info(req).await.map(Response::Info),
        Request::SetOption { key, value } => app
            .set_option(&key, &value)
            .await
            .map(|log| Response::SetOption { log }),
        Request::CheckTx { tx } => app.check_tx(&tx).await.map(Response::CheckTx),
        Request::DeliverTx { tx } => app.deliver_tx(&tx).await.map(Response::DeliverTx),
        Request::Commit => app.commit().await.map(Response::Commit),
        Request::Query(req) => app.query(req).await.map(Response::Query),
        Request::InitChain { validators } => app
            .init_chain(&validators)
            .await
            .map(|()| Response::InitChain),
        Request::BeginBlock { hash, header } => app
            .begin_block(&hash, &header)
            .await
            .map(|()| Response::BeginBlock),
        Request::EndBlock { height } => app.end_block(height).await.map(Response::EndBlock),
    };

    result.unwrap_or_else(|e| Response::Exception {
        error: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// Application that only overrides `deliver_tx` and `query`.
    struct CounterApp {
        fail_queries: bool,
    }

    impl Application for CounterApp {
        async fn deliver_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
            Ok(TxResult::ok(tx.to_vec(), format!("{} bytes", tx.len())))
        }

        async fn query(&self, request: RequestQuery) -> Result<ResponseQuery, AppError> {
            if self.fail_queries {
                return Err(AppError::ExecutionFailed(format!(
                    "unknown path {}",
                    request.path
                )));
            }
            Ok(ResponseQuery {
                value: request.data,
                ..ResponseQuery::default()
            })
        }
    }

    #[tokio::test]
    async fn base_implementations_answer_ok() {
        let app = CounterApp {
            fail_queries: false,
        };
        let info = Application::info(&app, RequestInfo::default()).await.unwrap();
        assert_eq!(info, ResponseInfo::default());

        let result = Application::check_tx(&app, b"abc").await.unwrap();
        assert!(result.is_ok());

        Application::init_chain(&app, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn blanket_dyn_application_impl() {
        let app: Arc<dyn DynApplication> = Arc::new(CounterApp {
            fail_queries: false,
        });
        let result = app.deliver_tx(b"hello").await.unwrap();
        assert_eq!(result.log, "5 bytes");
        assert_eq!(result.data, b"hello");
    }

    #[tokio::test]
    async fn handle_request_maps_each_operation() {
        let app = CounterApp {
            fail_queries: false,
        };

        let response = handle_request(&app, Request::DeliverTx { tx: b"xy".to_vec() }).await;
        assert_eq!(response, Response::DeliverTx(TxResult::ok(b"xy".to_vec(), "2 bytes")));

        let response = handle_request(&app, Request::Commit).await;
        assert_eq!(response, Response::Commit(TxResult::default()));

        let response = handle_request(
            &app,
            Request::BeginBlock {
                hash: vec![1, 2],
                header: Header::default(),
            },
        )
        .await;
        assert_eq!(response, Response::BeginBlock);
    }

    #[tokio::test]
    async fn handle_request_reports_failures_as_exceptions() {
        let app = CounterApp { fail_queries: true };
        let response = handle_request(
            &app,
            Request::Query(RequestQuery {
                path: "/missing".into(),
                ..RequestQuery::default()
            }),
        )
        .await;
        assert_eq!(
            response,
            Response::Exception {
                error: "execution failed: unknown path /missing".into()
            }
        );
    }
}
