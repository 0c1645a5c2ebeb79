//! Recording application that captures every call for verification.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use abci_relay_protocol::{
    AppError, Application, Header, RequestInfo, RequestQuery, ResponseEndBlock, ResponseInfo,
    ResponseQuery, TxResult, Validator,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Type alias for the transaction response function.
type TxResponseFn = dyn Fn(&[u8]) -> TxResult + Send + Sync;

/// A stub application that records all calls for later verification.
///
/// Transactions are accepted with `TxResult::ok(tx, "accepted")` unless a
/// response function or failure mode says otherwise. Each node of the
/// harness runs one behind its proxy.
pub struct RecordingApplication {
    name: String,
    calls: Arc<Mutex<Vec<CapturedCall>>>,
    counts: Mutex<HashMap<&'static str, usize>>,
    tx_count: AtomicUsize,
    height: AtomicU64,
    tx_response_fn: Option<Arc<TxResponseFn>>,
    failure_mode: FailureMode,
}

impl std::fmt::Debug for RecordingApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingApplication")
            .field("name", &self.name)
            .field("call_count", &self.call_count())
            .field("height", &self.height())
            .field("failure_mode", &self.failure_mode)
            .finish_non_exhaustive()
    }
}

/// A captured call to the application.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    /// Timestamp when the call was made.
    pub timestamp: DateTime<Utc>,
    /// Operation name, e.g. `"deliver_tx"`.
    pub operation: &'static str,
    /// Transaction bytes for `check_tx`/`deliver_tx`, empty otherwise.
    pub payload: Vec<u8>,
    /// The error message if the call failed.
    pub error: Option<String>,
}

/// Mode for simulating transaction failures.
#[derive(Debug, Clone, Default)]
pub enum FailureMode {
    /// Never fail.
    #[default]
    None,
    /// Fail every N transactions.
    EveryN(usize),
    /// Fail the first N transactions.
    FirstN(usize),
    /// Always fail.
    Always,
}

impl Default for RecordingApplication {
    fn default() -> Self {
        Self::new("recording")
    }
}

impl RecordingApplication {
    /// Create a new recording application with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
            counts: Mutex::new(HashMap::new()),
            tx_count: AtomicUsize::new(0),
            height: AtomicU64::new(0),
            tx_response_fn: None,
            failure_mode: FailureMode::None,
        }
    }

    /// Set a custom result for `check_tx` and `deliver_tx`.
    #[must_use]
    pub fn with_tx_response_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> TxResult + Send + Sync + 'static,
    {
        self.tx_response_fn = Some(Arc::new(f));
        self
    }

    /// Set the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get all captured calls.
    pub fn calls(&self) -> Vec<CapturedCall> {
        self.calls.lock().clone()
    }

    /// Total number of calls across all operations.
    pub fn call_count(&self) -> usize {
        self.counts.lock().values().sum()
    }

    /// Number of calls to `operation`.
    pub fn count(&self, operation: &str) -> usize {
        self.counts.lock().get(operation).copied().unwrap_or(0)
    }

    /// Number of committed blocks.
    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    /// Payloads passed to `operation`, in call order.
    pub fn payloads(&self, operation: &str) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.payload.clone())
            .collect()
    }

    /// Get the last captured call, if any.
    pub fn last_call(&self) -> Option<CapturedCall> {
        self.calls.lock().last().cloned()
    }

    /// Clear all captured calls and counters.
    pub fn clear(&self) {
        self.calls.lock().clear();
        self.counts.lock().clear();
        self.tx_count.store(0, Ordering::SeqCst);
        self.height.store(0, Ordering::SeqCst);
    }

    /// Assert that `operation` was called exactly N times.
    ///
    /// # Panics
    ///
    /// Panics if `operation` was not called exactly N times.
    pub fn assert_called(&self, operation: &str, n: usize) {
        let count = self.count(operation);
        assert_eq!(
            count, n,
            "expected {} calls to {} on application '{}', got {}",
            n, operation, self.name, count
        );
    }

    /// Assert that `operation` was never called.
    ///
    /// # Panics
    ///
    /// Panics if `operation` was called.
    pub fn assert_not_called(&self, operation: &str) {
        let count = self.count(operation);
        assert_eq!(
            count, 0,
            "expected no calls to {} on application '{}', got {}",
            operation, self.name, count
        );
    }

    fn record(&self, operation: &'static str, payload: &[u8], error: Option<String>) {
        *self.counts.lock().entry(operation).or_insert(0) += 1;
        self.calls.lock().push(CapturedCall {
            timestamp: Utc::now(),
            operation,
            payload: payload.to_vec(),
            error,
        });
    }

    fn should_fail(&self, tx_number: usize) -> bool {
        match &self.failure_mode {
            FailureMode::None => false,
            FailureMode::EveryN(n) => *n != 0 && tx_number.is_multiple_of(*n),
            FailureMode::FirstN(n) => tx_number <= *n,
            FailureMode::Always => true,
        }
    }

    fn handle_tx(&self, operation: &'static str, tx: &[u8]) -> Result<TxResult, AppError> {
        let tx_number = self.tx_count.fetch_add(1, Ordering::SeqCst) + 1;
        let result = if self.should_fail(tx_number) {
            Err(AppError::ExecutionFailed(format!(
                "simulated failure on transaction #{tx_number}"
            )))
        } else if let Some(ref response_fn) = self.tx_response_fn {
            Ok(response_fn(tx))
        } else {
            Ok(TxResult::ok(tx.to_vec(), "accepted"))
        };
        self.record(
            operation,
            tx,
            result.as_ref().err().map(ToString::to_string),
        );
        result
    }
}

impl Application for RecordingApplication {
    async fn info(&self, _request: RequestInfo) -> Result<ResponseInfo, AppError> {
        self.record("info", &[], None);
        Ok(ResponseInfo {
            data: self.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            last_block_height: self.height(),
            last_block_app_hash: Vec::new(),
        })
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<String, AppError> {
        self.record("set_option", &[], None);
        Ok(format!("{key}={value}"))
    }

    async fn check_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
        self.handle_tx("check_tx", tx)
    }

    async fn deliver_tx(&self, tx: &[u8]) -> Result<TxResult, AppError> {
        self.handle_tx("deliver_tx", tx)
    }

    async fn commit(&self) -> Result<TxResult, AppError> {
        self.record("commit", &[], None);
        let height = self.height.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TxResult::ok(height.to_be_bytes().to_vec(), ""))
    }

    async fn query(&self, request: RequestQuery) -> Result<ResponseQuery, AppError> {
        self.record("query", &request.data, None);
        Ok(ResponseQuery {
            key: request.data,
            height: self.height(),
            ..ResponseQuery::default()
        })
    }

    async fn init_chain(&self, _validators: &[Validator]) -> Result<(), AppError> {
        self.record("init_chain", &[], None);
        Ok(())
    }

    async fn begin_block(&self, _hash: &[u8], _header: &Header) -> Result<(), AppError> {
        self.record("begin_block", &[], None);
        Ok(())
    }

    async fn end_block(&self, _height: u64) -> Result<ResponseEndBlock, AppError> {
        self.record("end_block", &[], None);
        Ok(ResponseEndBlock::default())
    }
}

#[cfg(test)]
mod tests {
    use abci_relay_protocol::DynApplication;

    use super::*;

    #[tokio::test]
    async fn records_transactions() {
        let app = RecordingApplication::new("stub");
        let result = Application::deliver_tx(&app, b"hello").await.unwrap();
        assert_eq!(result, TxResult::ok(b"hello".to_vec(), "accepted"));

        Application::check_tx(&app, b"world").await.unwrap();

        app.assert_called("deliver_tx", 1);
        app.assert_called("check_tx", 1);
        app.assert_not_called("commit");
        assert_eq!(app.call_count(), 2);
        assert_eq!(app.payloads("deliver_tx"), vec![b"hello".to_vec()]);

        let last = app.last_call().unwrap();
        assert_eq!(last.operation, "check_tx");
        assert_eq!(last.payload, b"world");
        assert!(last.error.is_none());
    }

    #[tokio::test]
    async fn custom_tx_response() {
        let app = RecordingApplication::new("stub")
            .with_tx_response_fn(|tx| TxResult::error(7, format!("rejected {} bytes", tx.len())));
        let result = Application::check_tx(&app, b"abc").await.unwrap();
        assert_eq!(result.code, 7);
        assert_eq!(result.log, "rejected 3 bytes");
    }

    #[tokio::test]
    async fn failure_mode_first_n() {
        let app = RecordingApplication::new("flaky").with_failure_mode(FailureMode::FirstN(2));

        assert!(Application::deliver_tx(&app, b"1").await.is_err());
        assert!(Application::deliver_tx(&app, b"2").await.is_err());
        assert!(Application::deliver_tx(&app, b"3").await.is_ok());

        app.assert_called("deliver_tx", 3);
        let calls = app.calls();
        assert!(calls[0].error.as_deref().unwrap().contains("#1"));
        assert!(calls[2].error.is_none());
    }

    #[tokio::test]
    async fn failure_mode_every_n() {
        let app = RecordingApplication::new("flaky").with_failure_mode(FailureMode::EveryN(3));
        let mut failures = 0;
        for _ in 0..9 {
            if Application::check_tx(&app, b"tx").await.is_err() {
                failures += 1;
            }
        }
        assert_eq!(failures, 3);
    }

    #[tokio::test]
    async fn commit_advances_height() {
        let app = RecordingApplication::default();
        let first = Application::commit(&app).await.unwrap();
        let second = Application::commit(&app).await.unwrap();
        assert_eq!(first.data, 1u64.to_be_bytes());
        assert_eq!(second.data, 2u64.to_be_bytes());

        let info = Application::info(&app, RequestInfo::default()).await.unwrap();
        assert_eq!(info.last_block_height, 2);
        assert_eq!(info.data, "recording");
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let app: Arc<RecordingApplication> = Arc::new(RecordingApplication::default());
        let dyn_app: Arc<dyn DynApplication> = app.clone();
        dyn_app.deliver_tx(b"x").await.unwrap();
        dyn_app.commit().await.unwrap();

        app.clear();
        assert_eq!(app.call_count(), 0);
        assert_eq!(app.height(), 0);
        assert!(app.last_call().is_none());
    }
}
