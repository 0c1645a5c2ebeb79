use serde::{Deserialize, Serialize};

/// Result code signalling success.
pub const CODE_OK: u32 = 0;

/// Parameters of an `info` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Version string of the caller, if it chose to send one.
    #[serde(default)]
    pub version: String,
}

/// Application metadata returned by `info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub data: String,
    pub version: String,
    pub last_block_height: u64,
    pub last_block_app_hash: Vec<u8>,
}

/// Outcome of `check_tx`, `deliver_tx` and `commit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    /// [`CODE_OK`] on success, any other value is an application-defined failure.
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
}

impl TxResult {
    /// A successful result carrying `data` and a diagnostic `log`.
    pub fn ok(data: Vec<u8>, log: impl Into<String>) -> Self {
        Self {
            code: CODE_OK,
            data,
            log: log.into(),
        }
    }

    /// A failed result with the given non-zero `code`.
    pub fn error(code: u32, log: impl Into<String>) -> Self {
        Self {
            code,
            data: Vec::new(),
            log: log.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Parameters of a `query` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestQuery {
    pub data: Vec<u8>,
    pub path: String,
    pub height: u64,
    pub prove: bool,
}

/// Answer to a `query` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseQuery {
    pub code: u32,
    pub index: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub proof: Vec<u8>,
    pub height: u64,
    pub log: String,
}

/// A member of the validator set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pub_key: Vec<u8>,
    pub power: u64,
}

/// Block header handed to `begin_block`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub chain_id: String,
    pub height: u64,
    /// Block time in seconds since the Unix epoch.
    pub time: u64,
    pub num_txs: u64,
    pub last_block_hash: Vec<u8>,
    pub app_hash: Vec<u8>,
}

/// Answer to `end_block`: validator power changes to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEndBlock {
    pub diffs: Vec<Validator>,
}

/// A protocol request as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Info(RequestInfo),
    SetOption { key: String, value: String },
    CheckTx { tx: Vec<u8> },
    DeliverTx { tx: Vec<u8> },
    Commit,
    Query(RequestQuery),
    InitChain { validators: Vec<Validator> },
    BeginBlock { hash: Vec<u8>, header: Header },
    EndBlock { height: u64 },
}

impl Request {
    /// The operation name, as used in logs and error messages.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Info(_) => "info",
            Self::SetOption { .. } => "set_option",
            Self::CheckTx { .. } => "check_tx",
            Self::DeliverTx { .. } => "deliver_tx",
            Self::Commit => "commit",
            Self::Query(_) => "query",
            Self::InitChain { .. } => "init_chain",
            Self::BeginBlock { .. } => "begin_block",
            Self::EndBlock { .. } => "end_block",
        }
    }
}

/// A protocol response as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Info(ResponseInfo),
    SetOption { log: String },
    CheckTx(TxResult),
    DeliverTx(TxResult),
    Commit(TxResult),
    Query(ResponseQuery),
    InitChain,
    BeginBlock,
    EndBlock(ResponseEndBlock),
    /// The application failed to handle the request.
    Exception { error: String },
}

impl Response {
    /// The operation name this response answers.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Info(_) => "info",
            Self::SetOption { .. } => "set_option",
            Self::CheckTx(_) => "check_tx",
            Self::DeliverTx(_) => "deliver_tx",
            Self::Commit(_) => "commit",
            Self::Query(_) => "query",
            Self::InitChain => "init_chain",
            Self::BeginBlock => "begin_block",
            Self::EndBlock(_) => "end_block",
            Self::Exception { .. } => "exception",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_result_constructors() {
        let ok = TxResult::ok(b"data".to_vec(), "fine");
        assert!(ok.is_ok());
        assert_eq!(ok.data, b"data");
        assert_eq!(ok.log, "fine");

        let err = TxResult::error(3, "bad nonce");
        assert!(!err.is_ok());
        assert_eq!(err.code, 3);
        assert!(err.data.is_empty());
    }

    #[test]
    fn request_wire_shape_is_tagged() {
        let json = serde_json::to_value(Request::EndBlock { height: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "end_block", "height": 7}));

        let json = serde_json::to_value(Request::Commit).unwrap();
        assert_eq!(json, serde_json::json!({"type": "commit"}));
    }

    #[test]
    fn operation_names_match_between_request_and_response() {
        let pairs = [
            (Request::Info(RequestInfo::default()), Response::Info(ResponseInfo::default())),
            (
                Request::CheckTx { tx: vec![1] },
                Response::CheckTx(TxResult::default()),
            ),
            (
                Request::DeliverTx { tx: vec![1] },
                Response::DeliverTx(TxResult::default()),
            ),
            (
                Request::EndBlock { height: 1 },
                Response::EndBlock(ResponseEndBlock::default()),
            ),
        ];
        for (request, response) in pairs {
            assert_eq!(request.operation(), response.operation());
        }
    }

    #[test]
    fn exception_round_trips() {
        let response = Response::Exception {
            error: "boom".into(),
        };
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded: Response = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, response);
    }
}
