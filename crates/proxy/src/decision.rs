use std::fmt;

/// How the proxy treats an inbound transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingDecision {
    /// Answered locally; the downstream application never sees it.
    Intercepted,
    /// Relayed unchanged to the downstream application.
    Relayed,
}

impl fmt::Display for ForwardingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intercepted => f.write_str("intercepted"),
            Self::Relayed => f.write_str("relayed"),
        }
    }
}

/// Classify `tx` against the interception `prefix`.
///
/// An empty prefix matches every transaction.
pub fn classify(prefix: &[u8], tx: &[u8]) -> ForwardingDecision {
    if tx.starts_with(prefix) {
        ForwardingDecision::Intercepted
    } else {
        ForwardingDecision::Relayed
    }
}

/// Log line of an intercepted transaction: `"Echo: "` followed by the
/// payload after the prefix, decoded lossily as UTF-8.
///
/// `tx` must start with `prefix`; otherwise the whole payload is echoed.
pub fn echo_log(prefix: &[u8], tx: &[u8]) -> String {
    let rest = tx.strip_prefix(prefix).unwrap_or(tx);
    format!("Echo: {}", String::from_utf8_lossy(rest))
}
