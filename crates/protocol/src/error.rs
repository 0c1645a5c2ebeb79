use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by protocol operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// The application could not handle the call.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The remote application answered with an exception.
    #[error("remote application error: {0}")]
    Remote(String),

    /// A network or transport-level error occurred during the round trip.
    #[error("connection error: {0}")]
    Connection(String),

    /// The client was closed before the call was made.
    #[error("connection closed")]
    Closed,

    /// The peer answered with a response for a different operation.
    #[error("unexpected response to {expected}: got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A relayed call failed in the downstream application.
    #[error("{operation} failed downstream: {source}")]
    Downstream {
        operation: &'static str,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Wrap an error returned by a downstream delegate.
    pub fn downstream(operation: &'static str, source: AppError) -> Self {
        Self::Downstream {
            operation,
            source: Box::new(source),
        }
    }

    /// Returns `true` if the failure happened on the wire rather than inside
    /// an application.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Closed | Self::Serialization(_) => true,
            Self::Downstream { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

/// Errors raised while binding, dialing, or shutting down a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Every dial attempt failed.
    #[error("failed to connect to {addr} after {attempts} attempt(s): {source}")]
    Connect {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The transport did not stop within the allowed duration.
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        assert!(AppError::Connection("reset".into()).is_transport());
        assert!(AppError::Closed.is_transport());
        assert!(!AppError::Remote("nope".into()).is_transport());
        assert!(!AppError::ExecutionFailed("nope".into()).is_transport());
    }

    #[test]
    fn downstream_wraps_and_classifies_source() {
        let err = AppError::downstream("info", AppError::Connection("refused".into()));
        assert!(err.is_transport());
        assert_eq!(
            err.to_string(),
            "info failed downstream: connection error: refused"
        );

        let err = AppError::downstream("query", AppError::Remote("bad path".into()));
        assert!(!err.is_transport());
    }

    #[test]
    fn error_display() {
        let err = AppError::UnexpectedResponse {
            expected: "commit",
            got: "info",
        };
        assert_eq!(err.to_string(), "unexpected response to commit: got info");

        let err = TransportError::ShutdownTimeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "shutdown timed out after 250ms");
    }
}
