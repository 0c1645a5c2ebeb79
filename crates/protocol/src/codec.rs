//! Frame codec shared by [`AbciServer`](crate::AbciServer) and
//! [`AbciClient`](crate::AbciClient).
//!
//! Each frame is a 4-byte big-endian length followed by a JSON
//! [`Envelope`]. The envelope id lets the client match a response to the
//! request it sent.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::AppError;

/// Largest frame either side accepts.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// A TCP stream split into length-delimited frames.
pub type FrameTransport = Framed<TcpStream, LengthDelimitedCodec>;

/// Wrap a connected stream in the frame codec.
pub fn framed(stream: TcpStream) -> FrameTransport {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_framed(stream)
}

/// A request or response tagged with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

/// Serialize `body` under `id` into a frame payload.
pub fn encode<T: Serialize>(id: u64, body: &T) -> Result<Bytes, AppError> {
    serde_json::to_vec(&Envelope { id, body })
        .map(Bytes::from)
        .map_err(|e| AppError::Serialization(e.to_string()))
}

/// Parse a frame payload.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<Envelope<T>, AppError> {
    serde_json::from_slice(frame).map_err(|e| AppError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Request;

    #[test]
    fn envelope_carries_id_and_body() {
        let frame = encode(42, &Request::CheckTx { tx: b"ab".to_vec() }).unwrap();
        let decoded: Envelope<Request> = decode(&frame).unwrap();
        assert_eq!(decoded.id, 42);
        assert_eq!(decoded.body, Request::CheckTx { tx: b"ab".to_vec() });
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        let err = decode::<Request>(b"{not json").unwrap_err();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
