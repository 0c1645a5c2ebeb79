//! Application protocol surface shared by the consensus-facing proxy and the
//! backing application.
//!
//! The crate provides:
//!
//! - the request/response types exchanged for every protocol operation,
//! - the [`Application`] trait (and its object-safe twin [`DynApplication`]),
//! - a length-delimited socket transport: [`AbciServer`] exposes any
//!   application on a TCP address, [`AbciClient`] dials one and is itself an
//!   [`Application`], so it can sit behind a proxy as the downstream delegate.

pub mod application;
pub mod client;
pub mod codec;
pub mod error;
pub mod server;
pub mod types;

pub use application::{Application, DynApplication};
pub use client::{AbciClient, RetryPolicy};
pub use error::{AppError, TransportError};
pub use server::{AbciServer, AbciServerBuilder};
pub use types::{
    CODE_OK, Header, Request, RequestInfo, RequestQuery, Response, ResponseEndBlock, ResponseInfo,
    ResponseQuery, TxResult, Validator,
};
