//! Forwarding proxy between a consensus engine and a backing application.
//!
//! [`ProxyApplication`] implements the whole application protocol. Every call
//! is relayed to a single downstream delegate, except transactions starting
//! with the configured interception prefix: those are answered locally with
//! an echo and never reach the delegate.

pub mod decision;
pub mod proxy;

pub use decision::{ForwardingDecision, classify, echo_log};
pub use proxy::{DEFAULT_PREFIX, ProxyApplication};
