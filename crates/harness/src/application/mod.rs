//! Stub applications run behind each node's proxy.

mod recording;

pub use recording::{CapturedCall, FailureMode, RecordingApplication};
