//! Bridge between one waypoint process and its remote debuggers.
//!
//! The bridge buffers every snapshot and bus event for the lifetime of the
//! process and fans both out over a long-lived SSE stream, replaying the
//! full history to each fresh client before switching it to live delivery.

pub mod http;
pub mod hub;

pub use http::{router, ApiError, AppState, RunError, RunGate, RunRequest};
pub use hub::BridgeHub;
