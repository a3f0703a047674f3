//! # CardLink Wire Types
//!
//! The JSON message catalogue spoken over both WebSocket endpoints, the
//! relay envelope, and the stable error codes. One message per text frame;
//! unknown fields are ignored, never rejected.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod envelope;
pub mod error_code;
pub mod message;

pub use envelope::Envelope;
pub use error_code::{ErrorBody, ErrorCode};
pub use message::WireMessage;

/// WebSocket close code: normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code: policy violation (auth failure).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code: internal error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
