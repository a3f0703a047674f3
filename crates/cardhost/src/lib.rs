//! # CardLink Cardhost
//!
//! The cardhost-side agent: authenticates against the router's
//! `/ws/cardhost` endpoint, waits for `controller-connected` to lazily
//! bring up its card backend, and answers every relayed `rpc-request`
//! with exactly one `rpc-response` bearing the same id.
//!
//! The real PC/SC driver lives behind [`CardBackend`]; the bundled
//! [`MockSmartCard`] is the testing surface.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod backend;
pub mod client;

pub use backend::{BackendError, CardBackend, MockSmartCard};
pub use client::{CardhostClient, CardhostError};
