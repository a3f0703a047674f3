//! # CardLink Router
//!
//! The central mediator of the remote smart-card fabric. Controllers and
//! Cardhosts each hold one WebSocket to the router; the router
//! authenticates both ends with an Ed25519 challenge/response handshake,
//! binds an authenticated Controller to a connected Cardhost in a session,
//! and relays length-one JSON frames between them, correlating
//! `rpc-request` / `rpc-response` envelopes by id.
//!
//! # Architecture
//!
//! ```text
//!  Controller ──WS──▶ ┌──────────────────────────────┐ ◀──WS── Cardhost
//!                     │            Router             │
//!                     │  ws handlers (phase machines) │
//!                     │  transport (sinks + pending)  │
//!                     │  auth / session services      │
//!                     │  in-memory repositories       │
//!                     └──────────────────────────────┘
//! ```
//!
//! The relayed payload is opaque: the router keys only on the outer
//! envelope `id` and never parses the inner APDU.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod domain;
pub mod repository;
pub mod service;
pub mod sessions;
pub mod transport;
pub mod ws;

// Re-exports for public API
pub use domain::config::{RouterConfig, TimeoutConfig};
pub use domain::error::{AuthError, RelayError, RouterError};
pub use service::{RouterService, RouterStats};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
