//! # CardLink Test Suite
//!
//! Unified test crate containing cross-crate choreography:
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs      # router-on-ephemeral-port + raw socket peers
//!     ├── auth_flows.rs   # handshake, re-initiation, phase enforcement
//!     ├── relay_flows.rs  # APDU round-trips, crash/timeout/duplicate paths
//!     └── ops_surface.rs  # /health and /stats
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p cardlink-tests
//! cargo test -p cardlink-tests integration::relay_flows::
//! ```

#[cfg(test)]
pub mod integration;
