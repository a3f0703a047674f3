//! Cross-crate integration choreography against a live router.

pub mod harness;

mod auth_flows;
mod ops_surface;
mod relay_flows;
