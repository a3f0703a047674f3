//! # CardLink Router Runtime
//!
//! Entry point for the router process. Configuration comes from `PORT` and
//! `HOST`; all state is in-memory and nothing is persisted across
//! restarts.

use anyhow::Result;
use cardlink_router::{RouterConfig, RouterService};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; RUST_LOG overrides the default level
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("===========================================");
    info!("  CardLink Router v{}", cardlink_router::VERSION);
    info!("===========================================");

    let config = RouterConfig::from_env()?;
    info!(host = %config.host, port = config.port, "Configuration loaded");

    let mut service = RouterService::new(config)?;
    let addr = service.start().await?;
    info!(addr = %addr, "Router is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down gracefully...");
    service.stop();

    Ok(())
}
