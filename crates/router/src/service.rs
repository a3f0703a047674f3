//! Router service: axum application, operational HTTP surface, and the
//! start/stop lifecycle with its periodic cleanup task.

use crate::auth::AuthService;
use crate::domain::config::RouterConfig;
use crate::domain::error::RouterError;
use crate::sessions::SessionService;
use crate::transport::TransportService;
use crate::ws;
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Shared state behind every socket and HTTP handler.
pub struct RouterState {
    /// Static configuration
    pub config: RouterConfig,
    /// Controller-side authentication domain
    pub controller_auth: AuthService,
    /// Cardhost-side authentication domain
    pub cardhost_auth: AuthService,
    /// Session issuance and binding
    pub sessions: SessionService,
    /// Sinks and relay correlation
    pub transport: TransportService,
    /// Whether the service is accepting work
    pub running: AtomicBool,
}

impl RouterState {
    fn new(config: RouterConfig) -> Self {
        let timeouts = &config.timeouts;
        Self {
            controller_auth: AuthService::new(timeouts.challenge_ttl),
            cardhost_auth: AuthService::new(timeouts.challenge_ttl),
            sessions: SessionService::new(timeouts.session_ttl, timeouts.session_idle),
            transport: TransportService::new(timeouts.relay, timeouts.write),
            running: AtomicBool::new(false),
            config,
        }
    }

    /// Operational counters for `/stats`.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            running: self.running.load(Ordering::Relaxed),
            active_controllers: self.controller_auth.authenticated_count(),
            active_cardhosts: self.cardhost_auth.authenticated_count(),
            active_sessions: self.sessions.count(),
            connected_cardhosts: self.transport.connected_cardhost_count(),
        }
    }
}

/// Snapshot served by `GET /stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    /// Whether the service is accepting work
    pub running: bool,
    /// Authenticated controllers
    pub active_controllers: usize,
    /// Authenticated cardhosts
    pub active_cardhosts: usize,
    /// Live sessions
    pub active_sessions: usize,
    /// Cardhost sinks registered in the transport
    pub connected_cardhosts: usize,
}

/// The router process: owns the listener, the cleanup ticker, and shared
/// state.
pub struct RouterService {
    state: Arc<RouterState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    cleanup_handle: Option<JoinHandle<()>>,
    server_handle: Option<JoinHandle<()>>,
}

impl RouterService {
    /// Create a service from validated configuration.
    pub fn new(config: RouterConfig) -> Result<Self, RouterError> {
        config.validate()?;
        Ok(Self {
            state: Arc::new(RouterState::new(config)),
            shutdown_tx: None,
            cleanup_handle: None,
            server_handle: None,
        })
    }

    /// Shared state handle (tests drive services through this).
    pub fn state(&self) -> Arc<RouterState> {
        Arc::clone(&self.state)
    }

    /// Build the axum application.
    pub fn app(&self) -> Router {
        build_app(Arc::clone(&self.state))
    }

    /// Bind the listener, start the cleanup ticker, and serve. Returns the
    /// bound address (useful with port 0 in tests).
    pub async fn start(&mut self) -> Result<SocketAddr, RouterError> {
        let addr = self.state.config.addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| RouterError::Bind(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RouterError::Bind(e.to_string()))?;

        self.state.running.store(true, Ordering::Relaxed);
        self.cleanup_handle = Some(spawn_cleanup_task(Arc::clone(&self.state)));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = self.app();
        self.server_handle = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "Server error");
            }
        }));

        info!(addr = %local_addr, "Router listening");
        Ok(local_addr)
    }

    /// Stop accepting work: cancel the ticker, drain pending requests with
    /// a shutdown error, and release the listener.
    pub fn stop(&mut self) {
        self.state.running.store(false, Ordering::Relaxed);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
        self.state.transport.shutdown();
        info!("Router stopped");
    }
}

impl Drop for RouterService {
    fn drop(&mut self) {
        if self.state.running.load(Ordering::Relaxed) {
            self.stop();
        }
    }
}

fn spawn_cleanup_task(state: Arc<RouterState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.timeouts.cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let expired = state.sessions.cleanup_expired();
            let idle = state.sessions.cleanup_idle();
            let challenges = state.controller_auth.cleanup_expired_challenges()
                + state.cardhost_auth.cleanup_expired_challenges();
            let swept = state.transport.sweep_expired();
            if expired + idle + challenges + swept > 0 {
                debug!(
                    expired_sessions = expired,
                    idle_sessions = idle,
                    expired_challenges = challenges,
                    swept_requests = swept,
                    "Periodic cleanup pass"
                );
            }
        }
    })
}

fn build_app(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/ws/controller", get(controller_upgrade))
        .route("/ws/cardhost", get(cardhost_upgrade))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn controller_upgrade(
    State(state): State<Arc<RouterState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| ws::controller::handle(state, socket))
}

async fn cardhost_upgrade(
    State(state): State<Arc<RouterState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| ws::cardhost::handle(state, socket))
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "running": state.running.load(Ordering::Relaxed),
    }))
}

async fn stats(State(state): State<Arc<RouterState>>) -> Json<RouterStats> {
    Json(state.stats())
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not found"})),
    )
}
