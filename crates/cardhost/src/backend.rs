//! Card backend abstraction and the mock smart-card.
//!
//! The agent never interprets APDU payloads itself; it hands the opaque
//! payload to the backend and relays whatever comes back.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

/// Backend failures. The agent still answers the request: a failure is
/// mapped to an error payload so the controller always sees a response.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend used before initialization completed
    #[error("card backend not initialized")]
    NotInitialized,
    /// Payload did not carry what the backend expects
    #[error("malformed APDU payload: {0}")]
    MalformedPayload(String),
    /// Device-level failure
    #[error("card device error: {0}")]
    Device(String),
}

/// A smart-card stack the agent can drive.
#[async_trait]
pub trait CardBackend: Send + Sync {
    /// Bring the card stack up. Called on `controller-connected`;
    /// idempotent so repeated notifications are harmless.
    async fn initialize(&self) -> Result<(), BackendError>;

    /// Execute one APDU exchange. The payload is whatever the controller
    /// sent; the returned value becomes the response payload verbatim.
    async fn transmit(&self, payload: &Value) -> Result<Value, BackendError>;
}

/// In-memory mock card: scriptable APDU table with a `9000` default.
///
/// Payloads are expected to carry the command as `{"hex": "<apdu>"}` and
/// answers come back as `{"hex": "<data>", "sw": "<status word>"}`.
#[derive(Default)]
pub struct MockSmartCard {
    initialized: AtomicBool,
    responses: Mutex<HashMap<String, ScriptedReply>>,
    received: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
struct ScriptedReply {
    data_hex: String,
    sw: String,
}

impl MockSmartCard {
    /// An empty mock answering everything with `sw=9000`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a reply for an exact APDU hex string.
    pub fn script(&self, apdu_hex: impl Into<String>, data_hex: impl Into<String>, sw: impl Into<String>) {
        self.responses.lock().insert(
            apdu_hex.into().to_uppercase(),
            ScriptedReply {
                data_hex: data_hex.into(),
                sw: sw.into(),
            },
        );
    }

    /// Whether `initialize` has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// APDUs observed so far, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl CardBackend for MockSmartCard {
    async fn initialize(&self) -> Result<(), BackendError> {
        if !self.initialized.swap(true, Ordering::Relaxed) {
            debug!("Mock card initialized");
        }
        Ok(())
    }

    async fn transmit(&self, payload: &Value) -> Result<Value, BackendError> {
        if !self.initialized.load(Ordering::Relaxed) {
            return Err(BackendError::NotInitialized);
        }
        let apdu_hex = payload
            .get("hex")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::MalformedPayload("missing 'hex' field".into()))?
            .to_uppercase();

        if hex::decode(&apdu_hex).is_err() {
            return Err(BackendError::MalformedPayload("'hex' is not valid hex".into()));
        }

        self.received.lock().push(apdu_hex.clone());

        let reply = self
            .responses
            .lock()
            .get(&apdu_hex)
            .cloned()
            .unwrap_or(ScriptedReply {
                data_hex: String::new(),
                sw: "9000".to_string(),
            });

        Ok(json!({"hex": reply.data_hex, "sw": reply.sw}))
    }
}
