//! The relay envelope: the outer `{type, id?, payload?}` object the
//! transport layer forwards without inspecting the payload.

use crate::error_code::{ErrorBody, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outer envelope for `rpc-request` / `rpc-response` / `rpc-event` frames
/// and the error envelopes the router synthesizes in their place.
///
/// The inner `payload` is opaque: it is carried as raw JSON and never
/// interpreted by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame type, e.g. `rpc-request`
    #[serde(rename = "type")]
    pub kind: String,
    /// Correlation id; required for request/response frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Opaque inner payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error body for synthesized error envelopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    /// A request envelope bound for a cardhost.
    pub fn request(id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: "rpc-request".to_string(),
            id: Some(id.into()),
            payload: Some(payload),
            error: None,
        }
    }

    /// A response envelope bound for a controller.
    pub fn response(id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: "rpc-response".to_string(),
            id: Some(id.into()),
            payload: Some(payload),
            error: None,
        }
    }

    /// An error envelope synthesized by the router, carrying the request id
    /// it answers when one exists.
    pub fn error(id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            id,
            payload: None,
            error: Some(ErrorBody::new(code, message)),
        }
    }

    /// Parse an envelope from an incoming frame value, ignoring unknown
    /// fields. Returns `None` when the value is not an object with a string
    /// `type`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?.to_string();
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let payload = value.get("payload").cloned();
        Some(Self {
            kind,
            id,
            payload,
            error: None,
        })
    }
}
