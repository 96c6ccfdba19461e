//! Gateway wire shapes and normalization.
//!
//! Gateway bodies are loosely typed: the connection state may sit under `instance.state` or
//! `instance.status` in any letter case, and the QR image may be at the top level (`base64`) or
//! nested (`qrcode.base64`). Everything here turns "any shape in" into one [`ConnectStatus`].

use base64::Engine;
use serde::Serialize;
use serde_json::Value;

/// Body for `POST /instance/create`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub instance_name: String,
    pub qrcode: bool,
    pub integration: String,
}

/// Body for `POST /message/sendText/{name}`.
#[derive(Debug, Clone, Serialize)]
pub struct SendTextRequest {
    pub number: String,
    pub text: String,
}

/// Canonical connection state reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Paired and usable. The only success terminal.
    Open,
    Connecting,
    Close,
    /// Any other value, lowercased.
    Other(String),
    /// No state field in the body.
    Unknown,
}

impl ConnectionState {
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim().to_lowercase();
        match s.as_str() {
            "open" => Self::Open,
            "connecting" => Self::Connecting,
            "close" | "closed" => Self::Close,
            "" => Self::Unknown,
            _ => Self::Other(s),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A successful connect/status body, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectStatus {
    pub state: ConnectionState,
    /// The state string exactly as the gateway sent it, if any.
    pub raw_state: Option<String>,
    /// QR image payload, if the body carried one.
    pub qr: Option<String>,
}

/// Normalize a `GET /instance/connect/{name}` body. Prefers `instance.state`, falls back to
/// `instance.status`.
pub fn parse_connect_body(body: &Value) -> ConnectStatus {
    let instance = body.get("instance");
    let raw_state = instance
        .and_then(|i| i.get("state"))
        .and_then(Value::as_str)
        .or_else(|| instance.and_then(|i| i.get("status")).and_then(Value::as_str))
        .map(str::to_string);
    let state = raw_state
        .as_deref()
        .map(ConnectionState::parse)
        .unwrap_or(ConnectionState::Unknown);
    ConnectStatus {
        state,
        raw_state,
        qr: qr_from_body(body),
    }
}

/// QR payload from a create or connect body: top-level `base64` or nested `qrcode.base64`.
pub fn qr_from_body(body: &Value) -> Option<String> {
    body.get("base64")
        .and_then(Value::as_str)
        .or_else(|| {
            body.get("qrcode")
                .and_then(|q| q.get("base64"))
                .and_then(Value::as_str)
        })
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decode a QR payload (raw base64 or a `data:image/...;base64,` URI) to image bytes.
pub fn decode_qr_image(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let data = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    base64::engine::general_purpose::STANDARD.decode(data.trim())
}

/// Keep lowercase letters and digits after lowercasing; everything else is dropped.
/// "Sales_Bot!" becomes "salesbot".
pub fn normalize_instance_name(name: &str) -> String {
    name.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}
