// WebSocket message envelope for the crewline-gateway.v1 protocol.
//
// Inbound frames are UTF-8 JSON objects carrying a `type` discriminator plus
// arbitrary handler-specific fields, so the envelope keeps the payload as a
// raw JSON map instead of enumerating every business message shape. Outbound
// gateway-originated frames are fully typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hard upper bound on a serialized inbound message, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 10_000;

/// Messages serialized larger than this are candidates for compressed sends.
/// A soft optimization threshold, not a validation boundary.
pub const COMPRESSION_THRESHOLD_BYTES: usize = 1_024;

/// Message types the gateway will dispatch. Anything else is rejected at
/// validation time before reaching a handler.
pub const ALLOWED_MESSAGE_TYPES: &[&str] = &[
    "chat_message",
    "message",
    "typing",
    "typing_start",
    "typing_stop",
    "mark_read",
    "read_receipt",
    "ping",
    "pong",
    "status_update",
    "notification_read",
];

pub fn is_allowed_message_type(message_type: &str) -> bool {
    ALLOWED_MESSAGE_TYPES.contains(&message_type)
}

/// A validated inbound message: the `type` discriminator plus the full
/// payload object (including the `type` key) as received, post-sanitization.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_type: String,
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self { message_type: message_type.into(), payload }
    }

    /// Serialized size of the payload in bytes, as it would go on the wire.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(&self.payload).map(|raw| raw.len()).unwrap_or(0)
    }
}

/// Outbound error frame: `{"type":"error","error":"<human-readable>"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub error: String,
}

impl ErrorFrame {
    pub fn new(error: impl Into<String>) -> Self {
        Self { frame_type: "error".to_string(), error: error.into() }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":"internal error"}"#.to_string()
        })
    }
}
