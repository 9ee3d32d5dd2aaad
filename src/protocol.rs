// context-bridge -- wire envelope
//
// Every frame is one UTF-8 JSON object. Frames are decoded into these typed
// records at the socket boundary; nothing past the reader touches raw maps
// except the opaque `data` payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::BridgeContext;
use crate::error::{BridgeError, Result};

// ── Operation names ─────────────────────────────────────────────────────────

pub const OP_HEARTBEAT: &str = "heartbeat";
pub const OP_HEARTBEAT_ACK: &str = "heartbeat_ack";
pub const OP_CONTEXT_SYNC: &str = "context_sync";
pub const OP_CONTEXT_SYNC_ACK: &str = "context_sync_ack";
pub const OP_CONTEXT_REQUEST: &str = "context_request";
pub const OP_CONTEXT_RESPONSE: &str = "context_response";
pub const OP_OPERATION_RESPONSE: &str = "operation_response";

// ── Envelope ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub operation: String,
    /// Epoch seconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<BridgeContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EnvelopeMeta>,
}

impl Envelope {
    pub fn new(operation: impl Into<String>, timestamp: i64) -> Self {
        Self {
            operation: operation.into(),
            timestamp,
            data: Map::new(),
            context: None,
            compressed: None,
            meta: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_context(mut self, context: Option<BridgeContext>) -> Self {
        self.context = context;
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed == Some(true)
    }

    /// Serialize to the text payload of one frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one inbound text frame. Missing `operation`/`timestamp` or a
    /// non-object payload is a protocol error.
    pub fn from_frame(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| BridgeError::Protocol(format!("malformed frame: {e}")))
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }
}

/// Frame-level metadata. Keys other than `compression` are accepted and
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionBlock>,
}

/// Annotation attached to envelopes at or above the size threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionBlock {
    pub algorithm: String,
    pub version: String,
    pub original_size: usize,
    pub compression_factor: f64,
    pub timestamp: i64,
    pub factors: CompressionFactors,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionFactors {
    #[serde(rename = "B")]
    pub b: f64,
    #[serde(rename = "V")]
    pub v: f64,
    #[serde(rename = "I")]
    pub i: f64,
    #[serde(rename = "G")]
    pub g: f64,
    #[serde(rename = "F")]
    pub f: f64,
    /// Entropy proxy (bytes / 1024).
    #[serde(rename = "E")]
    pub e: f64,
    /// Hours elapsed since the context's `when`.
    pub t: f64,
}

// ── Inbound dispatch ────────────────────────────────────────────────────────

/// Inbound frames the reader knows how to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    HeartbeatAck,
    ContextSyncAck,
    ContextRequest {
        request_id: String,
    },
    OperationResponse {
        operation_id: String,
        success: bool,
        error: Option<String>,
    },
    Unknown(String),
}

impl Inbound {
    /// Classify an (already unwrapped) envelope. A recognised operation with
    /// missing fields is a protocol error.
    pub fn classify(envelope: &Envelope) -> Result<Self> {
        match envelope.operation.as_str() {
            OP_HEARTBEAT_ACK => Ok(Inbound::HeartbeatAck),
            OP_CONTEXT_SYNC_ACK => Ok(Inbound::ContextSyncAck),
            OP_CONTEXT_REQUEST => {
                let request_id = envelope.data_str("request_id").ok_or_else(|| {
                    BridgeError::Protocol("context_request without data.request_id".into())
                })?;
                Ok(Inbound::ContextRequest {
                    request_id: request_id.to_string(),
                })
            }
            OP_OPERATION_RESPONSE => {
                let operation_id = envelope.data_str("operation_id").ok_or_else(|| {
                    BridgeError::Protocol("operation_response without data.operation_id".into())
                })?;
                let success = envelope.data_bool("success").ok_or_else(|| {
                    BridgeError::Protocol("operation_response without data.success".into())
                })?;
                Ok(Inbound::OperationResponse {
                    operation_id: operation_id.to_string(),
                    success,
                    error: envelope.data_str("error").map(String::from),
                })
            }
            other => Ok(Inbound::Unknown(other.to_string())),
        }
    }
}
