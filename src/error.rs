// context-bridge -- error taxonomy
//
// Configuration errors are fatal at construction. Transient connectivity
// errors drive the reconnect loop. Protocol errors are logged and the frame
// dropped. Caller-misuse errors return synchronously without touching state.

use crate::state::BridgeState;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bridge not connected (state: {0})")]
    NotConnected(BridgeState),

    #[error("Bridge has been stopped")]
    Stopped,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// Machine-readable code, attached to failure log lines as `error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Connect(_) => "CONNECT_FAILED",
            BridgeError::Transport(_) => "TRANSPORT_ERROR",
            BridgeError::NotConnected(_) => "NOT_CONNECTED",
            BridgeError::Stopped => "STOPPED",
            BridgeError::InvalidState(_) => "INVALID_STATE",
            BridgeError::Validation(_) => "VALIDATION_ERROR",
            BridgeError::Serialization(_) => "SERIALIZATION_ERROR",
            BridgeError::Protocol(_) => "PROTOCOL_ERROR",
        }
    }

    /// Connectivity failures worth retrying on the reconnect interval.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Connect(_) | BridgeError::Transport(_))
    }
}
