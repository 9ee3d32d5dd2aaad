// context-bridge -- connection lifecycle states
//
// The current state lives next to the connection writer behind one lock in
// `Bridge`. This module only knows which edges are legal.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Initializing,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Stopping,
    Error,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Initializing => "initializing",
            BridgeState::Connecting => "connecting",
            BridgeState::Connected => "connected",
            BridgeState::Reconnecting => "reconnecting",
            BridgeState::Disconnected => "disconnected",
            BridgeState::Stopping => "stopping",
            BridgeState::Error => "error",
        }
    }

    /// Legal lifecycle edges. `Stopping` is reachable from anywhere.
    pub fn can_transition_to(&self, next: BridgeState) -> bool {
        use BridgeState::*;
        match (*self, next) {
            (Disconnected, _) => false,
            (Stopping, Disconnected) => true,
            (Stopping, _) => false,
            (_, Stopping) => true,
            (Initializing, Connecting) => true,
            // Operator restart after a terminal reconnect failure.
            (Error, Connecting) => true,
            (Connecting, Connected) | (Connecting, Error) => true,
            (Connected, Reconnecting) => true,
            (Reconnecting, Connected) | (Reconnecting, Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
