//! Persistent, authenticated WebSocket bridge between the GitHub MCP server
//! and a remote context platform.
//!
//! The [`Bridge`] owns one connection and its lifecycle state machine, kept
//! alive by reader, heartbeat and reconnector workers. Contexts are mapped
//! between the two platforms by [`ContextTranslator`]; large outbound frames
//! are wrapped by [`CompressionAnnotator`].

pub mod bridge;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod state;
pub mod stats;
pub mod translator;
mod workers;

pub use bridge::Bridge;
pub use compression::CompressionAnnotator;
pub use config::BridgeConfig;
pub use context::{BridgeContext, ContextVector, Meta, MetaValue};
pub use error::{BridgeError, Result};
pub use protocol::Envelope;
pub use state::BridgeState;
pub use stats::StatsSnapshot;
pub use translator::ContextTranslator;
