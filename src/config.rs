// context-bridge -- bridge configuration
//
// Every option has a default except the bearer credential. Values can be
// overridden from the environment (`.env` is honoured via dotenvy).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{BridgeError, Result};

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8765/bridge";
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_SOURCE_TAG: &str = "github-mcp";
pub const DEFAULT_AGENT_ID: &str = "context-bridge";

#[derive(Clone)]
pub struct BridgeConfig {
    /// WebSocket endpoint of the remote platform (`ws://` or `wss://`).
    pub endpoint: String,
    /// Sent as `Authorization: Bearer <token>` on the upgrade request.
    pub bearer_token: String,
    pub enable_compression: bool,
    pub preserve_metadata: bool,
    /// Accepted for compatibility with the remote side. Translation does not
    /// consult it.
    pub strict_mapping: bool,
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Upper bound on the WebSocket dial + handshake.
    pub operation_timeout: Duration,
    /// Reconnect attempts allowed before the bridge gives up and enters `Error`.
    pub max_reconnect_attempts: u32,
    /// Origin tag written into the `source` field of outbound contexts.
    pub source_tag: String,
    /// `who` of contexts the bridge generates on its own behalf.
    pub agent_id: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            bearer_token: String::new(),
            enable_compression: true,
            preserve_metadata: true,
            strict_mapping: false,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            agent_id: DEFAULT_AGENT_ID.to_string(),
        }
    }
}

// Keeps the credential out of logs.
impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("endpoint", &self.endpoint)
            .field("bearer_token", &"<redacted>")
            .field("enable_compression", &self.enable_compression)
            .field("preserve_metadata", &self.preserve_metadata)
            .field("strict_mapping", &self.strict_mapping)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("operation_timeout", &self.operation_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("source_tag", &self.source_tag)
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

impl BridgeConfig {
    pub fn new(endpoint: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: bearer_token.into(),
            ..Self::default()
        }
    }

    /// Load from `BRIDGE_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reads through `lookup`, so tests need not touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BRIDGE_URL") {
            cfg.endpoint = v;
        }
        if let Some(v) = get("BRIDGE_TOKEN").or_else(|| get("GITHUB_TOKEN")) {
            cfg.bearer_token = v;
        }
        if let Some(v) = get("BRIDGE_ENABLE_COMPRESSION") {
            cfg.enable_compression = parse_bool("BRIDGE_ENABLE_COMPRESSION", &v)?;
        }
        if let Some(v) = get("BRIDGE_PRESERVE_METADATA") {
            cfg.preserve_metadata = parse_bool("BRIDGE_PRESERVE_METADATA", &v)?;
        }
        if let Some(v) = get("BRIDGE_STRICT_MAPPING") {
            cfg.strict_mapping = parse_bool("BRIDGE_STRICT_MAPPING", &v)?;
        }
        if let Some(v) = get("BRIDGE_RECONNECT_INTERVAL_SECS") {
            cfg.reconnect_interval =
                Duration::from_secs(parse_num("BRIDGE_RECONNECT_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("BRIDGE_HEARTBEAT_INTERVAL_SECS") {
            cfg.heartbeat_interval =
                Duration::from_secs(parse_num("BRIDGE_HEARTBEAT_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("BRIDGE_OPERATION_TIMEOUT_SECS") {
            cfg.operation_timeout =
                Duration::from_secs(parse_num("BRIDGE_OPERATION_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("BRIDGE_MAX_RECONNECT_ATTEMPTS") {
            cfg.max_reconnect_attempts = parse_num("BRIDGE_MAX_RECONNECT_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("BRIDGE_SOURCE_TAG") {
            cfg.source_tag = v;
        }
        if let Some(v) = get("BRIDGE_AGENT_ID") {
            cfg.agent_id = v;
        }

        Ok(cfg)
    }

    /// Reject configurations the bridge cannot run with. Returns the parsed
    /// endpoint on success.
    pub fn validate(&self) -> Result<Url> {
        if self.bearer_token.trim().is_empty() {
            return Err(BridgeError::Config(
                "bearer credential is required (set BRIDGE_TOKEN)".into(),
            ));
        }

        let url = Url::parse(&self.endpoint).map_err(|e| {
            BridgeError::Config(format!("malformed endpoint URL '{}': {}", self.endpoint, e))
        })?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(BridgeError::Config(format!(
                "endpoint must use ws:// or wss:// (got '{}')",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(BridgeError::Config(format!(
                "endpoint '{}' has no host",
                self.endpoint
            )));
        }

        for (name, value) in [
            ("reconnect_interval", self.reconnect_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("operation_timeout", self.operation_timeout),
        ] {
            if value.is_zero() {
                return Err(BridgeError::Config(format!("{name} must be greater than zero")));
            }
        }

        Ok(url)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BridgeError::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::Config(format!("{key}: expected a number, got '{value}'")))
}
