// context-bridge -- context translation between the local and remote shapes
//
// Stateless per call. The only side effect is the pair of success/failure
// counters read by the stats snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::context::{BridgeContext, ContextVector, Meta, MetaValue};
use crate::error::{BridgeError, Result};

pub const TRANSLATOR_VERSION: &str = "1.2.0";

/// Coefficient keys carried across even when metadata is not preserved.
pub const COEFFICIENT_KEYS: [&str; 5] = ["B", "V", "I", "G", "F"];

pub const META_TRANSLATED_AT: &str = "translated_at";
pub const META_DIRECTION: &str = "translation_direction";
pub const META_VERSION: &str = "translator_version";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToRemote,
    ToLocal,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToRemote => "to_remote",
            Direction::ToLocal => "to_local",
        }
    }
}

#[derive(Debug)]
pub struct ContextTranslator {
    source_tag: String,
    preserve_metadata: bool,
    /// No effect on translation; kept so the remote side's option set
    /// round-trips through configuration.
    strict_mapping: bool,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl ContextTranslator {
    pub fn new(source_tag: impl Into<String>, preserve_metadata: bool, strict_mapping: bool) -> Self {
        Self {
            source_tag: source_tag.into(),
            preserve_metadata,
            strict_mapping,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn strict_mapping(&self) -> bool {
        self.strict_mapping
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    // ── Typed shapes ────────────────────────────────────────────────────

    pub fn to_remote(&self, local: &ContextVector) -> Result<BridgeContext> {
        self.to_remote_at(local, now_secs())
    }

    pub fn to_local(&self, remote: &BridgeContext) -> Result<ContextVector> {
        self.to_local_at(remote, now_secs())
    }

    pub(crate) fn to_remote_at(&self, local: &ContextVector, now: i64) -> Result<BridgeContext> {
        self.record(validate_extent(local.extent).map(|()| BridgeContext {
            source: self.source_tag.clone(),
            who: local.who.clone(),
            what: local.what.clone(),
            when: local.when,
            location: local.location.clone(),
            why: local.why.clone(),
            how: local.how.clone(),
            extent: local.extent,
            meta: Some(self.carry_meta(local.meta.as_ref(), Direction::ToRemote, now)),
        }))
    }

    pub(crate) fn to_local_at(&self, remote: &BridgeContext, now: i64) -> Result<ContextVector> {
        let checked = if remote.source.trim().is_empty() {
            Err(BridgeError::Validation("remote context has an empty source".into()))
        } else {
            validate_extent(remote.extent)
        };
        self.record(checked.map(|()| ContextVector {
            who: remote.who.clone(),
            what: remote.what.clone(),
            when: remote.when,
            location: remote.location.clone(),
            why: remote.why.clone(),
            how: remote.how.clone(),
            extent: remote.extent,
            meta: Some(self.carry_meta(remote.meta.as_ref(), Direction::ToLocal, now)),
        }))
    }

    // ── Map variants ────────────────────────────────────────────────────

    /// Translate a local context given as a JSON object into a remote one.
    pub fn to_remote_value(&self, local: &Value) -> Result<Value> {
        let typed: ContextVector = self.decode(local)?;
        let remote = self.to_remote(&typed)?;
        Ok(serde_json::to_value(remote)?)
    }

    pub fn to_local_value(&self, remote: &Value) -> Result<Value> {
        let typed: BridgeContext = self.decode(remote)?;
        let local = self.to_local(&typed)?;
        Ok(serde_json::to_value(local)?)
    }

    // ── JSON string variants ────────────────────────────────────────────

    pub fn to_remote_json(&self, local: &str) -> Result<String> {
        let value = self.parse(local)?;
        Ok(serde_json::to_string(&self.to_remote_value(&value)?)?)
    }

    pub fn to_local_json(&self, remote: &str) -> Result<String> {
        let value = self.parse(remote)?;
        Ok(serde_json::to_string(&self.to_local_value(&value)?)?)
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn carry_meta(&self, meta: Option<&Meta>, direction: Direction, now: i64) -> Meta {
        let mut out = match meta {
            Some(m) if self.preserve_metadata => m.clone(),
            Some(m) => m
                .iter()
                .filter(|(k, v)| COEFFICIENT_KEYS.contains(&k.as_str()) && v.as_f64().is_some())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => Meta::new(),
        };
        out.insert(META_TRANSLATED_AT.into(), MetaValue::Int(now));
        out.insert(META_DIRECTION.into(), direction.as_str().into());
        out.insert(META_VERSION.into(), TRANSLATOR_VERSION.into());
        out
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.successes.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                tracing::debug!("translator: rejected context: {}", e);
                self.failures.fetch_add(1, Ordering::Relaxed)
            }
        };
        result
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, value: &Value) -> Result<T> {
        let decoded = match value {
            Value::Null => Err(BridgeError::Validation("context is absent".into())),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| BridgeError::Validation(format!("malformed context: {e}"))),
            other => Err(BridgeError::Validation(format!(
                "context must be a JSON object, got {}",
                json_kind(other)
            ))),
        };
        if decoded.is_err() {
            // Typed translation records its own success; only count decode failures here.
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        decoded
    }

    fn parse(&self, raw: &str) -> Result<Value> {
        if raw.trim().is_empty() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(BridgeError::Validation("context is absent".into()));
        }
        serde_json::from_str(raw).map_err(|e| {
            self.failures.fetch_add(1, Ordering::Relaxed);
            BridgeError::Validation(format!("context is not valid JSON: {e}"))
        })
    }
}

/// Any integer `when` is accepted, including pre-epoch instants.
fn validate_extent(extent: f64) -> Result<()> {
    if !extent.is_finite() {
        return Err(BridgeError::Validation("context extent must be finite".into()));
    }
    Ok(())
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
