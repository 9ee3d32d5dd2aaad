// context-bridge -- seven-dimensional context descriptors
//
// `ContextVector` is the local (MCP side) shape. `BridgeContext` is the shape
// the remote platform speaks; it is the same record tagged with the origin
// platform in `source`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scalar metadata value. Variant order matters for untagged decoding:
/// integers are tried before floats so `1000` stays an integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    /// Numeric view used by the compression coefficients.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

pub type Meta = BTreeMap<String, MetaValue>;

// ── Local shape ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextVector {
    pub who: String,
    pub what: String,
    /// Epoch seconds.
    pub when: i64,
    #[serde(rename = "where")]
    pub location: String,
    pub why: String,
    pub how: String,
    /// Nominally 0.0–1.0, never clamped.
    pub extent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl ContextVector {
    pub fn new(
        who: impl Into<String>,
        what: impl Into<String>,
        when: i64,
        location: impl Into<String>,
        why: impl Into<String>,
        how: impl Into<String>,
        extent: f64,
    ) -> Self {
        Self {
            who: who.into(),
            what: what.into(),
            when,
            location: location.into(),
            why: why.into(),
            how: how.into(),
            extent,
            meta: None,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta
            .get_or_insert_with(Meta::new)
            .insert(key.into(), value.into());
        self
    }

    /// Move `when` forward to `now`. Never moves it backwards, so successive
    /// updates of one operation context keep a non-decreasing timestamp.
    pub fn advance_to(&mut self, now: i64) {
        self.when = self.when.max(now);
    }

    pub fn coefficient(&self, key: &str) -> Option<f64> {
        coefficient(self.meta.as_ref(), key)
    }
}

// ── Remote shape ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeContext {
    /// Platform the context originated from.
    pub source: String,
    pub who: String,
    pub what: String,
    pub when: i64,
    #[serde(rename = "where")]
    pub location: String,
    pub why: String,
    pub how: String,
    pub extent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl BridgeContext {
    pub fn coefficient(&self, key: &str) -> Option<f64> {
        coefficient(self.meta.as_ref(), key)
    }
}

fn coefficient(meta: Option<&Meta>, key: &str) -> Option<f64> {
    meta.and_then(|m| m.get(key))
        .and_then(MetaValue::as_f64)
        .filter(|v| v.is_finite())
}
