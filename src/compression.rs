// context-bridge -- compression annotation
//
// Large outbound envelopes are wrapped in an annotated envelope that records
// their size and a context-weighted compression factor. Nothing is actually
// compressed: the wrapped frame is always larger than the original. Consumers
// on the remote side read the annotation, so the formula and its bounds must
// stay exactly as they are.

use serde_json::{Map, Value};

use crate::context::BridgeContext;
use crate::error::{BridgeError, Result};
use crate::protocol::{CompressionBlock, CompressionFactors, Envelope, EnvelopeMeta};

pub const ALGORITHM: &str = "context-weighted-annotation";
pub const ALGORITHM_VERSION: &str = "1.0";

/// Envelopes serializing to fewer bytes than this pass through untouched.
pub const SIZE_THRESHOLD: usize = 1024;
const ENTROPY_DIVISOR: f64 = 1024.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

pub const MIN_FACTOR: f64 = 0.1;
pub const MAX_FACTOR: f64 = 10.0;

pub const DEFAULT_B: f64 = 0.8;
pub const DEFAULT_V: f64 = 0.7;
pub const DEFAULT_I: f64 = 0.6;
pub const DEFAULT_G: f64 = 0.9;
pub const DEFAULT_F: f64 = 0.5;

/// Key under `data` that carries the original envelope in a wrapped frame.
const WRAPPED_KEY: &str = "envelope";

#[derive(Debug, Default, Clone, Copy)]
pub struct CompressionAnnotator;

impl CompressionAnnotator {
    pub fn new() -> Self {
        Self
    }

    pub fn annotate(&self, envelope: Envelope) -> Result<Envelope> {
        self.annotate_at(envelope, crate::translator::now_secs())
    }

    pub fn annotate_at(&self, envelope: Envelope, now: i64) -> Result<Envelope> {
        let original_size = serde_json::to_vec(&envelope)?.len();
        if original_size < SIZE_THRESHOLD {
            return Ok(envelope);
        }

        let factors = derive_factors(envelope.context.as_ref(), original_size, now);
        let compression_factor = compression_factor(&factors);

        tracing::debug!(
            operation = %envelope.operation,
            original_size,
            compression_factor,
            "compression: annotating envelope"
        );

        let mut data = Map::new();
        data.insert(WRAPPED_KEY.into(), serde_json::to_value(&envelope)?);

        Ok(Envelope {
            operation: envelope.operation,
            timestamp: now,
            data,
            context: None,
            compressed: Some(true),
            meta: Some(EnvelopeMeta {
                compression: Some(CompressionBlock {
                    algorithm: ALGORITHM.into(),
                    version: ALGORITHM_VERSION.into(),
                    original_size,
                    compression_factor,
                    timestamp: now,
                    factors,
                }),
            }),
        })
    }

    /// Strip the wrapper from a frame flagged `compressed`. Uncompressed
    /// envelopes come back unchanged.
    pub fn unwrap(&self, envelope: Envelope) -> Result<Envelope> {
        if !envelope.is_compressed() {
            return Ok(envelope);
        }
        let inner = envelope
            .data
            .get(WRAPPED_KEY)
            .cloned()
            .ok_or_else(|| BridgeError::Protocol("compressed frame without data.envelope".into()))?;
        serde_json::from_value(inner)
            .map_err(|e| BridgeError::Protocol(format!("compressed frame has malformed inner envelope: {e}")))
    }
}

fn derive_factors(context: Option<&BridgeContext>, size: usize, now: i64) -> CompressionFactors {
    let coeff = |key: &str, default: f64| {
        context.and_then(|c| c.coefficient(key)).unwrap_or(default)
    };
    let elapsed = context.map(|c| now.saturating_sub(c.when).max(0)).unwrap_or(0);

    CompressionFactors {
        b: coeff("B", DEFAULT_B),
        v: coeff("V", DEFAULT_V),
        i: coeff("I", DEFAULT_I),
        g: coeff("G", DEFAULT_G),
        f: coeff("F", DEFAULT_F),
        e: size as f64 / ENTROPY_DIVISOR,
        t: elapsed as f64 / SECONDS_PER_HOUR,
    }
}

/// `alignment = (B·V + I·G) / 2`
/// `factor = (1 + alignment · ln(1 + E)) · (1 + F) / (1 + t)`, clamped to
/// `[MIN_FACTOR, MAX_FACTOR]`.
pub fn compression_factor(factors: &CompressionFactors) -> f64 {
    let alignment = (factors.b * factors.v + factors.i * factors.g) / 2.0;
    let raw = (1.0 + alignment * factors.e.ln_1p()) * (1.0 + factors.f) / (1.0 + factors.t);
    clamp_factor(raw)
}

fn clamp_factor(raw: f64) -> f64 {
    // NaN has no order; treat it as the weakest factor.
    if raw.is_nan() {
        MIN_FACTOR
    } else {
        raw.clamp(MIN_FACTOR, MAX_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Meta, MetaValue};
    use serde_json::json;

    fn context(when: i64, meta: &[(&str, f64)]) -> BridgeContext {
        let meta: Meta = meta.iter().map(|(k, v)| (k.to_string(), MetaValue::Float(*v))).collect();
        BridgeContext {
            source: "github-mcp".into(),
            who: "A".into(),
            what: "B".into(),
            when,
            location: "C".into(),
            why: "D".into(),
            how: "E".into(),
            extent: 0.95,
            meta: if meta.is_empty() { None } else { Some(meta) },
        }
    }

    /// Envelope whose serialized form is exactly `size` bytes.
    fn sized_envelope(size: usize, ctx: Option<BridgeContext>) -> Envelope {
        let mut envelope = Envelope::new("create_issue", 1_700_000_000).with_context(ctx);
        envelope.data.insert("blob".into(), json!(""));
        let base = serde_json::to_vec(&envelope).unwrap().len();
        assert!(base <= size, "base envelope already {base} bytes");
        envelope.data.insert("blob".into(), json!("x".repeat(size - base)));
        assert_eq!(serde_json::to_vec(&envelope).unwrap().len(), size);
        envelope
    }

    #[test]
    fn test_below_threshold_is_unchanged() {
        let annotator = CompressionAnnotator::new();
        let envelope = sized_envelope(SIZE_THRESHOLD - 1, None);
        let before = envelope.to_frame().unwrap();
        let after = annotator.annotate_at(envelope, 1_700_000_100).unwrap();
        assert_eq!(after.to_frame().unwrap(), before);
        assert!(after.compressed.is_none());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let annotator = CompressionAnnotator::new();
        let out = annotator.annotate_at(sized_envelope(SIZE_THRESHOLD, None), 1).unwrap();
        assert!(out.is_compressed());
    }

    #[test]
    fn test_two_thousand_byte_payload_at_current_time() {
        let now = 1_700_000_000;
        let annotator = CompressionAnnotator::new();
        let out = annotator.annotate_at(sized_envelope(2000, Some(context(now, &[]))), now).unwrap();

        assert_eq!(out.compressed, Some(true));
        let block = out.meta.as_ref().unwrap().compression.as_ref().unwrap();
        assert_eq!(block.algorithm, ALGORITHM);
        assert_eq!(block.version, ALGORITHM_VERSION);
        assert_eq!(block.original_size, 2000);
        assert_eq!(block.timestamp, now);
        assert_eq!(block.factors.t, 0.0);
        assert!(block.compression_factor > MIN_FACTOR && block.compression_factor < MAX_FACTOR);

        let wire: Value = serde_json::from_str(&out.to_frame().unwrap()).unwrap();
        assert_eq!(wire["compressed"], true);
        assert_eq!(wire["meta"]["compression"]["originalSize"], 2000);
    }

    #[test]
    fn test_wrapped_frame_is_not_smaller() {
        let annotator = CompressionAnnotator::new();
        let envelope = sized_envelope(4096, Some(context(0, &[("B", 0.2)])));
        let before = envelope.to_frame().unwrap().len();
        let after = annotator.annotate_at(envelope, 10).unwrap().to_frame().unwrap().len();
        assert!(after > before);
    }

    #[test]
    fn test_coefficients_come_from_context_meta() {
        let annotator = CompressionAnnotator::new();
        let ctx = context(100, &[("B", 0.82), ("F", 2.0)]);
        let out = annotator.annotate_at(sized_envelope(2048, Some(ctx)), 7300).unwrap();
        let f = out.meta.unwrap().compression.unwrap().factors;
        assert_eq!(f.b, 0.82);
        assert_eq!(f.f, 2.0);
        assert_eq!(f.v, DEFAULT_V);
        assert_eq!(f.e, 2.0);
        assert_eq!(f.t, 2.0);
    }

    #[test]
    fn test_formula_value_with_defaults() {
        let factors = CompressionFactors {
            b: DEFAULT_B,
            v: DEFAULT_V,
            i: DEFAULT_I,
            g: DEFAULT_G,
            f: DEFAULT_F,
            e: 1.0,
            t: 0.0,
        };
        let alignment = (0.8 * 0.7 + 0.6 * 0.9) / 2.0;
        let expected = (1.0 + alignment * 2f64.ln()) * 1.5;
        assert!((compression_factor(&factors) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_factor_bounded_for_extreme_inputs() {
        let extremes = [f64::MAX, -f64::MAX, 0.0, 1e-300, f64::INFINITY, f64::NEG_INFINITY, f64::NAN];
        for &x in &extremes {
            for &t in &[0.0, 1e12, f64::MAX] {
                let factors = CompressionFactors { b: x, v: x, i: -x, g: x, f: x, e: 1e9, t };
                let cf = compression_factor(&factors);
                assert!((MIN_FACTOR..=MAX_FACTOR).contains(&cf), "x={x} t={t} -> {cf}");
            }
        }
    }

    #[test]
    fn test_future_context_time_is_clamped_to_zero() {
        let annotator = CompressionAnnotator::new();
        let out = annotator
            .annotate_at(sized_envelope(1500, Some(context(i64::MAX, &[]))), 0)
            .unwrap();
        assert_eq!(out.meta.unwrap().compression.unwrap().factors.t, 0.0);

        let out = annotator
            .annotate_at(sized_envelope(1500, Some(context(i64::MIN, &[]))), i64::MAX)
            .unwrap();
        let block = out.meta.unwrap().compression.unwrap();
        assert!(block.factors.t > 0.0);
        assert!((MIN_FACTOR..=MAX_FACTOR).contains(&block.compression_factor));
    }

    #[test]
    fn test_unwrap_restores_original() {
        let annotator = CompressionAnnotator::new();
        let original = sized_envelope(3000, Some(context(5, &[("G", 0.3)])));
        let wrapped = annotator.annotate_at(original.clone(), 50).unwrap();
        assert_eq!(annotator.unwrap(wrapped).unwrap(), original);
    }

    #[test]
    fn test_unwrap_passthrough_and_malformed() {
        let annotator = CompressionAnnotator::new();
        let plain = Envelope::new("heartbeat_ack", 1);
        assert_eq!(annotator.unwrap(plain.clone()).unwrap(), plain);

        let mut broken = Envelope::new("context_request", 1);
        broken.compressed = Some(true);
        assert!(matches!(annotator.unwrap(broken), Err(BridgeError::Protocol(_))));
    }
}
