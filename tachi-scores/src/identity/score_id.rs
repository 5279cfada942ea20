//! Score identity hashing
//!
//! **Identity format (version 1):** `T` followed by the lowercase hex SHA-256
//! digest (64 characters) of the canonical encoding below.
//!
//! **Canonical encoding:**
//! ```text
//! u8   IDENTITY_FORMAT_VERSION
//! str  game variant ("iidx:SP")
//! i64  owner user id (big-endian)
//! str  chart id
//! u32  number of metric pairs (big-endian)
//! per pair:
//!   str  metric name
//!   u8   value tag: 0 absent, 1 integer, 2 decimal, 3 text
//!   ...  i64 BE | f64 bits BE | str
//! ```
//! where `str` is a u32 big-endian byte length followed by UTF-8 bytes, so no
//! field content can be mistaken for a field boundary.
//!
//! **This is a durable storage contract.** Identical inputs must produce the
//! same identity forever; any change here requires a versioned migration of
//! every stored score.

use sha2::{Digest, Sha256};

use super::canonical::{canonicalize, CanonicalMetric, CanonicalValue};
use super::variants::{SchemaRegistry, VariantSchema};
use crate::error::ScoreResult;
use crate::models::{GameVariant, MetricBag};

/// Marker character for score identities in the shared identifier namespace
pub const SCORE_ID_MARKER: char = 'T';

/// Version byte leading every canonical encoding
pub const IDENTITY_FORMAT_VERSION: u8 = 1;

/// Length of the hex digest part
pub const SCORE_ID_DIGEST_LEN: usize = 64;

const TAG_ABSENT: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_DECIMAL: u8 = 2;
const TAG_TEXT: u8 = 3;

/// Compute a score identity, looking the schema up in `registry`
///
/// Pure: no I/O. Fails only with `InvalidMetricSchema`.
pub fn compute_identity(
    registry: &SchemaRegistry,
    variant: &GameVariant,
    user_id: i64,
    chart_id: &str,
    metrics: &MetricBag,
) -> ScoreResult<String> {
    let schema = registry.require(variant)?;
    compute_identity_with_schema(schema, user_id, chart_id, metrics)
}

/// Compute a score identity against the built-in registry
pub fn create_score_id(
    variant: &GameVariant,
    user_id: i64,
    chart_id: &str,
    metrics: &MetricBag,
) -> ScoreResult<String> {
    compute_identity(SchemaRegistry::global(), variant, user_id, chart_id, metrics)
}

/// Compute a score identity against an explicit schema
pub fn compute_identity_with_schema(
    schema: &VariantSchema,
    user_id: i64,
    chart_id: &str,
    metrics: &MetricBag,
) -> ScoreResult<String> {
    let canonical = canonicalize(schema, metrics)?;
    let encoded = encode_canonical(&schema.variant, user_id, chart_id, &canonical);
    Ok(identity_from_bytes(&encoded))
}

/// Canonical byte encoding of an identity's inputs
pub fn encode_canonical(
    variant: &GameVariant,
    user_id: i64,
    chart_id: &str,
    metrics: &[CanonicalMetric],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    buf.push(IDENTITY_FORMAT_VERSION);
    put_str(&mut buf, &variant.to_string());
    buf.extend_from_slice(&user_id.to_be_bytes());
    put_str(&mut buf, chart_id);
    buf.extend_from_slice(&(metrics.len() as u32).to_be_bytes());

    for metric in metrics {
        put_str(&mut buf, &metric.name);
        match &metric.value {
            CanonicalValue::Absent => buf.push(TAG_ABSENT),
            CanonicalValue::Integer(v) => {
                buf.push(TAG_INTEGER);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            CanonicalValue::Decimal(v) => {
                buf.push(TAG_DECIMAL);
                buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            CanonicalValue::Text(s) => {
                buf.push(TAG_TEXT);
                put_str(&mut buf, s);
            }
        }
    }

    buf
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn identity_from_bytes(encoded: &[u8]) -> String {
    let digest = Sha256::digest(encoded);
    format!("{}{:x}", SCORE_ID_MARKER, digest)
}

/// Whether a string has the shape of a score identity
pub fn is_score_id(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some(SCORE_ID_MARKER)
        && s.len() == SCORE_ID_DIGEST_LEN + 1
        && chars.all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoreError;
    use serde_json::Value;

    const CHART: &str = "c2311194e3897ddb5745b1760d2c0141f933e683";

    fn iidx_sp() -> GameVariant {
        GameVariant::new("iidx", "SP")
    }

    fn sdvx() -> GameVariant {
        GameVariant::new("sdvx", "Single")
    }

    fn iidx_metrics() -> MetricBag {
        MetricBag::new().with("score", 1479).with("lamp", "HARD CLEAR")
    }

    fn sdvx_metrics() -> MetricBag {
        MetricBag::new().with("score", 9_500_000).with("lamp", "EXCESSIVE CLEAR")
    }

    #[test]
    fn test_identity_shape() {
        let id = create_score_id(&iidx_sp(), 1, CHART, &iidx_metrics()).unwrap();
        assert!(id.starts_with('T'));
        assert_eq!(id.len(), 65);
        assert!(is_score_id(&id), "{} should be a score id", id);
    }

    #[test]
    fn test_identity_canary() {
        // A change here is a breaking storage migration, not a bug fix.
        let id = create_score_id(&iidx_sp(), 1, CHART, &iidx_metrics()).unwrap();
        assert_eq!(
            id,
            "Tfeb67778154a642b180f70b49f47f9416ee62bbc39d6c86202a8abe3a48d6470"
        );
    }

    #[test]
    fn test_deterministic() {
        let a = create_score_id(&iidx_sp(), 1, CHART, &iidx_metrics()).unwrap();
        let b = create_score_id(&iidx_sp(), 1, CHART, &iidx_metrics()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_owner_sensitivity() {
        let a = create_score_id(&iidx_sp(), 1, CHART, &iidx_metrics()).unwrap();
        let b = create_score_id(&iidx_sp(), 2, CHART, &iidx_metrics()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_chart_and_variant_sensitivity() {
        let a = create_score_id(&iidx_sp(), 1, CHART, &iidx_metrics()).unwrap();
        let other_chart = create_score_id(&iidx_sp(), 1, "other", &iidx_metrics()).unwrap();
        let other_variant =
            create_score_id(&GameVariant::new("iidx", "DP"), 1, CHART, &iidx_metrics()).unwrap();
        assert_ne!(a, other_chart);
        assert_ne!(a, other_variant);
    }

    #[test]
    fn test_required_metric_sensitivity() {
        let a = create_score_id(&iidx_sp(), 1, CHART, &iidx_metrics()).unwrap();
        let score_changed = iidx_metrics().with("score", 0);
        let lamp_changed = iidx_metrics().with("lamp", "CLEAR");
        assert_ne!(a, create_score_id(&iidx_sp(), 1, CHART, &score_changed).unwrap());
        assert_ne!(a, create_score_id(&iidx_sp(), 1, CHART, &lamp_changed).unwrap());
    }

    #[test]
    fn test_irrelevant_metrics_ignored() {
        let a = create_score_id(&iidx_sp(), 1, CHART, &iidx_metrics()).unwrap();
        let noisy = iidx_metrics().with("bp", 293).with("bad", 129);
        assert_eq!(a, create_score_id(&iidx_sp(), 1, CHART, &noisy).unwrap());
    }

    #[test]
    fn test_relevant_optional_metric_sensitivity() {
        let none = create_score_id(&sdvx(), 1, CHART, &sdvx_metrics()).unwrap();
        let one = create_score_id(&sdvx(), 1, CHART, &sdvx_metrics().with("exScore", 1)).unwrap();
        let hundred =
            create_score_id(&sdvx(), 1, CHART, &sdvx_metrics().with("exScore", 100)).unwrap();
        assert_ne!(none, one);
        assert_ne!(one, hundred);
    }

    #[test]
    fn test_irrelevant_optional_metric_ignored() {
        let base = sdvx_metrics().with("exScore", 1);
        let with_fast = base.clone().with("fast", 18);
        assert_eq!(
            create_score_id(&sdvx(), 1, CHART, &base).unwrap(),
            create_score_id(&sdvx(), 1, CHART, &with_fast).unwrap()
        );
    }

    #[test]
    fn test_null_and_missing_equivalent() {
        let missing = sdvx_metrics();
        let null = sdvx_metrics().with("exScore", Value::Null);
        assert_eq!(
            create_score_id(&sdvx(), 1, CHART, &missing).unwrap(),
            create_score_id(&sdvx(), 1, CHART, &null).unwrap()
        );
    }

    #[test]
    fn test_length_prefix_prevents_boundary_collisions() {
        // Naive concatenation would make ("ab", "c") and ("a", "bc") collide.
        let metrics = iidx_metrics();
        let canonical = canonicalize(SchemaRegistry::global().require(&iidx_sp()).unwrap(), &metrics)
            .unwrap();
        let a = encode_canonical(&GameVariant::new("iidx", "SP"), 1, "ab|c", &canonical);
        let b = encode_canonical(&GameVariant::new("iidx", "SP|ab"), 1, "c", &canonical);
        assert_ne!(a, b);
        assert_ne!(identity_from_bytes(&a), identity_from_bytes(&b));
    }

    #[test]
    fn test_invalid_metrics_rejected() {
        let err = create_score_id(&iidx_sp(), 1, CHART, &MetricBag::new()).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidMetricSchema { .. }));
    }

    #[test]
    fn test_is_score_id_rejects_malformed() {
        assert!(!is_score_id("scoreid_1"));
        assert!(!is_score_id(&format!("X{}", "a".repeat(64))));
        assert!(!is_score_id(&format!("T{}", "A".repeat(64))));
        assert!(!is_score_id(&format!("T{}", "a".repeat(40))));
        assert!(is_score_id(&format!("T{}", "0".repeat(64))));
    }
}
