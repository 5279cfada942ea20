//! Metric canonicalization
//!
//! Reduces a metric bag to the ordered, null-normalized list of metrics that
//! define a score's identity under a variant schema.
//!
//! **Rules:**
//! 1. Required metrics first, then relevant optional metrics, each in schema order
//! 2. Missing and explicit `null` are the same canonical absence
//! 3. Metrics the schema does not declare are dropped
//! 4. Values keep their exact value; decimals are widened to f64 and `-0.0` reads as `0.0`

use serde_json::Value;

use super::variants::{MetricKind, MetricSpec, VariantSchema};
use crate::error::{ScoreError, ScoreResult};
use crate::models::MetricBag;

/// Canonical form of a metric value
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Absent,
    Integer(i64),
    Decimal(f64),
    Text(String),
}

/// One (name, value) pair of the canonical sequence
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMetric {
    pub name: String,
    pub value: CanonicalValue,
}

/// Canonicalize a metric bag against a variant schema
///
/// Fails with `InvalidMetricSchema` if a required metric is absent or any
/// relevant metric has the wrong kind. Irrelevant metrics are never inspected.
pub fn canonicalize(schema: &VariantSchema, metrics: &MetricBag) -> ScoreResult<Vec<CanonicalMetric>> {
    let mut canonical = Vec::with_capacity(schema.required.len() + schema.optional.len());

    for spec in &schema.required {
        let value = canonical_value(schema, spec, metrics.get(&spec.name))?;
        if value == CanonicalValue::Absent {
            return Err(ScoreError::invalid_metrics(
                &schema.variant,
                format!("required metric '{}' is missing", spec.name),
            ));
        }
        canonical.push(CanonicalMetric {
            name: spec.name.clone(),
            value,
        });
    }

    for spec in &schema.optional {
        canonical.push(CanonicalMetric {
            name: spec.name.clone(),
            value: canonical_value(schema, spec, metrics.get(&spec.name))?,
        });
    }

    Ok(canonical)
}

fn canonical_value(
    schema: &VariantSchema,
    spec: &MetricSpec,
    raw: Option<&Value>,
) -> ScoreResult<CanonicalValue> {
    let Some(raw) = raw else {
        return Ok(CanonicalValue::Absent);
    };

    let mismatch = |expected: &str| {
        ScoreError::invalid_metrics(
            &schema.variant,
            format!("metric '{}' must be {}, got {}", spec.name, expected, raw),
        )
    };

    match &spec.kind {
        MetricKind::Integer => raw
            .as_i64()
            .map(CanonicalValue::Integer)
            .ok_or_else(|| mismatch("an integer")),
        MetricKind::Decimal => {
            let value = match raw {
                Value::Number(n) => n.as_f64(),
                _ => None,
            }
            .filter(|v| v.is_finite())
            .ok_or_else(|| mismatch("a finite number"))?;
            // -0.0 == 0.0, so they must hash alike
            Ok(CanonicalValue::Decimal(if value == 0.0 { 0.0 } else { value }))
        }
        MetricKind::Enum(allowed) => match raw.as_str() {
            Some(s) if allowed.iter().any(|a| a == s) => Ok(CanonicalValue::Text(s.to_string())),
            _ => Err(mismatch(&format!("one of [{}]", allowed.join(", ")))),
        },
    }
}
