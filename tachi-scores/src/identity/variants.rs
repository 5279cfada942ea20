//! Variant metric schemas
//!
//! For each game variant, the schema lists the metrics that define a score's
//! identity: required metrics (always present) followed by the optional
//! metrics relevant to that variant. Declaration order here IS the canonical
//! order hashed into every identity.
//!
//! **Changing any list below changes existing identities.** Doing so is a
//! storage-format migration and must bump `IDENTITY_FORMAT_VERSION`.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::error::{ScoreError, ScoreResult};
use crate::models::GameVariant;

/// Value type a metric must hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricKind {
    /// Whole number (JSON integer only)
    Integer,
    /// Finite real number; integers are widened
    Decimal,
    /// One of a fixed set of strings
    Enum(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricSpec {
    pub fn integer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MetricKind::Integer,
        }
    }

    pub fn decimal(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MetricKind::Decimal,
        }
    }

    pub fn enumeration(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: MetricKind::Enum(values.iter().map(|v| v.to_string()).collect()),
        }
    }
}

/// Identity-relevant metrics of one game variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSchema {
    pub variant: GameVariant,
    /// Always present, hashed first in this order
    pub required: Vec<MetricSpec>,
    /// Relevant optional metrics, hashed after the required ones in this order
    pub optional: Vec<MetricSpec>,
}

impl VariantSchema {
    pub fn new(variant: GameVariant, required: Vec<MetricSpec>, optional: Vec<MetricSpec>) -> Self {
        Self {
            variant,
            required,
            optional,
        }
    }

    /// Whether a metric name feeds this variant's identity
    pub fn is_relevant(&self, name: &str) -> bool {
        self.required
            .iter()
            .chain(self.optional.iter())
            .any(|m| m.name == name)
    }
}

/// Lookup table of variant schemas
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<GameVariant, VariantSchema>,
}

static BUILTIN: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::builtin);

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance of the built-in registry
    pub fn global() -> &'static SchemaRegistry {
        &BUILTIN
    }

    /// Registry with every supported variant
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        let iidx_lamps = [
            "NO PLAY",
            "FAILED",
            "ASSIST CLEAR",
            "EASY CLEAR",
            "CLEAR",
            "HARD CLEAR",
            "EX HARD CLEAR",
            "FULL COMBO",
        ];
        for playtype in ["SP", "DP"] {
            registry.register(VariantSchema::new(
                GameVariant::new("iidx", playtype),
                vec![
                    MetricSpec::integer("score"),
                    MetricSpec::enumeration("lamp", &iidx_lamps),
                ],
                vec![],
            ));
        }

        let sdvx_lamps = [
            "FAILED",
            "CLEAR",
            "EXCESSIVE CLEAR",
            "ULTIMATE CHAIN",
            "PERFECT ULTIMATE CHAIN",
        ];
        for variant in [GameVariant::new("sdvx", "Single"), GameVariant::new("usc", "Controller")] {
            registry.register(VariantSchema::new(
                variant,
                vec![
                    MetricSpec::integer("score"),
                    MetricSpec::enumeration("lamp", &sdvx_lamps),
                ],
                vec![MetricSpec::integer("exScore")],
            ));
        }

        registry.register(VariantSchema::new(
            GameVariant::new("maimaidx", "Single"),
            vec![
                MetricSpec::decimal("percent"),
                MetricSpec::enumeration(
                    "lamp",
                    &["FAILED", "CLEAR", "FULL COMBO", "FULL COMBO+", "ALL PERFECT", "ALL PERFECT+"],
                ),
            ],
            vec![],
        ));

        registry.register(VariantSchema::new(
            GameVariant::new("chunithm", "Single"),
            vec![
                MetricSpec::integer("score"),
                MetricSpec::enumeration(
                    "lamp",
                    &["FAILED", "CLEAR", "FULL COMBO", "ALL JUSTICE", "ALL JUSTICE CRITICAL"],
                ),
            ],
            vec![],
        ));

        registry
    }

    /// Add or replace a schema
    pub fn register(&mut self, schema: VariantSchema) {
        self.schemas.insert(schema.variant.clone(), schema);
    }

    pub fn get(&self, variant: &GameVariant) -> Option<&VariantSchema> {
        self.schemas.get(variant)
    }

    /// Schema for a variant; unknown variants cannot be canonicalized
    pub fn require(&self, variant: &GameVariant) -> ScoreResult<&VariantSchema> {
        self.get(variant)
            .ok_or_else(|| ScoreError::invalid_metrics(variant, "unsupported game variant"))
    }
}
