//! Score documents
//!
//! A score's identity is derived from (variant, owner, chart, relevant
//! metrics) and is never assigned independently. Auxiliary fields
//! (timestamps, comment, highlight, provenance) never feed the identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ScoreError;

/// A game and one of its play modes, e.g. `iidx:SP`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameVariant {
    pub game: String,
    pub playtype: String,
}

impl GameVariant {
    pub fn new(game: impl Into<String>, playtype: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            playtype: playtype.into(),
        }
    }
}

impl fmt::Display for GameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.game, self.playtype)
    }
}

impl FromStr for GameVariant {
    type Err = ScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((game, playtype))
                if !game.is_empty() && !playtype.is_empty() && !playtype.contains(':') =>
            {
                Ok(GameVariant::new(game, playtype))
            }
            _ => Err(ScoreError::invalid_metrics(
                s,
                "game variant must look like <game>:<playtype>",
            )),
        }
    }
}

/// Measured values of a performance, keyed by metric name
///
/// Holds every metric the import pipeline recorded, relevant to the identity
/// or not. Values are JSON scalars; `null` and absence mean the same thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricBag(BTreeMap<String, Value>);

impl MetricBag {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build from a JSON object
    pub fn from_json(value: Value) -> Result<Self, tachi_common::Error> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(tachi_common::Error::InvalidInput(format!(
                "metric bag must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Value of a metric; explicit `null` reads as absent
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fields carried by a score that never participate in its identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxFields {
    /// Service the score was imported from
    pub service: String,
    pub import_type: Option<String>,
    pub time_achieved: Option<DateTime<Utc>>,
    pub time_added: DateTime<Utc>,
    pub comment: Option<String>,
    pub highlight: bool,
}

impl AuxFields {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            import_type: None,
            time_achieved: None,
            time_added: Utc::now(),
            comment: None,
            highlight: false,
        }
    }
}

/// A recorded performance on a chart by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub score_id: String,
    pub user_id: i64,
    pub game: String,
    pub playtype: String,
    pub chart_id: String,
    pub metrics: MetricBag,
    pub aux: AuxFields,
}

impl Score {
    pub fn variant(&self) -> GameVariant {
        GameVariant::new(self.game.clone(), self.playtype.clone())
    }
}

/// Corrected content for an existing score
///
/// Owner, variant and chart are fixed by the score being corrected.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCorrection {
    /// Replacement metric bag
    pub metrics: MetricBag,
    /// Replacement auxiliary fields; `None` keeps the existing ones
    pub aux: Option<AuxFields>,
}

impl ScoreCorrection {
    pub fn metrics(metrics: MetricBag) -> Self {
        Self { metrics, aux: None }
    }

    pub fn with_aux(mut self, aux: AuxFields) -> Self {
        self.aux = Some(aux);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variant_display_and_parse() {
        let variant: GameVariant = "iidx:SP".parse().unwrap();
        assert_eq!(variant, GameVariant::new("iidx", "SP"));
        assert_eq!(variant.to_string(), "iidx:SP");
    }

    #[test]
    fn test_variant_parse_rejects_malformed() {
        assert!("iidx".parse::<GameVariant>().is_err());
        assert!(":SP".parse::<GameVariant>().is_err());
        assert!("iidx:".parse::<GameVariant>().is_err());
        assert!("iidx:SP:extra".parse::<GameVariant>().is_err());
    }

    #[test]
    fn test_metric_bag_null_reads_as_absent() {
        let bag = MetricBag::new().with("score", 100).with("exScore", Value::Null);
        assert_eq!(bag.get("score"), Some(&json!(100)));
        assert_eq!(bag.get("exScore"), None);
        assert_eq!(bag.get("missing"), None);
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn test_metric_bag_from_json() {
        let bag = MetricBag::from_json(json!({"score": 1, "lamp": "CLEAR"})).unwrap();
        assert_eq!(bag.get("lamp"), Some(&json!("CLEAR")));
        assert!(MetricBag::from_json(json!([1, 2])).is_err());
    }
}
