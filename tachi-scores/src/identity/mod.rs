//! Score identity: variant schemas, metric canonicalization and hashing

pub mod canonical;
pub mod score_id;
pub mod variants;

pub use canonical::{canonicalize, CanonicalMetric, CanonicalValue};
pub use score_id::{
    compute_identity, compute_identity_with_schema, create_score_id, is_score_id,
    IDENTITY_FORMAT_VERSION, SCORE_ID_MARKER,
};
pub use variants::{MetricKind, MetricSpec, SchemaRegistry, VariantSchema};
