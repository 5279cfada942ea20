//! Data models

pub mod import_batch;
pub mod migration;
pub mod score;
pub mod session;

pub use import_batch::{replace_score_ids, ImportBatch};
pub use migration::{
    MigrationOutcome, MigrationRecord, MigrationState, ReferencePatchReport, ReferrerKind,
    StaleReference, StateTransition, SweepReport,
};
pub use score::{AuxFields, GameVariant, MetricBag, Score, ScoreCorrection};
pub use session::{replace_score_info, SessionGrouping, SessionScoreInfo};
