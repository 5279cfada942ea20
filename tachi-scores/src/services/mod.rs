//! Score services

pub mod reconciler;
pub mod reference_migrator;
pub mod scope_locks;
pub mod score_mutator;
pub mod score_queries;

pub use reconciler::Reconciler;
pub use reference_migrator::ReferenceMigrator;
pub use scope_locks::{ScopeGuard, ScopeLocks};
pub use score_mutator::ScoreMutator;
pub use score_queries::ScoreQueries;
