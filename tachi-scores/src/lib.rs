//! tachi-scores library interface
//!
//! Score identity hashing, score correction with identity migration, and
//! the reconciliation sweep that repairs interrupted migrations.

pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ScoreError, ScoreResult};
pub use crate::identity::{compute_identity, create_score_id, is_score_id, SchemaRegistry};
pub use crate::models::{GameVariant, MetricBag, MigrationOutcome, Score, ScoreCorrection};

use sqlx::SqlitePool;
use std::sync::Arc;
use tachi_common::events::EventBus;

use crate::services::{Reconciler, ScopeLocks, ScoreMutator, ScoreQueries};

/// Process-wide context shared by every score service
///
/// Owns the event bus and the scope lock table, so mutators and
/// reconcilers built from the same context serialize against each other.
#[derive(Clone)]
pub struct ScoreContext {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for score lifecycle events
    pub event_bus: EventBus,
    /// Variant schemas used for identity computation
    pub registry: Arc<SchemaRegistry>,
    /// Per-(user, chart) mutation locks
    pub locks: ScopeLocks,
}

impl ScoreContext {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            db,
            event_bus,
            registry: Arc::new(SchemaRegistry::builtin()),
            locks: ScopeLocks::new(),
        }
    }

    pub fn mutator(&self) -> ScoreMutator {
        ScoreMutator::with_registry(self.db.clone(), self.event_bus.clone(), Arc::clone(&self.registry))
            .with_locks(self.locks.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.db.clone(), self.event_bus.clone(), self.locks.clone())
    }

    pub fn queries(&self) -> ScoreQueries {
        ScoreQueries::new(self.db.clone())
    }
}
