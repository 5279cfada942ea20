//! Score Mutator
//!
//! Applies a correction to an existing score. Content that changes the
//! identity moves the score to a new identity through the journaled state
//! machine (see `models::migration`); content that keeps the identity is
//! written in place.

use std::sync::Arc;

use sqlx::SqlitePool;
use tachi_common::{Error, EventBus, ScoreEvent};

use crate::db::{migrations, scores};
use crate::error::{ScoreError, ScoreResult};
use crate::identity::{compute_identity, SchemaRegistry};
use crate::models::{MigrationOutcome, MigrationRecord, MigrationState, Score, ScoreCorrection};
use crate::services::{ReferenceMigrator, ScopeLocks};

/// Move a journal entry to `next` and persist it
///
/// An illegal transition is a programming defect and is reported as
/// `Error::Internal` without touching the journal.
pub(crate) async fn advance(
    db: &SqlitePool,
    record: &mut MigrationRecord,
    next: MigrationState,
) -> tachi_common::Result<()> {
    if !record.state.can_transition_to(next) {
        return Err(Error::Internal(format!(
            "Illegal migration transition {:?} -> {:?} for {}",
            record.state, next, record.migration_id
        )));
    }

    let transition = record.transition_to(next);
    tracing::debug!(
        migration_id = %transition.migration_id,
        from = ?transition.old_state,
        to = ?transition.new_state,
        "Migration state transition"
    );
    migrations::save_progress(db, record).await
}

/// Record a failure on the journal entry, keeping its state
///
/// The journal write is best effort; the original failure is what the
/// caller reports.
pub(crate) async fn note_failure(db: &SqlitePool, record: &mut MigrationRecord, reason: &str) {
    record.last_error = Some(reason.to_string());
    record.updated_at = tachi_common::time::now();
    if let Err(e) = migrations::save_progress(db, record).await {
        tracing::warn!(
            migration_id = %record.migration_id,
            error = %e,
            "Failed to record migration failure in journal"
        );
    }
}

pub(crate) fn emit_migrated(
    event_bus: &EventBus,
    record: &MigrationRecord,
    import_entries_patched: usize,
    session_entries_patched: usize,
) {
    let timestamp = tachi_common::time::now();
    event_bus.emit_lossy(ScoreEvent::ScoreIdentityMigrated {
        migration_id: record.migration_id,
        old_score_id: record.old_score_id.clone(),
        new_score_id: record.new_score_id.clone(),
        user_id: record.user_id,
        chart_id: record.chart_id.clone(),
        import_entries_patched,
        session_entries_patched,
        timestamp,
    });
    emit_best_invalidated(event_bus, &record.new_score);
}

pub(crate) fn emit_best_invalidated(event_bus: &EventBus, score: &Score) {
    event_bus.emit_lossy(ScoreEvent::PersonalBestInvalidated {
        user_id: score.user_id,
        game: score.game.clone(),
        playtype: score.playtype.clone(),
        chart_id: score.chart_id.clone(),
        timestamp: tachi_common::time::now(),
    });
}

/// Score correction service
///
/// Mutations of the same (user, chart) are serialized through a shared
/// [`ScopeLocks`] table; reads never take it.
pub struct ScoreMutator {
    db: SqlitePool,
    registry: Arc<SchemaRegistry>,
    locks: ScopeLocks,
    migrator: ReferenceMigrator,
    event_bus: EventBus,
}

impl ScoreMutator {
    /// Create a mutator over the built-in variant schemas
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self::with_registry(db, event_bus, Arc::new(SchemaRegistry::builtin()))
    }

    pub fn with_registry(db: SqlitePool, event_bus: EventBus, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            migrator: ReferenceMigrator::new(db.clone()),
            db,
            registry,
            locks: ScopeLocks::new(),
            event_bus,
        }
    }

    /// Share an existing lock table (e.g. with a `Reconciler`)
    pub fn with_locks(mut self, locks: ScopeLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Look a score up by identity; absence is `Ok(None)`
    pub async fn find_by_identity(&self, score_id: &str) -> ScoreResult<Option<Score>> {
        Ok(scores::find_by_identity(&self.db, score_id).await?)
    }

    /// Apply `correction` to `existing`
    ///
    /// **Algorithm:**
    /// 1. Recompute the identity from the corrected metrics (fails with
    ///    `InvalidMetricSchema` before anything is locked or written)
    /// 2. Lock the (user, chart) scope and re-read the stored score
    ///    (`ScoreNotFound` if it is gone)
    /// 3. Same identity: overwrite metrics and auxiliary fields in place
    /// 4. New identity: journal → write new → delete old → patch referrers → done
    ///
    /// If the new identity is already stored the two scores merge: the stored
    /// document is kept and only auxiliary fields given explicitly in the
    /// correction are written over it.
    ///
    /// A correction of a score that a pending migration retires or still has
    /// to write fails with `ScopeChanged` until a sweep settles it.
    ///
    /// A failure after the new score is written leaves the journal entry
    /// pending for `Reconciler::sweep`. A failure while patching referrers
    /// is reported as `ReferenceMigrationIncomplete`.
    pub async fn update_score(
        &self,
        existing: &Score,
        correction: ScoreCorrection,
    ) -> ScoreResult<MigrationOutcome> {
        let variant = existing.variant();
        let new_id = compute_identity(
            &self.registry,
            &variant,
            existing.user_id,
            &existing.chart_id,
            &correction.metrics,
        )?;

        tracing::debug!(
            old_score_id = %existing.score_id,
            new_score_id = %new_id,
            user_id = existing.user_id,
            chart_id = %existing.chart_id,
            "Identity recomputed"
        );

        let _scope = self.locks.acquire(existing.user_id, &existing.chart_id).await;

        let current = scores::find_by_identity(&self.db, &existing.score_id)
            .await?
            .ok_or_else(|| ScoreError::ScoreNotFound(existing.score_id.clone()))?;

        // A pending migration either retires this score or still has to
        // rewrite it from its journaled copy; both must settle first.
        let in_flight = migrations::load_for_scope(&self.db, current.user_id, &current.chart_id)
            .await?
            .into_iter()
            .any(|m| {
                !m.state.is_terminal()
                    && (m.old_score_id == current.score_id || m.new_score_id == current.score_id)
            });
        if in_flight {
            tracing::warn!(
                score_id = %current.score_id,
                "Score has an unfinished migration; refusing a second one"
            );
            return Err(ScoreError::ScopeChanged {
                score_id: current.score_id,
            });
        }

        let aux_supplied = correction.aux.is_some();
        let corrected = Score {
            score_id: new_id,
            user_id: current.user_id,
            game: current.game.clone(),
            playtype: current.playtype.clone(),
            chart_id: current.chart_id.clone(),
            metrics: correction.metrics,
            aux: correction.aux.unwrap_or_else(|| current.aux.clone()),
        };

        if corrected.score_id == current.score_id {
            self.update_in_place(corrected).await
        } else {
            self.migrate_identity(current, corrected, aux_supplied).await
        }
    }

    async fn update_in_place(&self, corrected: Score) -> ScoreResult<MigrationOutcome> {
        if !scores::update_in_place(&self.db, &corrected).await? {
            return Err(ScoreError::ScoreNotFound(corrected.score_id));
        }

        tracing::info!(score_id = %corrected.score_id, "Score updated in place");

        self.event_bus.emit_lossy(ScoreEvent::ScoreUpdatedInPlace {
            score_id: corrected.score_id.clone(),
            user_id: corrected.user_id,
            chart_id: corrected.chart_id.clone(),
            timestamp: tachi_common::time::now(),
        });
        emit_best_invalidated(&self.event_bus, &corrected);

        Ok(MigrationOutcome {
            migration_id: None,
            old_score_id: corrected.score_id.clone(),
            new_score_id: corrected.score_id,
            final_state: MigrationState::Done,
            import_entries_patched: 0,
            session_entries_patched: 0,
        })
    }

    /// Write `corrected`'s auxiliary fields onto the stored score of the same identity
    async fn merge_aux(&self, corrected: &Score) -> ScoreResult<()> {
        let mut stored = scores::find_by_identity(&self.db, &corrected.score_id)
            .await?
            .ok_or_else(|| ScoreError::ScoreNotFound(corrected.score_id.clone()))?;
        stored.aux = corrected.aux.clone();
        scores::update_in_place(&self.db, &stored).await?;
        Ok(())
    }

    async fn migrate_identity(
        &self,
        current: Score,
        corrected: Score,
        aux_supplied: bool,
    ) -> ScoreResult<MigrationOutcome> {
        let mut record = MigrationRecord::new(current.score_id.clone(), corrected);
        migrations::insert_migration(&self.db, &record).await?;

        tracing::debug!(
            migration_id = %record.migration_id,
            old_score_id = %record.old_score_id,
            new_score_id = %record.new_score_id,
            "Migration journaled"
        );

        match scores::insert_score(&self.db, &record.new_score).await {
            Ok(true) => {}
            Ok(false) if aux_supplied => {
                tracing::warn!(
                    migration_id = %record.migration_id,
                    new_score_id = %record.new_score_id,
                    "New identity already stored; applying corrected auxiliary fields"
                );
                self.merge_aux(&record.new_score).await?;
            }
            Ok(false) => {
                tracing::warn!(
                    migration_id = %record.migration_id,
                    new_score_id = %record.new_score_id,
                    "New identity already stored; keeping the stored document"
                );
            }
            Err(e) => {
                tracing::error!(
                    migration_id = %record.migration_id,
                    error = %e,
                    "Failed to write new score; aborting migration"
                );
                record.last_error = Some(e.to_string());
                if let Err(journal_err) = advance(&self.db, &mut record, MigrationState::Aborted).await {
                    tracing::warn!(
                        migration_id = %record.migration_id,
                        error = %journal_err,
                        "Failed to mark migration aborted"
                    );
                }
                return Err(e.into());
            }
        }
        advance(&self.db, &mut record, MigrationState::NewWritten).await?;

        if !scores::delete_score(&self.db, &record.old_score_id).await? {
            tracing::warn!(
                migration_id = %record.migration_id,
                old_score_id = %record.old_score_id,
                "Old score already gone"
            );
        }
        advance(&self.db, &mut record, MigrationState::OldRetired).await?;

        let report = match self.migrator.migrate(&record.old_score_id, &record.new_score_id).await {
            Ok(report) => report,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(
                    migration_id = %record.migration_id,
                    error = %reason,
                    "Reference migration incomplete; left for reconciliation"
                );
                note_failure(&self.db, &mut record, &reason).await;

                self.event_bus.emit_lossy(ScoreEvent::ReferenceMigrationIncomplete {
                    migration_id: record.migration_id,
                    old_score_id: record.old_score_id.clone(),
                    new_score_id: record.new_score_id.clone(),
                    reason: reason.clone(),
                    timestamp: tachi_common::time::now(),
                });

                return Err(ScoreError::ReferenceMigrationIncomplete {
                    migration_id: record.migration_id,
                    old_score_id: record.old_score_id,
                    new_score_id: record.new_score_id,
                    reason,
                });
            }
        };
        advance(&self.db, &mut record, MigrationState::ReferencesPatched).await?;
        advance(&self.db, &mut record, MigrationState::Done).await?;

        tracing::info!(
            migration_id = %record.migration_id,
            old_score_id = %record.old_score_id,
            new_score_id = %record.new_score_id,
            import_entries = report.import_entries_patched,
            session_entries = report.session_entries_patched,
            "Score identity migrated"
        );

        emit_migrated(
            &self.event_bus,
            &record,
            report.import_entries_patched,
            report.session_entries_patched,
        );

        Ok(MigrationOutcome {
            migration_id: Some(record.migration_id),
            old_score_id: record.old_score_id,
            new_score_id: record.new_score_id,
            final_state: record.state,
            import_entries_patched: report.import_entries_patched,
            session_entries_patched: report.session_entries_patched,
        })
    }
}
