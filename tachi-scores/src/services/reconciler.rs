//! Reconciliation sweep
//!
//! Rolls interrupted identity migrations forward from their journal entries
//! and repoints stale referrers whose identity was retired by a completed
//! migration. Every step is idempotent, so the sweep can be re-run at any
//! time, including while it is itself being interrupted.

use std::collections::BTreeSet;

use sqlx::SqlitePool;
use tachi_common::{EventBus, ScoreEvent};

use crate::db::{imports, migrations, scores, sessions};
use crate::error::{ScoreError, ScoreResult};
use crate::models::{
    MigrationRecord, MigrationState, ReferencePatchReport, ReferrerKind, StaleReference,
    SweepReport,
};
use crate::services::score_mutator::{advance, emit_migrated, note_failure};
use crate::services::{ReferenceMigrator, ScopeLocks};

/// Longest chain of completed migrations followed when resolving a stale id
const MAX_FORWARD_HOPS: usize = 32;

pub struct Reconciler {
    db: SqlitePool,
    locks: ScopeLocks,
    migrator: ReferenceMigrator,
    event_bus: EventBus,
}

impl Reconciler {
    /// Create a reconciler sharing `locks` with the mutators of this process
    pub fn new(db: SqlitePool, event_bus: EventBus, locks: ScopeLocks) -> Self {
        Self {
            migrator: ReferenceMigrator::new(db.clone()),
            db,
            locks,
            event_bus,
        }
    }

    /// Run one reconciliation sweep
    ///
    /// **Algorithm:**
    /// 1. Roll every pending journal entry forward to DONE under its scope lock
    /// 2. For every stale referrer identity, follow completed migrations to the
    ///    identity that replaced it and patch the referrers there
    /// 3. Emit `ReconciliationCompleted`
    ///
    /// A journal entry that fails again is counted in `migrations_failed`,
    /// keeps its state, and is retried by the next sweep.
    pub async fn sweep(&self) -> ScoreResult<SweepReport> {
        let mut report = SweepReport::default();

        let pending = migrations::load_pending(&self.db).await?;
        if !pending.is_empty() {
            tracing::warn!(count = pending.len(), "Resuming pending score migrations");
        }

        for record in pending {
            let migration_id = record.migration_id;
            match self.resume(record).await {
                Ok(Some(patched)) => {
                    report.migrations_resumed += 1;
                    report.references.merge(patched);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        migration_id = %migration_id,
                        error = %e,
                        "Pending migration could not be completed"
                    );
                    report.migrations_failed += 1;
                }
            }
        }

        let stale_ids: BTreeSet<String> = self
            .find_stale_references()
            .await?
            .into_iter()
            .map(|stale| stale.score_id)
            .collect();

        for stale_id in stale_ids {
            let Some(target) = self.resolve_forward(&stale_id).await? else {
                tracing::debug!(score_id = %stale_id, "Stale reference has no known successor");
                continue;
            };
            let patched = self.reconcile_identity(&stale_id, &target).await?;
            report.references.merge(patched);
        }

        tracing::info!(
            migrations_resumed = report.migrations_resumed,
            migrations_failed = report.migrations_failed,
            import_entries = report.references.import_entries_patched,
            session_entries = report.references.session_entries_patched,
            "Reconciliation sweep finished"
        );

        self.event_bus.emit_lossy(ScoreEvent::ReconciliationCompleted {
            migrations_resumed: report.migrations_resumed,
            import_entries_patched: report.references.import_entries_patched,
            session_entries_patched: report.references.session_entries_patched,
            timestamp: tachi_common::time::now(),
        });

        Ok(report)
    }

    /// Finish one journal entry; `None` if it was already terminal
    async fn resume(&self, record: MigrationRecord) -> ScoreResult<Option<ReferencePatchReport>> {
        let _scope = self.locks.acquire(record.user_id, &record.chart_id).await;

        // Another task may have finished it while we waited for the scope.
        let Some(mut record) = migrations::load_migration(&self.db, record.migration_id).await? else {
            return Ok(None);
        };
        if record.state.is_terminal() {
            return Ok(None);
        }

        tracing::debug!(
            migration_id = %record.migration_id,
            state = ?record.state,
            "Rolling migration forward"
        );

        let mut patched = ReferencePatchReport::default();
        loop {
            let step = match record.state {
                MigrationState::Idle | MigrationState::IdentityRecomputed => {
                    self.rewrite_new(&record).await.map(|_| MigrationState::NewWritten)
                }
                MigrationState::NewWritten => scores::delete_score(&self.db, &record.old_score_id)
                    .await
                    .map(|_| MigrationState::OldRetired),
                MigrationState::OldRetired => self
                    .migrator
                    .migrate(&record.old_score_id, &record.new_score_id)
                    .await
                    .map(|report| {
                        patched = report;
                        MigrationState::ReferencesPatched
                    }),
                MigrationState::ReferencesPatched => Ok(MigrationState::Done),
                MigrationState::Done | MigrationState::Aborted => break,
            };

            match step {
                Ok(next) => {
                    if record.state == MigrationState::Idle {
                        advance(&self.db, &mut record, MigrationState::IdentityRecomputed).await?;
                    }
                    advance(&self.db, &mut record, next).await?;
                }
                Err(e) => {
                    note_failure(&self.db, &mut record, &e.to_string()).await;
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            migration_id = %record.migration_id,
            old_score_id = %record.old_score_id,
            new_score_id = %record.new_score_id,
            "Pending migration completed"
        );
        emit_migrated(
            &self.event_bus,
            &record,
            patched.import_entries_patched,
            patched.session_entries_patched,
        );

        Ok(Some(patched))
    }

    /// Make sure the journaled new score exists
    async fn rewrite_new(&self, record: &MigrationRecord) -> tachi_common::Result<()> {
        if !scores::insert_score(&self.db, &record.new_score).await? {
            tracing::debug!(new_score_id = %record.new_score_id, "New score already written");
        }
        Ok(())
    }

    /// Follow completed migrations from `score_id` to a stored identity
    async fn resolve_forward(&self, score_id: &str) -> ScoreResult<Option<String>> {
        let mut current = score_id.to_string();
        for _ in 0..MAX_FORWARD_HOPS {
            let Some(done) = migrations::find_completed_from(&self.db, &current).await? else {
                return Ok(None);
            };
            if scores::exists(&self.db, &done.new_score_id).await? {
                return Ok(Some(done.new_score_id));
            }
            current = done.new_score_id;
        }
        Ok(None)
    }

    /// Repoint every referrer of `old_id` at `new_id`
    ///
    /// `new_id` must resolve to a stored score, otherwise `ScoreNotFound`;
    /// patching towards a missing score would only move the staleness.
    pub async fn reconcile_identity(&self, old_id: &str, new_id: &str) -> ScoreResult<ReferencePatchReport> {
        let target = scores::find_by_identity(&self.db, new_id)
            .await?
            .ok_or_else(|| ScoreError::ScoreNotFound(new_id.to_string()))?;

        let _scope = self.locks.acquire(target.user_id, &target.chart_id).await;
        let report = self.migrator.migrate(old_id, new_id).await?;

        if !report.is_empty() {
            tracing::info!(
                old_score_id = %old_id,
                new_score_id = %new_id,
                import_entries = report.import_entries_patched,
                session_entries = report.session_entries_patched,
                "Stale references repointed"
            );
        }
        Ok(report)
    }

    /// Every referrer entry whose identity does not resolve to a score
    pub async fn find_stale_references(&self) -> ScoreResult<Vec<StaleReference>> {
        let (import_entries, session_entries) = tokio::try_join!(
            imports::dangling_entries(&self.db),
            sessions::dangling_entries(&self.db),
        )?;

        let imports = import_entries
            .into_iter()
            .map(|(document_id, position, score_id)| (ReferrerKind::ImportBatch, document_id, position, score_id));
        let sessions = session_entries
            .into_iter()
            .map(|(document_id, position, score_id)| (ReferrerKind::SessionGrouping, document_id, position, score_id));

        let stale: Vec<StaleReference> = imports
            .chain(sessions)
            .map(|(referrer, document_id, position, score_id)| StaleReference {
                referrer,
                document_id,
                position: position.max(0) as usize,
                score_id,
            })
            .collect();

        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "Stale score references found");
        }
        Ok(stale)
    }
}
