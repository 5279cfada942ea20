//! Reconciliation sweep tests
//!
//! Interrupted migrations are simulated by writing the journal entry and
//! the store effects up to a given state by hand, then sweeping.

mod helpers;

use helpers::*;
use sqlx::SqlitePool;
use tachi_common::ScoreEvent;
use tachi_scores::db::{migrations, scores};
use tachi_scores::models::{
    MigrationRecord, MigrationState, ReferrerKind, SessionScoreInfo, StaleReference,
};
use tachi_scores::{ScoreCorrection, ScoreError};

struct Interrupted {
    old_id: String,
    new_id: String,
    migration_id: uuid::Uuid,
}

/// Store a score plus referrers and replay a migration up to `state`
async fn interrupted_at(pool: &SqlitePool, state: MigrationState) -> Interrupted {
    let old = iidx_score(USER_ID, CHART_ID, 1479, "HARD CLEAR");
    let new = iidx_score(USER_ID, CHART_ID, 1500, "HARD CLEAR");
    store_score(pool, &old).await;
    store_import(pool, "import_1", &[old.score_id.as_str(), "scoreid_2"]).await;
    store_session(pool, "session_1", &[("scoreid_1", false), (old.score_id.as_str(), true)]).await;

    let mut record = MigrationRecord::new(old.score_id.clone(), new.clone());
    migrations::insert_migration(pool, &record).await.unwrap();

    let path = [
        MigrationState::NewWritten,
        MigrationState::OldRetired,
        MigrationState::ReferencesPatched,
    ];
    for next in path {
        if !reached(state, next) {
            break;
        }
        match next {
            MigrationState::NewWritten => {
                scores::insert_score(pool, &new).await.unwrap();
            }
            MigrationState::OldRetired => {
                scores::delete_score(pool, &old.score_id).await.unwrap();
            }
            MigrationState::ReferencesPatched => {
                ctx_free_patch(pool, &old.score_id, &new.score_id).await;
            }
            _ => unreachable!(),
        }
        record.transition_to(next);
        migrations::save_progress(pool, &record).await.unwrap();
    }

    Interrupted {
        old_id: old.score_id,
        new_id: new.score_id,
        migration_id: record.migration_id,
    }
}

fn reached(target: MigrationState, step: MigrationState) -> bool {
    let order = [
        MigrationState::IdentityRecomputed,
        MigrationState::NewWritten,
        MigrationState::OldRetired,
        MigrationState::ReferencesPatched,
    ];
    let pos = |s: MigrationState| order.iter().position(|o| *o == s).unwrap();
    pos(step) <= pos(target)
}

async fn ctx_free_patch(pool: &SqlitePool, old_id: &str, new_id: &str) {
    tachi_scores::services::ReferenceMigrator::new(pool.clone())
        .migrate(old_id, new_id)
        .await
        .unwrap();
}

async fn assert_fully_migrated(pool: &SqlitePool, interrupted: &Interrupted) {
    assert!(!scores::exists(pool, &interrupted.old_id).await.unwrap());
    let new = scores::find_by_identity(pool, &interrupted.new_id).await.unwrap().unwrap();
    assert_eq!(new.metrics, iidx_metrics(1500, "HARD CLEAR"));

    assert_eq!(
        load_import(pool, "import_1").await.score_ids,
        vec![interrupted.new_id.clone(), "scoreid_2".to_string()]
    );
    assert_eq!(
        load_session(pool, "session_1").await.score_info,
        vec![
            SessionScoreInfo::new("scoreid_1", false),
            SessionScoreInfo::new(interrupted.new_id.clone(), true),
        ]
    );

    let record = migrations::load_migration(pool, interrupted.migration_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, MigrationState::Done);
}

#[tokio::test]
async fn test_sweep_resumes_from_every_interrupted_state() {
    for state in [
        MigrationState::IdentityRecomputed,
        MigrationState::NewWritten,
        MigrationState::OldRetired,
        MigrationState::ReferencesPatched,
    ] {
        let (_tmp, ctx) = create_test_context().await;
        let interrupted = interrupted_at(&ctx.db, state).await;

        let report = ctx.reconciler().sweep().await.unwrap();
        assert_eq!(report.migrations_resumed, 1, "resuming from {:?}", state);
        assert_eq!(report.migrations_failed, 0, "resuming from {:?}", state);

        assert_fully_migrated(&ctx.db, &interrupted).await;
        assert!(migrations::load_pending(&ctx.db).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let (_tmp, ctx) = create_test_context().await;
    let interrupted = interrupted_at(&ctx.db, MigrationState::NewWritten).await;
    let reconciler = ctx.reconciler();

    let first = reconciler.sweep().await.unwrap();
    assert!(!first.is_noop());
    assert_eq!(first.references.import_entries_patched, 1);
    assert_eq!(first.references.session_entries_patched, 1);

    let second = reconciler.sweep().await.unwrap();
    assert!(second.is_noop(), "second sweep changed something: {:?}", second);
    assert_fully_migrated(&ctx.db, &interrupted).await;
}

#[tokio::test]
async fn test_sweep_on_clean_store_is_noop() {
    let (_tmp, ctx) = create_test_context().await;
    let score = iidx_score(USER_ID, CHART_ID, 1479, "HARD CLEAR");
    store_score(&ctx.db, &score).await;
    store_import(&ctx.db, "import_1", &[score.score_id.as_str()]).await;

    let mut rx = ctx.event_bus.subscribe();
    let report = ctx.reconciler().sweep().await.unwrap();
    assert!(report.is_noop());

    match rx.try_recv().unwrap() {
        ScoreEvent::ReconciliationCompleted { migrations_resumed, .. } => {
            assert_eq!(migrations_resumed, 0)
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_stale_references_are_reported_not_fatal() {
    let (_tmp, ctx) = create_test_context().await;
    let score = iidx_score(USER_ID, CHART_ID, 1479, "HARD CLEAR");
    store_score(&ctx.db, &score).await;
    store_import(&ctx.db, "import_1", &["scoreid_1", score.score_id.as_str(), "scoreid_2"]).await;
    store_session(&ctx.db, "session_1", &[("scoreid_1", true)]).await;

    let reconciler = ctx.reconciler();
    let stale = reconciler.find_stale_references().await.unwrap();
    assert_eq!(
        stale,
        vec![
            StaleReference {
                referrer: ReferrerKind::ImportBatch,
                document_id: "import_1".to_string(),
                position: 0,
                score_id: "scoreid_1".to_string(),
            },
            StaleReference {
                referrer: ReferrerKind::ImportBatch,
                document_id: "import_1".to_string(),
                position: 2,
                score_id: "scoreid_2".to_string(),
            },
            StaleReference {
                referrer: ReferrerKind::SessionGrouping,
                document_id: "session_1".to_string(),
                position: 0,
                score_id: "scoreid_1".to_string(),
            },
        ]
    );

    // No known successor: the sweep leaves them alone
    let report = reconciler.sweep().await.unwrap();
    assert!(report.is_noop());
    assert_eq!(reconciler.find_stale_references().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_sweep_repoints_late_references_through_migration_chain() {
    let (_tmp, ctx) = create_test_context().await;
    let first = iidx_score(USER_ID, CHART_ID, 1479, "HARD CLEAR");
    store_score(&ctx.db, &first).await;

    let mutator = ctx.mutator();
    let hop1 = mutator
        .update_score(&first, ScoreCorrection::metrics(iidx_metrics(1500, "HARD CLEAR")))
        .await
        .unwrap();
    let second = ctx.queries().find_by_identity(&hop1.new_score_id).await.unwrap().unwrap();
    let hop2 = mutator
        .update_score(&second, ScoreCorrection::metrics(iidx_metrics(1500, "EX HARD CLEAR")))
        .await
        .unwrap();

    // A referrer written after both migrations still holds the first identity
    store_import(&ctx.db, "late_import", &[first.score_id.as_str()]).await;

    let reconciler = ctx.reconciler();
    let report = reconciler.sweep().await.unwrap();
    assert_eq!(report.migrations_resumed, 0);
    assert_eq!(report.references.import_entries_patched, 1);
    assert_eq!(
        load_import(&ctx.db, "late_import").await.score_ids,
        vec![hop2.new_score_id.clone()]
    );

    assert!(reconciler.sweep().await.unwrap().is_noop());
}

#[tokio::test]
async fn test_reconcile_identity_requires_existing_target() {
    let (_tmp, ctx) = create_test_context().await;
    store_import(&ctx.db, "import_1", &["scoreid_1"]).await;

    let result = ctx.reconciler().reconcile_identity("scoreid_1", "scoreid_2").await;
    assert!(matches!(result, Err(ScoreError::ScoreNotFound(id)) if id == "scoreid_2"));
    assert_eq!(load_import(&ctx.db, "import_1").await.score_ids, vec!["scoreid_1".to_string()]);
}

#[tokio::test]
async fn test_reconcile_identity_patches_explicit_pair() {
    let (_tmp, ctx) = create_test_context().await;
    let score = iidx_score(USER_ID, CHART_ID, 1479, "HARD CLEAR");
    store_score(&ctx.db, &score).await;
    store_import(&ctx.db, "import_1", &["scoreid_1", "scoreid_2", "scoreid_1"]).await;
    store_session(&ctx.db, "session_1", &[("scoreid_1", true)]).await;

    let report = ctx
        .reconciler()
        .reconcile_identity("scoreid_1", &score.score_id)
        .await
        .unwrap();
    assert_eq!(report.import_documents_patched, 1);
    assert_eq!(report.import_entries_patched, 2);
    assert_eq!(report.session_entries_patched, 1);
    assert_eq!(
        load_import(&ctx.db, "import_1").await.score_ids,
        vec![score.score_id.clone(), "scoreid_2".to_string(), score.score_id.clone()]
    );
}

#[tokio::test]
async fn test_failed_patching_is_incomplete_then_recovered() {
    let (_tmp, ctx) = create_test_context().await;
    let pool = &ctx.db;
    let target = iidx_score(USER_ID, CHART_ID, 1479, "HARD CLEAR");
    store_score(pool, &target).await;
    store_import(pool, "import_1", &[target.score_id.as_str()]).await;

    // A session document the store cannot scan makes reference patching fail
    sqlx::query(
        r#"
        INSERT INTO sessions (session_id, user_id, game, playtype, name, description,
            highlight, score_info, time_started, time_ended, time_inserted, views)
        VALUES ('broken', 1, 'iidx', 'SP', 'x', 'x', 0, 'not json',
            '2023-01-01T00:00:00+00:00', '2023-01-01T00:00:00+00:00', '2023-01-01T00:00:00+00:00', 0)
        "#,
    )
    .execute(pool)
    .await
    .unwrap();

    let mut rx = ctx.event_bus.subscribe();
    let result = ctx
        .mutator()
        .update_score(&target, ScoreCorrection::metrics(iidx_metrics(1500, "HARD CLEAR")))
        .await;

    let (migration_id, new_id) = match result {
        Err(ScoreError::ReferenceMigrationIncomplete {
            migration_id,
            old_score_id,
            new_score_id,
            ..
        }) => {
            assert_eq!(old_score_id, target.score_id);
            (migration_id, new_score_id)
        }
        other => panic!("expected ReferenceMigrationIncomplete, got {:?}", other),
    };
    assert_eq!(rx.try_recv().unwrap().event_type(), "ReferenceMigrationIncomplete");

    // Content is never lost: the new identity resolves, the old one is retired
    assert!(scores::exists(pool, &new_id).await.unwrap());
    assert!(!scores::exists(pool, &target.score_id).await.unwrap());

    let record = migrations::load_migration(pool, migration_id).await.unwrap().unwrap();
    assert_eq!(record.state, MigrationState::OldRetired);
    assert!(record.last_error.is_some());

    sqlx::query("DELETE FROM sessions WHERE session_id = 'broken'")
        .execute(pool)
        .await
        .unwrap();

    let report = ctx.reconciler().sweep().await.unwrap();
    assert_eq!(report.migrations_resumed, 1);
    assert_eq!(load_import(pool, "import_1").await.score_ids, vec![new_id.clone()]);

    let record = migrations::load_migration(pool, migration_id).await.unwrap().unwrap();
    assert_eq!(record.state, MigrationState::Done);
}

#[tokio::test]
async fn test_pending_migration_blocks_second_correction() {
    let (_tmp, ctx) = create_test_context().await;
    let old = iidx_score(USER_ID, CHART_ID, 1479, "HARD CLEAR");
    store_score(&ctx.db, &old).await;

    let pending = MigrationRecord::new(old.score_id.clone(), iidx_score(USER_ID, CHART_ID, 1500, "HARD CLEAR"));
    migrations::insert_migration(&ctx.db, &pending).await.unwrap();

    let result = ctx
        .mutator()
        .update_score(&old, ScoreCorrection::metrics(iidx_metrics(1600, "HARD CLEAR")))
        .await;
    assert!(matches!(result, Err(ScoreError::ScopeChanged { .. })));

    // Once reconciled the old identity is gone and the first correction stands
    ctx.reconciler().sweep().await.unwrap();
    assert!(!scores::exists(&ctx.db, &old.score_id).await.unwrap());
    assert!(scores::exists(&ctx.db, &pending.new_score_id).await.unwrap());
}

#[tokio::test]
async fn test_pending_migration_blocks_correcting_its_new_score() {
    let (_tmp, ctx) = create_test_context().await;
    let pool = &ctx.db;

    // Interrupted right after the new score was written, before the journal caught up
    let interrupted = interrupted_at(pool, MigrationState::IdentityRecomputed).await;
    let written = iidx_score(USER_ID, CHART_ID, 1500, "HARD CLEAR");
    assert_eq!(written.score_id, interrupted.new_id);
    store_score(pool, &written).await;

    let result = ctx
        .mutator()
        .update_score(&written, ScoreCorrection::metrics(iidx_metrics(1600, "HARD CLEAR")))
        .await;
    match result {
        Err(ScoreError::ScopeChanged { score_id }) => assert_eq!(score_id, interrupted.new_id),
        other => panic!("expected ScopeChanged, got {:?}", other),
    }

    let report = ctx.reconciler().sweep().await.unwrap();
    assert_eq!(report.migrations_resumed, 1);
    assert_fully_migrated(pool, &interrupted).await;
    assert_eq!(
        scores::find_for_scope(pool, USER_ID, CHART_ID).await.unwrap().len(),
        1,
        "one live score per result"
    );
}

#[tokio::test]
async fn test_correction_after_sweep_moves_every_referrer_once() {
    let (_tmp, ctx) = create_test_context().await;
    let pool = &ctx.db;

    let interrupted = interrupted_at(pool, MigrationState::NewWritten).await;
    ctx.reconciler().sweep().await.unwrap();

    let settled = ctx.queries().find_by_identity(&interrupted.new_id).await.unwrap().unwrap();
    let outcome = ctx
        .mutator()
        .update_score(&settled, ScoreCorrection::metrics(iidx_metrics(1600, "HARD CLEAR")))
        .await
        .unwrap();
    let final_id = outcome.new_score_id.clone();
    assert_eq!(outcome.old_score_id, interrupted.new_id);
    assert_eq!(outcome.import_entries_patched, 1);
    assert_eq!(outcome.session_entries_patched, 1);

    let in_scope = scores::find_for_scope(pool, USER_ID, CHART_ID).await.unwrap();
    assert_eq!(in_scope.len(), 1);
    assert_eq!(in_scope[0].score_id, final_id);
    assert_eq!(in_scope[0].metrics, iidx_metrics(1600, "HARD CLEAR"));

    assert_eq!(
        load_import(pool, "import_1").await.score_ids,
        vec![final_id.clone(), "scoreid_2".to_string()]
    );
    assert_eq!(
        load_session(pool, "session_1").await.score_info,
        vec![
            SessionScoreInfo::new("scoreid_1", false),
            SessionScoreInfo::new(final_id.clone(), true),
        ]
    );

    // Nothing left for another sweep to do
    assert!(ctx.reconciler().sweep().await.unwrap().is_noop());
}
