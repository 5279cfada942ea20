//! Test helpers: temporary databases and document fixtures

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use sqlx::SqlitePool;
use tachi_common::db::init_database;
use tachi_common::EventBus;
use tachi_scores::db::{imports, scores, sessions};
use tachi_scores::models::{AuxFields, ImportBatch, SessionGrouping, SessionScoreInfo};
use tachi_scores::{create_score_id, GameVariant, MetricBag, Score, ScoreContext};
use tempfile::TempDir;

pub const CHART_ID: &str = "c2311194e3897ddb5745b1760d2c0141f933e683";
pub const USER_ID: i64 = 1;

/// Create a temporary database with the full schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for the test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("tachi.db")).await.unwrap();
    (temp_dir, pool)
}

pub async fn create_test_context() -> (TempDir, ScoreContext) {
    let (temp_dir, pool) = create_test_db().await;
    (temp_dir, ScoreContext::new(pool, EventBus::new(64)))
}

pub fn iidx_sp() -> GameVariant {
    GameVariant::new("iidx", "SP")
}

pub fn iidx_metrics(score: i64, lamp: &str) -> MetricBag {
    MetricBag::new().with("score", score).with("lamp", lamp)
}

/// Build an iidx:SP score with a correctly derived identity
pub fn iidx_score(user_id: i64, chart_id: &str, score: i64, lamp: &str) -> Score {
    let metrics = iidx_metrics(score, lamp);
    let score_id = create_score_id(&iidx_sp(), user_id, chart_id, &metrics).unwrap();
    let mut aux = AuxFields::new("ARC");
    aux.time_added = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    aux.comment = Some("original".to_string());

    Score {
        score_id,
        user_id,
        game: "iidx".to_string(),
        playtype: "SP".to_string(),
        chart_id: chart_id.to_string(),
        metrics,
        aux,
    }
}

pub async fn store_score(pool: &SqlitePool, score: &Score) {
    assert!(scores::insert_score(pool, score).await.unwrap(), "fixture score already stored");
}

pub async fn store_import(pool: &SqlitePool, import_id: &str, score_ids: &[&str]) -> ImportBatch {
    let import = ImportBatch {
        import_id: import_id.to_string(),
        user_id: USER_ID,
        game: "iidx".to_string(),
        playtypes: vec!["SP".to_string()],
        import_type: "file/batch-manual".to_string(),
        user_intent: true,
        score_ids: score_ids.iter().map(|s| s.to_string()).collect(),
        created_sessions: Vec::new(),
        time_started: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        time_finished: Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 1, 0).unwrap()),
    };
    imports::insert_import(pool, &import).await.unwrap();
    import
}

pub async fn store_session(
    pool: &SqlitePool,
    session_id: &str,
    entries: &[(&str, bool)],
) -> SessionGrouping {
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let session = SessionGrouping {
        session_id: session_id.to_string(),
        user_id: USER_ID,
        game: "iidx".to_string(),
        playtype: "SP".to_string(),
        name: "Mock Session".to_string(),
        description: "Mock session for testing".to_string(),
        highlight: false,
        import_type: Some("file/batch-manual".to_string()),
        score_info: entries
            .iter()
            .map(|(id, is_new)| SessionScoreInfo::new(*id, *is_new))
            .collect(),
        time_started: start,
        time_ended: start + chrono::Duration::minutes(30),
        time_inserted: start + chrono::Duration::minutes(31),
        views: 0,
    };
    sessions::insert_session(pool, &session).await.unwrap();
    session
}

pub async fn load_import(pool: &SqlitePool, import_id: &str) -> ImportBatch {
    imports::find_import(pool, import_id).await.unwrap().unwrap()
}

pub async fn load_session(pool: &SqlitePool, session_id: &str) -> SessionGrouping {
    sessions::find_session(pool, session_id).await.unwrap().unwrap()
}
