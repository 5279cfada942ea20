//! Tests for database initialization
//!
//! Covers automatic database creation, idempotent re-initialization and
//! default settings.

use tachi_common::db::{
    get_setting, init_database, max_lock_wait_ms, set_setting, DEFAULT_MAX_LOCK_WAIT_MS,
    LOCK_RETRY_MS_KEY, MAX_LOCK_WAIT_MS_KEY,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("tachi.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_all_tables_created() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("tachi.db")).await.unwrap();

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    for expected in ["imports", "score_migrations", "scores", "sessions", "settings"] {
        assert!(
            tables.iter().any(|t| t == expected),
            "Missing table {}, got {:?}",
            expected,
            tables
        );
    }
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("tachi.db")).await.unwrap();

    assert_eq!(
        get_setting(&pool, LOCK_RETRY_MS_KEY).await.unwrap(),
        Some("250".to_string())
    );
    assert_eq!(
        max_lock_wait_ms(&pool).await.unwrap(),
        DEFAULT_MAX_LOCK_WAIT_MS as u64
    );
}

#[tokio::test]
async fn test_idempotent_initialization_keeps_custom_settings() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tachi.db");

    let pool1 = init_database(&db_path).await.unwrap();
    set_setting(&pool1, MAX_LOCK_WAIT_MS_KEY, "1200").await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    assert_eq!(max_lock_wait_ms(&pool2).await.unwrap(), 1200);
}

#[tokio::test]
async fn test_null_setting_reset_to_default() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tachi.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("UPDATE settings SET value = NULL WHERE key = ?")
        .bind(MAX_LOCK_WAIT_MS_KEY)
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    assert_eq!(
        get_setting(&pool2, MAX_LOCK_WAIT_MS_KEY).await.unwrap(),
        Some("5000".to_string())
    );
}
