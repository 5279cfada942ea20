//! Database initialization
//!
//! Opens (or creates) the SQLite database, creates every table idempotently,
//! seeds default settings and applies the configured busy timeout.
//!
//! Safe to call on every startup.

use crate::db::settings::{ensure_setting, get_setting_i64, LOCK_RETRY_MS_KEY, MAX_LOCK_WAIT_MS_KEY};
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Default SQLite busy timeout (ms) before a locked write returns an error
pub const DEFAULT_LOCK_RETRY_MS: i64 = 250;

/// Default total retry budget (ms) for a locked write
pub const DEFAULT_MAX_LOCK_WAIT_MS: i64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets readers proceed while a migration writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    let timeout_ms = get_setting_i64(&pool, LOCK_RETRY_MS_KEY)
        .await?
        .unwrap_or(DEFAULT_LOCK_RETRY_MS);

    let pragma_sql = format!("PRAGMA busy_timeout = {}", timeout_ms);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_scores_table(pool).await?;
    create_imports_table(pool).await?;
    create_sessions_table(pool).await?;
    create_score_migrations_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores runtime tunables as key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the scores table
///
/// `metrics` is the full metric bag as JSON; only the variant's relevant
/// metrics feed the identity in `score_id`.
async fn create_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scores (
            score_id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            game TEXT NOT NULL,
            playtype TEXT NOT NULL,
            chart_id TEXT NOT NULL,
            metrics TEXT NOT NULL,
            service TEXT NOT NULL,
            import_type TEXT,
            time_achieved TEXT,
            time_added TEXT NOT NULL,
            comment TEXT,
            highlight INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scores_user_chart ON scores(user_id, chart_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the imports table
///
/// `score_ids` is an ordered JSON array of score identities (duplicates allowed).
async fn create_imports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imports (
            import_id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            game TEXT NOT NULL,
            playtypes TEXT NOT NULL DEFAULT '[]',
            import_type TEXT NOT NULL,
            user_intent INTEGER NOT NULL DEFAULT 0,
            score_ids TEXT NOT NULL DEFAULT '[]',
            created_sessions TEXT NOT NULL DEFAULT '[]',
            time_started TEXT NOT NULL,
            time_finished TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the sessions table
///
/// `score_info` is an ordered JSON array of `{"scoreID", "isNewScore"}` entries.
async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            game TEXT NOT NULL,
            playtype TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            highlight INTEGER NOT NULL DEFAULT 0,
            import_type TEXT,
            score_info TEXT NOT NULL DEFAULT '[]',
            time_started TEXT NOT NULL,
            time_ended TEXT NOT NULL,
            time_inserted TEXT NOT NULL,
            views INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the score migration journal
///
/// One row per identity migration. `new_score` holds the full document
/// written under `new_score_id` so an interrupted migration can roll forward.
async fn create_score_migrations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS score_migrations (
            migration_id TEXT PRIMARY KEY,
            old_score_id TEXT NOT NULL,
            new_score_id TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            chart_id TEXT NOT NULL,
            new_score TEXT NOT NULL,
            state TEXT NOT NULL,
            last_error TEXT,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_score_migrations_state ON score_migrations(state)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures every setting exists; NULL values are reset to defaults.
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, LOCK_RETRY_MS_KEY, &DEFAULT_LOCK_RETRY_MS.to_string()).await?;
    ensure_setting(pool, MAX_LOCK_WAIT_MS_KEY, &DEFAULT_MAX_LOCK_WAIT_MS.to_string()).await?;
    Ok(())
}
