//! Settings table access

use crate::db::init::DEFAULT_MAX_LOCK_WAIT_MS;
use crate::Result;
use sqlx::SqlitePool;

/// SQLite busy timeout applied at startup (ms)
pub const LOCK_RETRY_MS_KEY: &str = "score_db_lock_retry_ms";

/// Total retry budget for a write hitting lock contention (ms)
pub const MAX_LOCK_WAIT_MS_KEY: &str = "score_db_max_lock_wait_ms";

/// Insert a setting if missing, or reset it when its value is NULL
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        WHERE settings.value IS NULL
        "#,
    )
    .bind(key)
    .bind(default_value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Read a setting as text
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    Ok(value.flatten())
}

/// Read a setting as an integer (None if missing or not numeric)
pub async fn get_setting_i64(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
    Ok(get_setting(pool, key)
        .await?
        .and_then(|v| v.trim().parse::<i64>().ok()))
}

/// Write a setting
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Retry budget for locked writes, falling back to the compiled default
pub async fn max_lock_wait_ms(pool: &SqlitePool) -> Result<u64> {
    let value = get_setting_i64(pool, MAX_LOCK_WAIT_MS_KEY)
        .await?
        .filter(|v| *v >= 0)
        .unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS);
    Ok(value as u64)
}
