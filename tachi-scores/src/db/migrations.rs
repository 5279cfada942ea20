//! Score migration journal
//!
//! One row per identity migration. The row is written before the new score
//! exists and carries the full new document, so a sweep can roll any
//! pending migration forward without the caller that started it.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tachi_common::db::max_lock_wait_ms;
use tachi_common::{time, Error, Result};
use uuid::Uuid;

use crate::models::{MigrationRecord, MigrationState, Score};
use crate::utils::retry_on_lock;

fn state_json(state: MigrationState) -> Result<String> {
    serde_json::to_string(&state)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))
}

fn row_to_record(row: &SqliteRow) -> Result<MigrationRecord> {
    let migration_id: String = row.get("migration_id");
    let migration_id = Uuid::parse_str(&migration_id)
        .map_err(|e| Error::Internal(format!("Invalid migration id {}: {}", migration_id, e)))?;

    let state: String = row.get("state");
    let state: MigrationState = serde_json::from_str(&state)
        .map_err(|e| Error::Internal(format!("Failed to deserialize state: {}", e)))?;

    let new_score: String = row.get("new_score");
    let new_score: Score = serde_json::from_str(&new_score)
        .map_err(|e| Error::Internal(format!("Failed to deserialize new_score: {}", e)))?;

    let started_at: String = row.get("started_at");
    let updated_at: String = row.get("updated_at");

    Ok(MigrationRecord {
        migration_id,
        old_score_id: row.get("old_score_id"),
        new_score_id: row.get("new_score_id"),
        user_id: row.get("user_id"),
        chart_id: row.get("chart_id"),
        new_score,
        state,
        last_error: row.get("last_error"),
        started_at: time::from_db(&started_at)?,
        updated_at: time::from_db(&updated_at)?,
    })
}

/// Write a new journal entry
pub async fn insert_migration(pool: &SqlitePool, record: &MigrationRecord) -> Result<()> {
    let migration_id = record.migration_id.to_string();
    let state = state_json(record.state)?;
    let new_score = serde_json::to_string(&record.new_score)
        .map_err(|e| Error::Internal(format!("Failed to serialize new_score: {}", e)))?;
    let started_at = time::to_db(&record.started_at);
    let updated_at = time::to_db(&record.updated_at);
    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("insert_migration", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO score_migrations (
                migration_id, old_score_id, new_score_id, user_id, chart_id,
                new_score, state, last_error, started_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&migration_id)
        .bind(&record.old_score_id)
        .bind(&record.new_score_id)
        .bind(record.user_id)
        .bind(&record.chart_id)
        .bind(&new_score)
        .bind(&state)
        .bind(&record.last_error)
        .bind(&started_at)
        .bind(&updated_at)
        .execute(pool)
        .await?;

        Ok::<_, Error>(())
    })
    .await
}

/// Persist the record's current state and last error
pub async fn save_progress(pool: &SqlitePool, record: &MigrationRecord) -> Result<()> {
    let migration_id = record.migration_id.to_string();
    let state = state_json(record.state)?;
    let updated_at = time::to_db(&record.updated_at);
    let max_wait_ms = max_lock_wait_ms(pool).await?;

    let updated = retry_on_lock("save_migration_progress", max_wait_ms, || async {
        let result = sqlx::query(
            "UPDATE score_migrations SET state = ?, last_error = ?, updated_at = ? WHERE migration_id = ?",
        )
        .bind(&state)
        .bind(&record.last_error)
        .bind(&updated_at)
        .bind(&migration_id)
        .execute(pool)
        .await?;

        Ok::<_, Error>(result.rows_affected())
    })
    .await?;

    if updated == 0 {
        return Err(Error::NotFound(format!(
            "Migration journal entry {}",
            record.migration_id
        )));
    }
    Ok(())
}

/// Load one journal entry
pub async fn load_migration(pool: &SqlitePool, migration_id: Uuid) -> Result<Option<MigrationRecord>> {
    let row = sqlx::query("SELECT * FROM score_migrations WHERE migration_id = ?")
        .bind(migration_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Journal entries that reached neither DONE nor ABORTED, oldest first
pub async fn load_pending(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM score_migrations
        WHERE state NOT IN ('"DONE"', '"ABORTED"')
        ORDER BY started_at, migration_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// Journal entries for a (user, chart) scope, oldest first
pub async fn load_for_scope(
    pool: &SqlitePool,
    user_id: i64,
    chart_id: &str,
) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM score_migrations
        WHERE user_id = ? AND chart_id = ?
        ORDER BY started_at, migration_id
        "#,
    )
    .bind(user_id)
    .bind(chart_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// Most recent completed migration away from `old_score_id`
pub async fn find_completed_from(
    pool: &SqlitePool,
    old_score_id: &str,
) -> Result<Option<MigrationRecord>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM score_migrations
        WHERE old_score_id = ? AND state = '"DONE"'
        ORDER BY updated_at DESC, migration_id
        LIMIT 1
        "#,
    )
    .bind(old_score_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_record).transpose()
}
