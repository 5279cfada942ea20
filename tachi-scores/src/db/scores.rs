//! Score document store
//!
//! Scores are keyed by their identity. A missing identity is an ordinary
//! outcome (`Ok(None)`), never an error.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tachi_common::db::max_lock_wait_ms;
use tachi_common::{time, Error, Result};

use crate::models::{AuxFields, MetricBag, Score};
use crate::utils::retry_on_lock;

const SCORE_COLUMNS: &str = r#"
    score_id, user_id, game, playtype, chart_id, metrics,
    service, import_type, time_achieved, time_added, comment, highlight
"#;

fn row_to_score(row: &SqliteRow) -> Result<Score> {
    let metrics: String = row.get("metrics");
    let metrics: MetricBag = serde_json::from_str(&metrics)
        .map_err(|e| Error::Internal(format!("Failed to deserialize metrics: {}", e)))?;

    let time_achieved: Option<String> = row.get("time_achieved");
    let time_added: String = row.get("time_added");

    Ok(Score {
        score_id: row.get("score_id"),
        user_id: row.get("user_id"),
        game: row.get("game"),
        playtype: row.get("playtype"),
        chart_id: row.get("chart_id"),
        metrics,
        aux: AuxFields {
            service: row.get("service"),
            import_type: row.get("import_type"),
            time_achieved: time::from_db_opt(time_achieved.as_deref())?,
            time_added: time::from_db(&time_added)?,
            comment: row.get("comment"),
            highlight: row.get::<i64, _>("highlight") != 0,
        },
    })
}

fn metrics_json(score: &Score) -> Result<String> {
    serde_json::to_string(&score.metrics)
        .map_err(|e| Error::Internal(format!("Failed to serialize metrics: {}", e)))
}

/// Look a score up by identity
pub async fn find_by_identity(pool: &SqlitePool, score_id: &str) -> Result<Option<Score>> {
    let sql = format!("SELECT {} FROM scores WHERE score_id = ?", SCORE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(score_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_score).transpose()
}

/// Whether a score exists under this identity
pub async fn exists(pool: &SqlitePool, score_id: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scores WHERE score_id = ?")
        .bind(score_id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// All scores a user holds on a chart
pub async fn find_for_scope(pool: &SqlitePool, user_id: i64, chart_id: &str) -> Result<Vec<Score>> {
    let sql = format!(
        "SELECT {} FROM scores WHERE user_id = ? AND chart_id = ? ORDER BY time_added",
        SCORE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(chart_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_score).collect()
}

/// Insert a score
///
/// Returns `false` if a score already exists under this identity; the stored
/// document is left untouched in that case.
pub async fn insert_score(pool: &SqlitePool, score: &Score) -> Result<bool> {
    let metrics = metrics_json(score)?;
    let time_achieved = score.aux.time_achieved.as_ref().map(time::to_db);
    let time_added = time::to_db(&score.aux.time_added);
    let max_wait_ms = max_lock_wait_ms(pool).await?;

    let sql = format!(
        "INSERT INTO scores ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(score_id) DO NOTHING",
        SCORE_COLUMNS
    );

    retry_on_lock("insert_score", max_wait_ms, || async {
        let result = sqlx::query(&sql)
            .bind(&score.score_id)
            .bind(score.user_id)
            .bind(&score.game)
            .bind(&score.playtype)
            .bind(&score.chart_id)
            .bind(&metrics)
            .bind(&score.aux.service)
            .bind(&score.aux.import_type)
            .bind(&time_achieved)
            .bind(&time_added)
            .bind(&score.aux.comment)
            .bind(score.aux.highlight as i64)
            .execute(pool)
            .await?;

        Ok::<_, Error>(result.rows_affected() == 1)
    })
    .await
}

/// Overwrite a score's metric bag and auxiliary fields, keeping its identity
///
/// Only valid when the new content hashes to the same identity.
/// Returns `false` if the score no longer exists.
pub async fn update_in_place(pool: &SqlitePool, score: &Score) -> Result<bool> {
    let metrics = metrics_json(score)?;
    let time_achieved = score.aux.time_achieved.as_ref().map(time::to_db);
    let time_added = time::to_db(&score.aux.time_added);
    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("update_score_in_place", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE scores SET
                metrics = ?,
                service = ?,
                import_type = ?,
                time_achieved = ?,
                time_added = ?,
                comment = ?,
                highlight = ?
            WHERE score_id = ?
            "#,
        )
        .bind(&metrics)
        .bind(&score.aux.service)
        .bind(&score.aux.import_type)
        .bind(&time_achieved)
        .bind(&time_added)
        .bind(&score.aux.comment)
        .bind(score.aux.highlight as i64)
        .bind(&score.score_id)
        .execute(pool)
        .await?;

        Ok::<_, Error>(result.rows_affected() == 1)
    })
    .await
}

/// Delete a score
///
/// Returns `false` if nothing was stored under this identity.
pub async fn delete_score(pool: &SqlitePool, score_id: &str) -> Result<bool> {
    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("delete_score", max_wait_ms, || async {
        let result = sqlx::query("DELETE FROM scores WHERE score_id = ?")
            .bind(score_id)
            .execute(pool)
            .await?;

        Ok::<_, Error>(result.rows_affected() == 1)
    })
    .await
}
