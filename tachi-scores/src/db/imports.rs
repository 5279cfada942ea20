//! Import batch document store

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tachi_common::db::max_lock_wait_ms;
use tachi_common::{time, Error, Result};

use crate::models::ImportBatch;
use crate::utils::retry_on_lock;

/// Raw `score_ids` of one import, as stored
///
/// `raw` is the exact stored JSON text and serves as the compare-and-swap
/// token when the list is written back.
#[derive(Debug, Clone)]
pub struct ImportScoreIds {
    pub import_id: String,
    pub raw: String,
    pub score_ids: Vec<String>,
}

fn json_err(what: &str, e: serde_json::Error) -> Error {
    Error::Internal(format!("Failed to (de)serialize {}: {}", what, e))
}

fn row_to_import(row: &SqliteRow) -> Result<ImportBatch> {
    let playtypes: String = row.get("playtypes");
    let score_ids: String = row.get("score_ids");
    let created_sessions: String = row.get("created_sessions");
    let time_started: String = row.get("time_started");
    let time_finished: Option<String> = row.get("time_finished");

    Ok(ImportBatch {
        import_id: row.get("import_id"),
        user_id: row.get("user_id"),
        game: row.get("game"),
        playtypes: serde_json::from_str(&playtypes).map_err(|e| json_err("playtypes", e))?,
        import_type: row.get("import_type"),
        user_intent: row.get::<i64, _>("user_intent") != 0,
        score_ids: serde_json::from_str(&score_ids).map_err(|e| json_err("score_ids", e))?,
        created_sessions: serde_json::from_str(&created_sessions)
            .map_err(|e| json_err("created_sessions", e))?,
        time_started: time::from_db(&time_started)?,
        time_finished: time::from_db_opt(time_finished.as_deref())?,
    })
}

/// Insert an import batch
pub async fn insert_import(pool: &SqlitePool, import: &ImportBatch) -> Result<()> {
    let playtypes = serde_json::to_string(&import.playtypes).map_err(|e| json_err("playtypes", e))?;
    let score_ids = serde_json::to_string(&import.score_ids).map_err(|e| json_err("score_ids", e))?;
    let created_sessions = serde_json::to_string(&import.created_sessions)
        .map_err(|e| json_err("created_sessions", e))?;

    sqlx::query(
        r#"
        INSERT INTO imports (
            import_id, user_id, game, playtypes, import_type, user_intent,
            score_ids, created_sessions, time_started, time_finished
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&import.import_id)
    .bind(import.user_id)
    .bind(&import.game)
    .bind(&playtypes)
    .bind(&import.import_type)
    .bind(import.user_intent as i64)
    .bind(&score_ids)
    .bind(&created_sessions)
    .bind(time::to_db(&import.time_started))
    .bind(import.time_finished.as_ref().map(time::to_db))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load an import batch
pub async fn find_import(pool: &SqlitePool, import_id: &str) -> Result<Option<ImportBatch>> {
    let row = sqlx::query("SELECT * FROM imports WHERE import_id = ?")
        .bind(import_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_import).transpose()
}

/// Every import batch embedding `score_id`, in import id order
pub async fn find_imports_for_score(pool: &SqlitePool, score_id: &str) -> Result<Vec<ImportBatch>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM imports
        WHERE EXISTS (SELECT 1 FROM json_each(imports.score_ids) WHERE json_each.value = ?)
        ORDER BY import_id
        "#,
    )
    .bind(score_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_import).collect()
}

/// Raw score id lists of every import embedding `score_id`
pub async fn score_ids_referencing(pool: &SqlitePool, score_id: &str) -> Result<Vec<ImportScoreIds>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT import_id, score_ids FROM imports
        WHERE EXISTS (SELECT 1 FROM json_each(imports.score_ids) WHERE json_each.value = ?)
        ORDER BY import_id
        "#,
    )
    .bind(score_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(import_id, raw)| {
            let score_ids = serde_json::from_str(&raw).map_err(|e| json_err("score_ids", e))?;
            Ok(ImportScoreIds {
                import_id,
                raw,
                score_ids,
            })
        })
        .collect()
}

/// Write a new score id list if the stored list still equals `expected_raw`
///
/// Returns `false` when the list changed since it was read.
pub async fn swap_score_ids(
    pool: &SqlitePool,
    import_id: &str,
    expected_raw: &str,
    score_ids: &[String],
) -> Result<bool> {
    let new_raw = serde_json::to_string(score_ids).map_err(|e| json_err("score_ids", e))?;
    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("swap_import_score_ids", max_wait_ms, || async {
        let result = sqlx::query(
            "UPDATE imports SET score_ids = ? WHERE import_id = ? AND score_ids = ?",
        )
        .bind(&new_raw)
        .bind(import_id)
        .bind(expected_raw)
        .execute(pool)
        .await?;

        Ok::<_, Error>(result.rows_affected() == 1)
    })
    .await
}

/// (import id, position, score id) for every entry that resolves to no score
pub async fn dangling_entries(pool: &SqlitePool) -> Result<Vec<(String, i64, String)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT imports.import_id, CAST(entry.key AS INTEGER), entry.value
        FROM imports, json_each(imports.score_ids) AS entry
        WHERE NOT EXISTS (SELECT 1 FROM scores WHERE scores.score_id = entry.value)
        ORDER BY imports.import_id, entry.key
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
