//! Session grouping document store

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tachi_common::db::max_lock_wait_ms;
use tachi_common::{time, Error, Result};

use crate::models::{SessionGrouping, SessionScoreInfo};
use crate::utils::retry_on_lock;

/// Raw `score_info` of one session, as stored
///
/// `raw` is the compare-and-swap token for the write-back.
#[derive(Debug, Clone)]
pub struct SessionScoreEntries {
    pub session_id: String,
    pub raw: String,
    pub entries: Vec<SessionScoreInfo>,
}

fn json_err(e: serde_json::Error) -> Error {
    Error::Internal(format!("Failed to (de)serialize score_info: {}", e))
}

fn row_to_session(row: &SqliteRow) -> Result<SessionGrouping> {
    let score_info: String = row.get("score_info");
    let time_started: String = row.get("time_started");
    let time_ended: String = row.get("time_ended");
    let time_inserted: String = row.get("time_inserted");

    Ok(SessionGrouping {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        game: row.get("game"),
        playtype: row.get("playtype"),
        name: row.get("name"),
        description: row.get("description"),
        highlight: row.get::<i64, _>("highlight") != 0,
        import_type: row.get("import_type"),
        score_info: serde_json::from_str(&score_info).map_err(json_err)?,
        time_started: time::from_db(&time_started)?,
        time_ended: time::from_db(&time_ended)?,
        time_inserted: time::from_db(&time_inserted)?,
        views: row.get("views"),
    })
}

/// Insert a session grouping
pub async fn insert_session(pool: &SqlitePool, session: &SessionGrouping) -> Result<()> {
    let score_info = serde_json::to_string(&session.score_info).map_err(json_err)?;

    sqlx::query(
        r#"
        INSERT INTO sessions (
            session_id, user_id, game, playtype, name, description, highlight,
            import_type, score_info, time_started, time_ended, time_inserted, views
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.session_id)
    .bind(session.user_id)
    .bind(&session.game)
    .bind(&session.playtype)
    .bind(&session.name)
    .bind(&session.description)
    .bind(session.highlight as i64)
    .bind(&session.import_type)
    .bind(&score_info)
    .bind(time::to_db(&session.time_started))
    .bind(time::to_db(&session.time_ended))
    .bind(time::to_db(&session.time_inserted))
    .bind(session.views)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a session grouping
pub async fn find_session(pool: &SqlitePool, session_id: &str) -> Result<Option<SessionGrouping>> {
    let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
        .bind(session_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_session).transpose()
}

/// The session a score belongs to, if there is one
///
/// A score is part of at most one session; if several claim it the earliest
/// started one wins.
pub async fn find_session_for_score(
    pool: &SqlitePool,
    score_id: &str,
) -> Result<Option<SessionGrouping>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM sessions
        WHERE EXISTS (
            SELECT 1 FROM json_each(sessions.score_info)
            WHERE json_extract(json_each.value, '$.scoreID') = ?
        )
        ORDER BY time_started, session_id
        LIMIT 1
        "#,
    )
    .bind(score_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_session).transpose()
}

/// Raw score_info of every session embedding `score_id`
pub async fn entries_referencing(
    pool: &SqlitePool,
    score_id: &str,
) -> Result<Vec<SessionScoreEntries>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT session_id, score_info FROM sessions
        WHERE EXISTS (
            SELECT 1 FROM json_each(sessions.score_info)
            WHERE json_extract(json_each.value, '$.scoreID') = ?
        )
        ORDER BY session_id
        "#,
    )
    .bind(score_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(session_id, raw)| {
            let entries = serde_json::from_str(&raw).map_err(json_err)?;
            Ok(SessionScoreEntries {
                session_id,
                raw,
                entries,
            })
        })
        .collect()
}

/// Write new score_info if the stored value still equals `expected_raw`
///
/// Returns `false` when the entries changed since they were read.
pub async fn swap_score_info(
    pool: &SqlitePool,
    session_id: &str,
    expected_raw: &str,
    entries: &[SessionScoreInfo],
) -> Result<bool> {
    let new_raw = serde_json::to_string(entries).map_err(json_err)?;
    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("swap_session_score_info", max_wait_ms, || async {
        let result = sqlx::query(
            "UPDATE sessions SET score_info = ? WHERE session_id = ? AND score_info = ?",
        )
        .bind(&new_raw)
        .bind(session_id)
        .bind(expected_raw)
        .execute(pool)
        .await?;

        Ok::<_, Error>(result.rows_affected() == 1)
    })
    .await
}

/// (session id, position, score id) for every entry that resolves to no score
pub async fn dangling_entries(pool: &SqlitePool) -> Result<Vec<(String, i64, String)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT sessions.session_id, CAST(entry.key AS INTEGER),
               json_extract(entry.value, '$.scoreID')
        FROM sessions, json_each(sessions.score_info) AS entry
        WHERE NOT EXISTS (
            SELECT 1 FROM scores
            WHERE scores.score_id = json_extract(entry.value, '$.scoreID')
        )
        ORDER BY sessions.session_id, entry.key
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
