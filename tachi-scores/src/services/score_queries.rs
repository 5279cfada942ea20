//! Read-side lookups over scores and their referrers
//!
//! None of these take a scope lock. A referrer entry that no longer
//! resolves is stale, not an error.

use sqlx::SqlitePool;

use crate::db::{imports, scores, sessions};
use crate::error::ScoreResult;
use crate::models::{ImportBatch, Score, SessionGrouping};

#[derive(Clone)]
pub struct ScoreQueries {
    db: SqlitePool,
}

impl ScoreQueries {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Look a score up by identity; absence is `Ok(None)`
    pub async fn find_by_identity(&self, score_id: &str) -> ScoreResult<Option<Score>> {
        Ok(scores::find_by_identity(&self.db, score_id).await?)
    }

    /// The session grouping embedding `score_id`, if any
    pub async fn find_session_for_score(&self, score_id: &str) -> ScoreResult<Option<SessionGrouping>> {
        Ok(sessions::find_session_for_score(&self.db, score_id).await?)
    }

    /// Scores a session references, in entry order
    ///
    /// Stale entries are skipped and logged.
    pub async fn find_scores_for_session(&self, session: &SessionGrouping) -> ScoreResult<Vec<Score>> {
        let mut found = Vec::with_capacity(session.score_info.len());
        for score_id in session.score_ids() {
            match scores::find_by_identity(&self.db, score_id).await? {
                Some(score) => found.push(score),
                None => tracing::debug!(
                    session_id = %session.session_id,
                    score_id = %score_id,
                    "Session references a missing score"
                ),
            }
        }
        Ok(found)
    }

    /// Every import batch embedding `score_id`
    pub async fn find_imports_for_score(&self, score_id: &str) -> ScoreResult<Vec<ImportBatch>> {
        Ok(imports::find_imports_for_score(&self.db, score_id).await?)
    }
}
