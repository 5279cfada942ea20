//! Import batch documents
//!
//! An import batch records which scores one import produced, in order.
//! Identities are foreign references; duplicates are permitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub import_id: String,
    pub user_id: i64,
    pub game: String,
    pub playtypes: Vec<String>,
    pub import_type: String,
    pub user_intent: bool,
    /// Ordered score identities produced by this import
    pub score_ids: Vec<String>,
    pub created_sessions: Vec<String>,
    pub time_started: DateTime<Utc>,
    pub time_finished: Option<DateTime<Utc>>,
}

/// Replace every occurrence of `old` with `new`, keeping positions
///
/// Returns the number of entries rewritten.
pub fn replace_score_ids(score_ids: &mut [String], old: &str, new: &str) -> usize {
    let mut replaced = 0;
    for id in score_ids.iter_mut().filter(|id| id.as_str() == old) {
        *id = new.to_string();
        replaced += 1;
    }
    replaced
}
