//! Session groupings
//!
//! A session groups the scores a user set in one sitting. Entries are only
//! ever patched in place when an embedded identity changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a session's ordered score list
///
/// Serialized with the document-store field names (`scoreID`, `isNewScore`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionScoreInfo {
    #[serde(rename = "scoreID")]
    pub score_id: String,
    #[serde(rename = "isNewScore")]
    pub is_new_score: bool,
}

impl SessionScoreInfo {
    pub fn new(score_id: impl Into<String>, is_new_score: bool) -> Self {
        Self {
            score_id: score_id.into(),
            is_new_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionGrouping {
    pub session_id: String,
    pub user_id: i64,
    pub game: String,
    pub playtype: String,
    pub name: String,
    pub description: String,
    pub highlight: bool,
    pub import_type: Option<String>,
    pub score_info: Vec<SessionScoreInfo>,
    pub time_started: DateTime<Utc>,
    pub time_ended: DateTime<Utc>,
    pub time_inserted: DateTime<Utc>,
    pub views: i64,
}

impl SessionGrouping {
    pub fn score_ids(&self) -> impl Iterator<Item = &str> {
        self.score_info.iter().map(|e| e.score_id.as_str())
    }
}

/// Rewrite `score_id` of every entry matching `old`
///
/// `is_new_score` and entry positions are untouched. Returns the number of
/// entries rewritten.
pub fn replace_score_info(entries: &mut [SessionScoreInfo], old: &str, new: &str) -> usize {
    let mut replaced = 0;
    for entry in entries.iter_mut().filter(|e| e.score_id == old) {
        entry.score_id = new.to_string();
        replaced += 1;
    }
    replaced
}
