//! Score identity migration state machine
//!
//! A migration progresses through:
//! IDLE → IDENTITY_RECOMPUTED → NEW_WRITTEN → OLD_RETIRED → REFERENCES_PATCHED → DONE
//!
//! ABORTED is reachable from any non-terminal state. The journal row is
//! written on entering IDENTITY_RECOMPUTED, so every later state is durable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Score;

/// Migration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    /// Nothing computed yet
    Idle,
    /// New identity known, nothing written
    IdentityRecomputed,
    /// New score persisted; old score still present
    NewWritten,
    /// Old score deleted; referrers may still hold the old identity
    OldRetired,
    /// Every referrer rewritten
    ReferencesPatched,
    /// Migration finished
    Done,
    /// Migration gave up before writing anything irreversible
    Aborted,
}

impl MigrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Done | MigrationState::Aborted)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: MigrationState) -> bool {
        use MigrationState::*;

        match (self, next) {
            (s, Aborted) => !s.is_terminal(),
            (Idle, IdentityRecomputed)
            | (IdentityRecomputed, NewWritten)
            | (IdentityRecomputed, Done)
            | (NewWritten, OldRetired)
            | (OldRetired, ReferencesPatched)
            | (ReferencesPatched, Done) => true,
            _ => false,
        }
    }
}

/// State transition record (for logging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub migration_id: Uuid,
    pub old_state: MigrationState,
    pub new_state: MigrationState,
    pub transitioned_at: DateTime<Utc>,
}

/// Journal entry for one identity migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub migration_id: Uuid,
    pub old_score_id: String,
    pub new_score_id: String,
    pub user_id: i64,
    pub chart_id: String,
    /// Document written under `new_score_id`
    pub new_score: Score,
    pub state: MigrationState,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationRecord {
    /// Create a journal entry for a recomputed identity
    pub fn new(old_score_id: impl Into<String>, new_score: Score) -> Self {
        let now = Utc::now();
        Self {
            migration_id: Uuid::new_v4(),
            old_score_id: old_score_id.into(),
            new_score_id: new_score.score_id.clone(),
            user_id: new_score.user_id,
            chart_id: new_score.chart_id.clone(),
            new_score,
            state: MigrationState::IdentityRecomputed,
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: MigrationState) -> StateTransition {
        let transition = StateTransition {
            migration_id: self.migration_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        self.updated_at = transition.transitioned_at;
        transition
    }
}

/// Result of a successful `update_score`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    /// Journal id; `None` when the identity did not change
    pub migration_id: Option<Uuid>,
    pub old_score_id: String,
    pub new_score_id: String,
    pub final_state: MigrationState,
    pub import_entries_patched: usize,
    pub session_entries_patched: usize,
}

impl MigrationOutcome {
    /// True when the score moved to a new identity
    pub fn identity_changed(&self) -> bool {
        self.old_score_id != self.new_score_id
    }
}

/// Counts from one pass of reference patching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePatchReport {
    pub import_documents_patched: usize,
    pub import_entries_patched: usize,
    pub session_documents_patched: usize,
    pub session_entries_patched: usize,
}

impl ReferencePatchReport {
    pub fn is_empty(&self) -> bool {
        self.import_entries_patched == 0 && self.session_entries_patched == 0
    }

    pub fn merge(&mut self, other: ReferencePatchReport) {
        self.import_documents_patched += other.import_documents_patched;
        self.import_entries_patched += other.import_entries_patched;
        self.session_documents_patched += other.session_documents_patched;
        self.session_entries_patched += other.session_entries_patched;
    }
}

/// Summary of a reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Journal entries rolled forward to DONE
    pub migrations_resumed: usize,
    /// Journal entries that still failed (left pending)
    pub migrations_failed: usize,
    pub references: ReferencePatchReport,
}

impl SweepReport {
    /// True when the sweep changed nothing
    pub fn is_noop(&self) -> bool {
        self.migrations_resumed == 0 && self.migrations_failed == 0 && self.references.is_empty()
    }
}

/// Kind of document embedding score identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferrerKind {
    ImportBatch,
    SessionGrouping,
}

/// A referrer entry whose identity resolves to no score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleReference {
    pub referrer: ReferrerKind,
    pub document_id: String,
    /// Zero-based position of the entry in the referrer's sequence
    pub position: usize,
    pub score_id: String,
}
