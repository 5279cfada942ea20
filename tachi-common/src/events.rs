//! Event types for the Tachi event system
//!
//! Provides shared event definitions and the EventBus used to tell
//! collaborators (personal-best recalculation, session summaries, audit logs)
//! that score documents changed underneath them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Score lifecycle events
///
/// Events are broadcast via EventBus and serialize with a `type` tag so they
/// can be forwarded to other processes unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScoreEvent {
    /// A score was re-keyed under a new identity and its referrers patched
    ///
    /// Triggers:
    /// - Caches keyed by score identity: drop `old_score_id`
    ScoreIdentityMigrated {
        migration_id: Uuid,
        old_score_id: String,
        new_score_id: String,
        user_id: i64,
        chart_id: String,
        /// Import batch entries rewritten
        import_entries_patched: usize,
        /// Session entries rewritten
        session_entries_patched: usize,
        timestamp: DateTime<Utc>,
    },

    /// A correction kept the same identity; only non-identity fields changed
    ScoreUpdatedInPlace {
        score_id: String,
        user_id: i64,
        chart_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The best-score aggregate for (user, chart) is out of date
    ///
    /// Triggers:
    /// - Personal-best recalculation for this user on this chart
    PersonalBestInvalidated {
        user_id: i64,
        game: String,
        playtype: String,
        chart_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Referrer patching failed part-way; a reconciliation sweep will finish it
    ReferenceMigrationIncomplete {
        migration_id: Uuid,
        old_score_id: String,
        new_score_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A reconciliation sweep finished
    ReconciliationCompleted {
        migrations_resumed: usize,
        import_entries_patched: usize,
        session_entries_patched: usize,
        timestamp: DateTime<Utc>,
    },
}

impl ScoreEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ScoreEvent::ScoreIdentityMigrated { .. } => "ScoreIdentityMigrated",
            ScoreEvent::ScoreUpdatedInPlace { .. } => "ScoreUpdatedInPlace",
            ScoreEvent::PersonalBestInvalidated { .. } => "PersonalBestInvalidated",
            ScoreEvent::ReferenceMigrationIncomplete { .. } => "ReferenceMigrationIncomplete",
            ScoreEvent::ReconciliationCompleted { .. } => "ReconciliationCompleted",
        }
    }
}

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
///
/// One bus is created at process startup and handed to the services that
/// emit; it is dropped with them at shutdown. There is no global registry.
///
/// # Examples
///
/// ```
/// use tachi_common::events::{EventBus, ScoreEvent};
///
/// let event_bus = EventBus::new(16);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ScoreEvent::ScoreUpdatedInPlace {
///     score_id: "T00".to_string(),
///     user_id: 1,
///     chart_id: "chart".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScoreEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ScoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScoreEvent,
    ) -> Result<usize, broadcast::error::SendError<ScoreEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ScoreEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
