//! Per-(user, chart) mutation locks
//!
//! Two corrections of scores in the same scope must not interleave their
//! recompute/write/delete steps. Scopes are independent of each other.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type ScopeKey = (i64, String);

/// Held for the duration of one scope mutation; released on drop
pub struct ScopeGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Table of scope locks
///
/// Entries are created on demand and pruned once nobody holds or waits on
/// them, so the table stays proportional to in-flight mutations.
#[derive(Clone, Default)]
pub struct ScopeLocks {
    locks: Arc<Mutex<HashMap<ScopeKey, Arc<Mutex<()>>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to (user_id, chart_id)
    pub async fn acquire(&self, user_id: i64, chart_id: &str) -> ScopeGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry((user_id, chart_id.to_string()))
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        ScopeGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of scopes currently tracked
    pub async fn tracked_scopes(&self) -> usize {
        self.locks.lock().await.len()
    }
}
