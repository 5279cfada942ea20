//! Database Retry Logic
//!
//! Exponential backoff for transient SQLite lock errors. The total retry
//! budget comes from the `score_db_max_lock_wait_ms` setting.

use std::time::{Duration, Instant};
use tachi_common::{Error, Result};

/// Retry a database operation with exponential backoff until `max_wait_ms` elapses.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If lock contention:
///    a. If time elapsed < max_wait_ms: log WARN, backoff, retry
///    b. If time elapsed >= max_wait_ms: log ERROR, return error
/// 4. If other error: return error immediately (no retry)
///
/// **Backoff Strategy:**
/// - Initial delay: 10ms
/// - Max delay: 1000ms
/// - Multiplier: 2.0 (exponential)
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt: u32 = 0;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    log_slow_success(operation_name, attempt, start_time.elapsed());
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_lock_contention() {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();

                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

/// Severity of a success that needed retries grows with the time it waited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryAlert {
    Routine,
    Significant,
    Severe,
}

const SIGNIFICANT_WAIT: Duration = Duration::from_secs(2);
const SEVERE_WAIT: Duration = Duration::from_secs(5);

fn retry_alert(elapsed: Duration) -> RetryAlert {
    if elapsed > SEVERE_WAIT {
        RetryAlert::Severe
    } else if elapsed > SIGNIFICANT_WAIT {
        RetryAlert::Significant
    } else {
        RetryAlert::Routine
    }
}

fn log_slow_success(operation_name: &str, attempt: u32, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match retry_alert(elapsed) {
        RetryAlert::Severe => tracing::error!(
            operation = operation_name,
            attempt,
            elapsed_ms,
            "Database operation succeeded after extended retry period (>5s); store is badly contended"
        ),
        RetryAlert::Significant => tracing::warn!(
            operation = operation_name,
            attempt,
            elapsed_ms,
            "Database operation succeeded after significant retry period (>2s)"
        ),
        RetryAlert::Routine => tracing::debug!(
            operation = operation_name,
            attempt,
            elapsed_ms,
            "Database operation succeeded after retry"
        ),
    }
}
