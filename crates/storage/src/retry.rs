//! Bounded retry with exponential backoff for transient store failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::StorageError;

/// Retry policy for transient store failures.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Multiplier applied to the backoff after each failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetrySettings {
    /// Policy that never retries. Useful in tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Run an operation with bounded retry on transient failures.
///
/// Only errors classified transient by [`StorageError::is_transient`] are
/// retried; everything else propagates on the first occurrence. Backoff
/// sleeps race the cancellation token, so a cancelled caller never waits
/// out a backoff.
///
/// # Arguments
/// * `settings` - Retry policy
/// * `cancel` - Cancellation token checked before each attempt and during backoff
/// * `what` - Key or description for log lines
/// * `op` - The operation; invoked once per attempt
pub async fn with_retry<T, F, Fut>(
    settings: &RetrySettings,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut backoff: Duration = settings.initial_backoff;
    let attempts: u32 = settings.max_attempts.max(1);

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    key = what,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "transient store failure, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                }
                let next: Duration = backoff.mul_f64(settings.backoff_multiplier);
                backoff = next.min(settings.max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns from its final attempt")
}
