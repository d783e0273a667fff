//! Bounded retry with a fixed delay between attempts.
//!
//! Every network-facing operation in the ingestion path (backend reads and
//! writes, whole update cycles) goes through [`retry`]. The wait between
//! attempts races against a [`CancellationToken`], so shutdown never has to sit
//! out a full retry delay.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Fixed pause between two attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total number of attempts this policy allows.
    pub const fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

/// Outcome of an operation that did not succeed within its retry budget.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; `source` is the error from the last one.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: E,
    },
    /// The cancellation token fired while waiting for the next attempt.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// Number of attempts made before giving up, if the budget was exhausted.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Exhausted { attempts, .. } => Some(*attempts),
            RetryError::Cancelled { .. } => None,
        }
    }

    /// The last underlying failure, if any attempt ran to completion.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Runs `op` until it succeeds or the policy's attempts are used up.
///
/// The token is only checked during the delay between attempts; an attempt
/// already in flight always runs to completion.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                return Err(RetryError::Exhausted {
                    operation,
                    attempts,
                    source: e,
                });
            }
            Err(e) => {
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(operation, attempt, "Retry wait cancelled");
                return Err(RetryError::Cancelled { operation });
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }
        attempt += 1;
    }
}
