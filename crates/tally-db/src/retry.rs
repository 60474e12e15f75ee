//! # Retry Wrapper
//!
//! Re-runs a whole unit of work when it fails with a transient storage error.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt 1 ──► Conflict (version moved) ──► wait ~initial               │
//! │  attempt 2 ──► Busy (database is locked) ──► wait ~initial × multiplier │
//! │  attempt 3 ──► Ok ─────────────────────────► return                     │
//! │                                                                         │
//! │  InsufficientStock, AlreadyPosted, NotFound, ... ──► return at once     │
//! │  attempt == max_attempts ──────────────────────────► return last error  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each attempt must open its own unit of work, so a retried posting
//! re-reads stock and versions from scratch.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::error::DbResult;

/// Bounded exponential backoff settings.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            max_elapsed_time: None, // Bounded by attempt count instead
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the attempt
/// budget is spent.
///
/// ## Example
/// ```rust,ignore
/// let invoice = with_retry(&policy, "post_invoice", || self.post_once(id)).await?;
/// ```
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let attempts = AtomicU32::new(0);
    let max_attempts = policy.max_attempts.max(1);

    backoff::future::retry(policy.create_backoff(), || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    Ok(value)
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(operation, attempt, max_attempts, error = %err, "Transient failure, retrying");
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        }
    })
    .await
}
