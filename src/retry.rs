//! Fixed-interval polling
//!
//! Every wait in the bootstrap (member readiness, init confirmation, cluster
//! health) goes through [`poll_until`]. Attempts are spaced by a constant
//! interval with no backoff growth.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// How often and how long to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between two attempts
    pub interval: Duration,
    /// Attempt budget, `None` polls until the predicate holds
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    pub fn forever(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max)
    }
}

/// Poll `check` until it yields a value.
///
/// `Ok(Some(v))` ends the wait, `Ok(None)` means "not yet" and an `Err` is
/// logged and treated as "not yet" as well. When the budget runs out the last
/// outcome is reported as [`Error::RetriesExhausted`].
pub async fn poll_until<T, F, Fut>(policy: RetryPolicy, what: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => tracing::debug!("{}: not yet (attempt {})", what, attempt),
            Err(e) if e.is_retryable() => tracing::debug!("{}: attempt {} failed: {}", what, attempt, e),
            Err(e) => tracing::warn!("{}: attempt {} failed: {}", what, attempt, e),
        }

        if policy.exhausted(attempt) {
            return Err(Error::RetriesExhausted {
                what: what.to_string(),
                attempts: attempt,
            });
        }
        tokio::time::sleep(policy.interval).await;
    }
}
