//! Bounded retry with exponential backoff for upstream calls.
//!
//! Every attempt runs under the per-call timeout. Only errors that report
//! themselves retryable are retried; credential and input failures surface on
//! the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{DiagramError, ProviderError};

/// An upstream error that knows whether a retry may help.
pub trait Retryable: Sized {
    /// Whether the same call may succeed if repeated.
    fn is_retryable(&self) -> bool;

    /// The error to report when an attempt exceeds the timeout.
    fn timed_out(operation: &str, secs: u64) -> Self;
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }

    fn timed_out(operation: &str, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.to_owned(),
            secs,
        }
    }
}

impl Retryable for DiagramError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            Self::Unreadable { .. } | Self::Malformed { .. } => false,
        }
    }

    fn timed_out(_operation: &str, secs: u64) -> Self {
        Self::Timeout { secs }
    }
}

/// Retry parameters shared by the diagram reader and cloud providers.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
    /// Timeout applied to every attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// retries are exhausted.
    ///
    /// # Errors
    ///
    /// Returns the last error seen, or `E::timed_out` if the final attempt
    /// exceeded [`call_timeout`](Self::call_timeout).
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(inner) => inner,
                Err(_) => Err(E::timed_out(operation, self.call_timeout.as_secs())),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
