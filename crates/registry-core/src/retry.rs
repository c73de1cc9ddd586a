//! Bounded retry with exponential backoff.
//!
//! Used for store transactions that hit contention and for reads made on
//! behalf of external collaborators (reporting). Business logic never sees
//! the retries: the operation is re-run from scratch on each attempt.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 20,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay after a given failed attempt (0-indexed).
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay_ms as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether another attempt should be made after `attempt` failures.
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `is_transient` decides which errors are worth another attempt. The last
    /// error is returned unchanged once attempts run out.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if !is_transient(&e) || !self.should_retry(attempt) {
                        return Err(e);
                    }
                    let delay = self.delay_for_attempt(attempt - 1);
                    warn!(
                        operation,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
