//! Bounded retry loop for flaky remote reads.
//!
//! The policy is decoupled from the call site: callers hand over a closure
//! that produces one attempt, the policy decides whether to try again.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    /// One initial attempt plus three retries, one second apart.
    fn default() -> Self {
        Self::new(4, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Total attempts, never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `attempt` until it succeeds or the attempt budget is spent.
    ///
    /// The closure receives the 1-based attempt number. The last error is
    /// returned unchanged when every attempt fails.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut current = 1;

        loop {
            match attempt(current).await {
                Ok(value) => {
                    if current > 1 {
                        debug!("{} succeeded on attempt {}", operation, current);
                    }
                    return Ok(value);
                }
                Err(e) if current < max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, current, max_attempts, self.delay, e
                    );
                    sleep(self.delay).await;
                    current += 1;
                }
                Err(e) => {
                    warn!(
                        "{} failed after {} attempt(s): {}",
                        operation, max_attempts, e
                    );
                    return Err(e);
                }
            }
        }
    }
}
