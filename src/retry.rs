// src/retry.rs
// Generic bounded-backoff retry, shared by the fetcher and the dispatcher

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy decoupled from what is being retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Exponential delay for a given attempt (1-based), capped at
    /// `max_delay`, with up to 20% random jitter added.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0..=capped / 5 + 1);
        Duration::from_millis(capped + jitter)
    }
}

/// Run `operation` until it succeeds, the error stops being retryable, or
/// the attempt budget is spent. The final error is returned to the caller;
/// nothing is raised past it.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    op_name: &str,
    is_retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "🔁 {} attempt {}/{} failed ({}), retrying in {:?}",
                    op_name, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("🔁 {} giving up after attempt {}: {}", op_name, attempt, e);
                return Err(e);
            }
        }
    }
}
