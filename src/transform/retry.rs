// src/transform/retry.rs
//! Single retry policy shared by every call to the text-generation service:
//! capped exponential backoff, additive jitter, a larger floor for rate limits,
//! and an error classifier deciding what is worth retrying at all.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::RetrySettings;

/// How a failure should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection drops, timeouts, blank completions.
    Transient,
    /// Provider asked us to slow down; back off at least `rate_limit_floor`.
    RateLimited,
    /// Malformed request, auth failure... retrying cannot help.
    Fatal,
}

pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Error returned once the policy gives up.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.last)
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_floor: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            rate_limit_floor: Duration::from_millis(s.rate_limit_floor_ms),
            jitter: Duration::from_millis(s.jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (1-based), without jitter:
    /// `min(base * 2^(attempt-1), max_delay)`, raised to the rate-limit floor when asked.
    pub fn delay_for(&self, attempt: u32, class: ErrorClass) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let exp = self.base_delay.saturating_mul(factor);
        let capped = exp.min(self.max_delay);
        match class {
            ErrorClass::RateLimited => capped.max(self.rate_limit_floor),
            _ => capped,
        }
    }

    fn jitter_sample(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    /// Upper bound on the total time spent sleeping across a full run of failures.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts)
            .map(|a| self.delay_for(a, ErrorClass::RateLimited) + self.jitter)
            .sum()
    }

    /// Run `op` until it succeeds, fails fatally, or attempts are exhausted.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Classify + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1u32;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let class = e.class();
                    if class == ErrorClass::Fatal {
                        error!(label, attempt, error = %e, "non-retryable failure");
                        return Err(RetryError { attempts: attempt, last: e });
                    }
                    if attempt >= self.max_attempts {
                        error!(label, attempt, error = %e, "retries exhausted");
                        return Err(RetryError { attempts: attempt, last: e });
                    }
                    let delay = self.delay_for(attempt, class) + self.jitter_sample();
                    metrics::counter!("ai_retries_total").increment(1);
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        ?class,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
