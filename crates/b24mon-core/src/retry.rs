//! Bounded retry with exponential backoff and jitter.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::sleep;

use crate::{errors::Error, Result};

/// Fraction of the computed delay added as random jitter (0..=10%).
const JITTER_RATIO: f64 = 0.1;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let d = self.base_delay_for(attempt);
        let jitter = rand::rng().random_range(0.0..=JITTER_RATIO);
        (d + d.mul_f64(jitter)).min(self.max_delay.max(d))
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. A `retry_after` hint on a
    /// transient error replaces the computed backoff; a hint longer than
    /// `max_delay` ends the loop with that error.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Retried<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => {
                    return Retried {
                        result: Ok(v),
                        attempts: attempt,
                    }
                }
                Err(e) if e.is_retryable() && attempt < max => {
                    let wait = match &e {
                        Error::Transient {
                            retry_after: Some(d),
                            ..
                        } => {
                            if *d > self.max_delay {
                                tracing::warn!(
                                    attempt,
                                    retry_after_secs = d.as_secs(),
                                    max_delay_secs = self.max_delay.as_secs(),
                                    "retry hint exceeds backoff cap, giving up"
                                );
                                return Retried {
                                    result: Err(e),
                                    attempts: attempt,
                                };
                            }
                            *d
                        }
                        _ => self.delay_for(attempt),
                    };
                    tracing::warn!(attempt, max, wait_ms = wait.as_millis() as u64, error = %e, "retrying after transient failure");
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Retried {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
