//! Bounded retry with exponential backoff and jitter.
//!
//! Each attempt receives its 1-based attempt number and returns its own
//! result; nothing is carried between attempts except what the caller
//! chooses to build from the returned [`Attempted`].

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use super::config::RetryPolicy;
use crate::error::RetryError;

/// Successful outcome plus the errors of the attempts that preceded it.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub value: T,
    pub failed: Vec<E>,
}

impl<T, E> Attempted<T, E> {
    pub fn attempts(&self) -> usize {
        self.failed.len() + 1
    }
}

#[derive(Debug, Clone)]
pub struct Tryer {
    label: &'static str,
    policy: RetryPolicy,
}

impl Tryer {
    pub fn new(label: &'static str, policy: RetryPolicy) -> Self {
        Self { label, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn max_attempts(&self) -> usize {
        self.policy.retries + 1
    }

    /// Delay before retry number `retry` (1-based), before jitter.
    pub fn backoff(&self, retry: usize) -> Duration {
        let p = &self.policy;
        let exp = p.exponent.max(1.0).powi(retry.saturating_sub(1) as i32);
        let mut ms = p.base_ms as f64 * exp;
        if p.max_interval_ms > 0 {
            ms = ms.min(p.max_interval_ms as f64);
        }
        Duration::from_millis(ms.round() as u64)
    }

    fn jittered(&self, retry: usize) -> Duration {
        let base = self.backoff(retry);
        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(factor.max(0.0))
    }

    /// Decides whether another attempt is allowed and how long to wait.
    fn next_delay(&self, retry: usize, waited: Duration) -> Option<Duration> {
        if retry > self.policy.retries {
            return None;
        }
        let delay = self.jittered(retry);
        match self.policy.max_wait() {
            Some(cap) if waited + delay > cap => None,
            _ => Some(delay),
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// policy is exhausted. Blocks the calling thread between attempts.
    pub fn run<T, E, F, R>(&self, mut op: F, retryable: R) -> Result<Attempted<T, E>, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(usize) -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let mut failed = Vec::new();
        let mut waited = Duration::ZERO;
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(Attempted { value, failed }),
                Err(e) => {
                    let delay = match self.settle(e, attempt, waited, &retryable, &mut failed) {
                        Ok(delay) => delay,
                        Err(stop) => return Err(stop),
                    };
                    std::thread::sleep(delay);
                    waited += delay;
                    attempt += 1;
                }
            }
        }
    }

    /// Async counterpart of [`Tryer::run`].
    pub async fn run_async<T, E, F, Fut, R>(&self, mut op: F, retryable: R) -> Result<Attempted<T, E>, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let mut failed = Vec::new();
        let mut waited = Duration::ZERO;
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(Attempted { value, failed }),
                Err(e) => {
                    let delay = match self.settle(e, attempt, waited, &retryable, &mut failed) {
                        Ok(delay) => delay,
                        Err(stop) => return Err(stop),
                    };
                    tokio::time::sleep(delay).await;
                    waited += delay;
                    attempt += 1;
                }
            }
        }
    }

    /// Classifies a failed attempt: either the delay before the next one,
    /// or the error that ends the loop.
    fn settle<E, R>(
        &self,
        e: E,
        attempt: usize,
        waited: Duration,
        retryable: &R,
        failed: &mut Vec<E>,
    ) -> Result<Duration, RetryError<E>>
    where
        E: std::error::Error + 'static,
        R: Fn(&E) -> bool,
    {
        if !retryable(&e) {
            warn!(label = self.label, attempt, error = %e, "non-retryable error");
            return Err(RetryError::Fatal {
                last: e,
                earlier: std::mem::take(failed),
            });
        }
        match self.next_delay(attempt, waited) {
            Some(delay) => {
                warn!(
                    label = self.label,
                    attempt,
                    max_attempts = self.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after failure"
                );
                failed.push(e);
                Ok(delay)
            }
            None => {
                error!(label = self.label, attempts = attempt, error = %e, "all retry attempts exhausted");
                Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                    earlier: std::mem::take(failed),
                })
            }
        }
    }
}
