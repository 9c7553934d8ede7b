//! Retry with exponential backoff
//!
//! A [`RetryPolicy`] bundles a trigger predicate, a [`Backoff`] shape with a
//! wall-clock ceiling, and an on-retry callback. It is applied around a
//! single async operation; policies compose by nesting one `run` inside the
//! operation of another.
//!
//! Elapsed time is measured with `tokio::time`, so tests can drive the
//! ceiling with a paused clock.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Exponential backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry
    pub initial: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Cap on any single delay
    pub max_interval: Duration,
    /// Total time the policy may spend before giving up
    pub max_elapsed: Duration,
    /// Scale each delay by a uniform random factor in `[0, 1)`
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(300),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        // NaN and infinity both collapse to the cap
        let capped = secs.min(self.max_interval.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_interval
        }
    }

    /// Wait before the next attempt, or `None` once the ceiling is reached
    ///
    /// The final wait is truncated so it never runs past the ceiling.
    pub fn next_wait(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.max_elapsed {
            return None;
        }

        let mut wait = self.delay(attempt);
        if self.jitter {
            wait = wait.mul_f64(rand::rng().random::<f64>());
        }

        Some(wait.min(self.max_elapsed - elapsed))
    }
}

/// Details passed to the on-retry callback
#[derive(Debug, Clone, Copy)]
pub struct RetryNotice<'a> {
    /// Name of the operation being retried
    pub target: &'a str,
    /// Attempts made so far
    pub attempt: u32,
    pub wait: Duration,
    pub elapsed: Duration,
}

/// Result of running an operation under a policy
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Result of the last attempt
    pub result: Result<T, E>,
    pub attempts: u32,
    pub elapsed: Duration,
    /// True when the trigger still fired but the ceiling stopped retries
    pub exhausted: bool,
}

type Trigger<T, E> = Box<dyn Fn(&Result<T, E>) -> bool + Send + Sync>;
type OnRetry = Box<dyn Fn(&RetryNotice<'_>) + Send + Sync>;

/// Retry strategy: trigger predicate, backoff shape and ceiling, callback
pub struct RetryPolicy<T, E> {
    target: String,
    backoff: Backoff,
    trigger: Trigger<T, E>,
    on_retry: OnRetry,
}

impl<T, E> RetryPolicy<T, E> {
    /// Create a policy that retries while `trigger` returns true
    ///
    /// Retries are logged with [`log_backoff`] unless replaced with
    /// [`RetryPolicy::on_retry`].
    pub fn new<F>(target: impl Into<String>, backoff: Backoff, trigger: F) -> Self
    where
        F: Fn(&Result<T, E>) -> bool + Send + Sync + 'static,
    {
        Self {
            target: target.into(),
            backoff,
            trigger: Box::new(trigger),
            on_retry: Box::new(log_backoff),
        }
    }

    /// Replace the on-retry callback
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RetryNotice<'_>) + Send + Sync + 'static,
    {
        self.on_retry = Box::new(callback);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run `op` until the trigger stops firing or the ceiling is reached
    pub async fn run<F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = op().await;
            let elapsed = started.elapsed();

            if !(self.trigger)(&result) {
                return RetryOutcome {
                    result,
                    attempts,
                    elapsed,
                    exhausted: false,
                };
            }

            let Some(wait) = self.backoff.next_wait(attempts, elapsed) else {
                return RetryOutcome {
                    result,
                    attempts,
                    elapsed,
                    exhausted: true,
                };
            };

            (self.on_retry)(&RetryNotice {
                target: &self.target,
                attempt: attempts,
                wait,
                elapsed,
            });

            tokio::time::sleep(wait).await;
        }
    }
}

impl<T, E> std::fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("target", &self.target)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Default on-retry callback
pub fn log_backoff(notice: &RetryNotice<'_>) {
    info!(
        operation = notice.target,
        tries = notice.attempt,
        wait_secs = notice.wait.as_secs_f64(),
        elapsed_secs = notice.elapsed.as_secs_f64(),
        "Backing off {:.1} seconds after {} tries calling {}",
        notice.wait.as_secs_f64(),
        notice.attempt,
        notice.target
    );
}
