//! Bounded retries for operations against an eventually-consistent API.
//!
//! A [`Retrier`] keeps calling an async operation until it succeeds, its
//! [`RetryPolicy`] vetoes another attempt, or its wall-clock budget runs out.
//! The budget is never overshot on purpose: when the wait proposed by the
//! policy would end past the deadline, the last error is returned right away
//! instead of sleeping into a failure.
//!
//! # Example
//!
//! ```ignore
//! use keel_common::retry::{RetryPolicy, Retrier};
//!
//! let retrier = Retrier::new(Duration::from_secs(120))
//!     .with_policy(RetryPolicy::BackOff(Duration::from_secs(1)));
//! let cluster = retrier.retry(|| client.get(&id)).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of consulting a [`RetryPolicy`] after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made
    pub retry: bool,
    /// How long to wait before that attempt
    pub wait: Duration,
}

impl RetryDecision {
    /// Retry after the given pause
    pub fn retry_after(wait: Duration) -> Self {
        Self { retry: true, wait }
    }

    /// Give up and surface the last error
    pub fn stop() -> Self {
        Self {
            retry: false,
            wait: Duration::ZERO,
        }
    }
}

type PolicyFn = dyn Fn(u32, &dyn fmt::Display) -> RetryDecision + Send + Sync;

/// Decides whether and when to retry, given the number of failed attempts so
/// far (starting at 1) and the last error.
#[derive(Clone, Default)]
pub enum RetryPolicy {
    /// Always retry, without pausing. For cheap idempotent reads.
    #[default]
    ZeroWait,
    /// Always retry after a constant pause
    BackOff(Duration),
    /// Retry after a constant pause until `max_retries` attempts have failed
    MaxRetries {
        /// Total number of attempts allowed
        max_retries: u32,
        /// Pause between attempts
        backoff: Duration,
    },
    /// Caller supplied decision function
    Custom(Arc<PolicyFn>),
}

impl RetryPolicy {
    /// Build a policy from a closure
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32, &dyn fmt::Display) -> RetryDecision + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Consult the policy after `attempt` failed attempts
    pub fn decide(&self, attempt: u32, error: &dyn fmt::Display) -> RetryDecision {
        match self {
            RetryPolicy::ZeroWait => RetryDecision::retry_after(Duration::ZERO),
            RetryPolicy::BackOff(wait) => RetryDecision::retry_after(*wait),
            RetryPolicy::MaxRetries {
                max_retries,
                backoff,
            } => {
                if attempt < *max_retries {
                    RetryDecision::retry_after(*backoff)
                } else {
                    RetryDecision::stop()
                }
            }
            RetryPolicy::Custom(f) => f(attempt, error),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryPolicy::ZeroWait => f.write_str("ZeroWait"),
            RetryPolicy::BackOff(wait) => f.debug_tuple("BackOff").field(wait).finish(),
            RetryPolicy::MaxRetries {
                max_retries,
                backoff,
            } => f
                .debug_struct("MaxRetries")
                .field("max_retries", max_retries)
                .field("backoff", backoff)
                .finish(),
            RetryPolicy::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Retries a fallible async operation within a wall-clock budget.
///
/// All configuration is fixed at construction, so a single value can be
/// shared by sequential or concurrent callers.
#[derive(Clone, Debug)]
pub struct Retrier {
    timeout: Duration,
    policy: RetryPolicy,
    backoff_factor: Option<f64>,
    cancel: Option<CancellationToken>,
}

impl Retrier {
    /// Create a retrier with the given budget and the zero-wait policy
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            policy: RetryPolicy::default(),
            backoff_factor: None,
            cancel: None,
        }
    }

    /// Create a retrier bounded only by attempts: `max_retries` attempts with
    /// `backoff` between them, no wall-clock limit.
    pub fn with_max_retries(max_retries: u32, backoff: Duration) -> Self {
        Self::new(Duration::MAX).with_policy(RetryPolicy::MaxRetries {
            max_retries,
            backoff,
        })
    }

    /// Use the given retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Scale each proposed wait by `factor × attempt`
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }

    /// Stop between attempts once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The wall-clock budget of a single [`Retrier::retry`] call
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The configured retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds or the retrier gives up.
    ///
    /// Returns the last error when the policy vetoes another attempt, when
    /// the budget is exhausted, or when the cancellation token fires. The
    /// operation is always invoked at least once and is never interrupted
    /// while running.
    pub async fn retry<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.retry_if(operation, |_| true).await
    }

    /// Like [`Retrier::retry`], but errors for which `retryable` returns
    /// false are returned right away without consulting the policy.
    pub async fn retry_if<F, Fut, T, E, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt = attempt.saturating_add(1);

            if !retryable(&err) {
                debug!(attempt = attempt, error = %err, "Error is not retryable");
                return Err(err);
            }

            let decision = self.policy.decide(attempt, &err);
            if !decision.retry {
                debug!(attempt = attempt, error = %err, "Retry policy gave up");
                return Err(err);
            }

            let wait = self.scale_wait(decision.wait, attempt);
            let elapsed = start.elapsed();
            if elapsed >= self.timeout || wait >= self.timeout - elapsed {
                debug!(
                    attempt = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(err);
            }

            warn!(
                attempt = attempt,
                error = %err,
                wait_ms = wait.as_millis() as u64,
                "Operation failed, retrying"
            );

            if !self.pause(wait).await {
                warn!(attempt = attempt, error = %err, "Retry cancelled");
                return Err(err);
            }
        }
    }

    fn scale_wait(&self, wait: Duration, attempt: u32) -> Duration {
        match self.backoff_factor {
            Some(factor) => {
                Duration::try_from_secs_f64(wait.as_secs_f64() * factor * f64::from(attempt))
                    .unwrap_or(Duration::MAX)
            }
            None => wait,
        }
    }

    /// Sleep between attempts. Returns false if cancelled first.
    async fn pause(&self, wait: Duration) -> bool {
        match &self.cancel {
            Some(token) => {
                if token.is_cancelled() {
                    return false;
                }
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = sleep_or_yield(wait) => true,
                }
            }
            None => {
                sleep_or_yield(wait).await;
                true
            }
        }
    }
}

async fn sleep_or_yield(wait: Duration) {
    if wait.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(wait).await;
    }
}

/// Run `operation` through `retrier`, or exactly once when there is none.
pub async fn retry_once_or<F, Fut, T, E>(retrier: Option<&Retrier>, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match retrier {
        Some(r) => r.retry(operation).await,
        None => operation().await,
    }
}
