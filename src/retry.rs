//! Bounded, rate-limited retry of transient failures
//!
//! Every attempt, the first included, goes through the [`RateLimiter`], so
//! retries never break the minimum request interval. Between retries an
//! exponential backoff (with optional jitter) can stretch the wait further.
//!
//! # Example
//!
//! ```no_run
//! use bookfeed_dl::config::RetryConfig;
//! use bookfeed_dl::rate_limiter::RateLimiter;
//! use bookfeed_dl::retry::{IsRetryable, RetryOutcome, retry_rate_limited};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! struct Busy;
//!
//! impl std::fmt::Display for Busy {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "server busy")
//!     }
//! }
//!
//! impl IsRetryable for Busy {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_secs(60));
//! let cancel = CancellationToken::new();
//! let attempts = retry_rate_limited(&RetryConfig::default(), &limiter, None, &cancel, |_attempt| async {
//!     Ok::<_, Busy>(())
//! })
//! .await;
//! assert!(matches!(attempts.outcome, RetryOutcome::Success(())));
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use crate::rate_limiter::RateLimiter;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (rejected credentials, disk full, corrupt data) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::TransientFetch { .. } => true,
            // Credentials are not self-correcting
            Error::Auth(_) => false,
            // Protocol violations and expired sessions need intervention
            Error::FatalFetch { .. } | Error::Document(_) => false,
            // A failed acknowledgement is recovered on the next fetch, not by retrying
            Error::Confirm { .. } => false,
            // Disk problems risk inconsistent state if retried blindly
            Error::Store(_) | Error::Io(_) => false,
            Error::Config { .. } | Error::Serialization(_) | Error::NoProgress { .. } => false,
            Error::Aborted { source, .. } => source.is_retryable(),
        }
    }
}

/// How a retried operation ended
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded
    Success(T),
    /// A non-retryable error, or the last error once retries were exhausted
    Failed(E),
    /// Cancellation was requested before an attempt could start
    Cancelled,
}

/// Result of [`retry_rate_limited`] together with the timing state to carry forward
#[derive(Debug)]
pub struct Attempts<T, E> {
    /// How the operation ended
    pub outcome: RetryOutcome<T, E>,
    /// Attempts actually made
    pub attempts: u32,
    /// Completion time of the last attempt, or the input value if none was made
    pub last_request: Option<Instant>,
}

/// Exponential backoff schedule
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Start a schedule from the retry configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before the next retry; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .map_or(self.max, |grown| grown.min(self.max));
        if self.jitter { add_jitter(delay) } else { delay }
    }
}

/// Run `operation` until it succeeds, fails permanently, or exhausts the retries
///
/// `operation` receives the 1-based attempt number. Before every attempt the
/// limiter enforces the minimum interval since `last_request` (stretched by the
/// backoff on retries). `cancel` is checked before and after that wait; the
/// wait itself is never interrupted. At most `1 + config.max_attempts` attempts are made.
pub async fn retry_rate_limited<F, Fut, T, E>(
    config: &RetryConfig,
    limiter: &RateLimiter,
    mut last_request: Option<Instant>,
    cancel: &CancellationToken,
    mut operation: F,
) -> Attempts<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut attempts = 0u32;
    let mut retry_delay = Duration::ZERO;

    loop {
        if cancel.is_cancelled() {
            return Attempts {
                outcome: RetryOutcome::Cancelled,
                attempts,
                last_request,
            };
        }

        limiter.wait_at_least(last_request, retry_delay).await;
        if cancel.is_cancelled() {
            return Attempts {
                outcome: RetryOutcome::Cancelled,
                attempts,
                last_request,
            };
        }
        attempts += 1;
        let result = operation(attempts).await;
        last_request = Some(Instant::now());

        match result {
            Ok(value) => {
                if attempts > 1 {
                    tracing::info!(attempts, "Operation succeeded after retry");
                }
                return Attempts {
                    outcome: RetryOutcome::Success(value),
                    attempts,
                    last_request,
                };
            }
            Err(e) if e.is_retryable() && attempts <= config.max_attempts => {
                retry_delay = backoff.next_delay();
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    max_retries = config.max_attempts,
                    backoff_ms = retry_delay.as_millis(),
                    min_interval_ms = limiter.min_interval().as_millis(),
                    "Operation failed, retrying"
                );
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Attempts {
                    outcome: RetryOutcome::Failed(e),
                    attempts,
                    last_request,
                };
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}
