//! Minimum-interval rate limiting between requests
//!
//! The service tolerates one request per interval. The limiter does not keep
//! the last request time itself: the retrieval loop passes it in and stores the
//! returned timestamp, so the whole timing state travels with the loop.
//!
//! Intervals are measured from the *completion* of the previous request. All
//! time comes from tokio's clock, which tests can pause and advance.

use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Enforces a minimum interval between consecutive requests
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    min_interval: Duration,
}

impl RateLimiter {
    /// Create a limiter with the given minimum interval
    ///
    /// # Examples
    ///
    /// ```
    /// use bookfeed_dl::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(Duration::from_secs(60));
    /// assert_eq!(limiter.min_interval(), Duration::from_secs(60));
    /// ```
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Configured minimum interval
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Time still to wait at `now` before a request may start
    pub fn remaining(&self, last_request: Option<Instant>, now: Instant) -> Duration {
        self.remaining_for(last_request, now, self.min_interval)
    }

    /// Wait until the minimum interval since `last_request` has passed
    ///
    /// Returns the instant at which the caller may issue its request. With no
    /// previous request this returns immediately. The wait is not cancelable.
    pub async fn wait_if_needed(&self, last_request: Option<Instant>) -> Instant {
        self.wait_at_least(last_request, Duration::ZERO).await
    }

    /// Wait for the longer of the minimum interval and `interval` since `last_request`
    ///
    /// Used for retry backoff: a backoff can stretch the gap between requests
    /// but never shorten it below the minimum.
    pub async fn wait_at_least(&self, last_request: Option<Instant>, interval: Duration) -> Instant {
        let interval = interval.max(self.min_interval);
        let now = Instant::now();
        let remaining = self.remaining_for(last_request, now, interval);
        if remaining.is_zero() {
            return now;
        }

        info!(
            wait_secs = remaining.as_secs_f64(),
            "Waiting before next request"
        );
        tokio::time::sleep(remaining).await;
        Instant::now()
    }

    fn remaining_for(&self, last_request: Option<Instant>, now: Instant, interval: Duration) -> Duration {
        match last_request {
            Some(last) => last
                .checked_add(interval)
                .map_or(interval, |deadline| deadline.saturating_duration_since(now)),
            None => Duration::ZERO,
        }
    }
}
