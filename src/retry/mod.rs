//! Retry policies consulted when pooled work fails

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// What a retryer knows about the failure it is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempts made so far, including the one that just failed
    pub attempt: u32,
    /// Time since the first attempt started
    pub elapsed: Duration,
}

/// Decides whether a failed operation is retried and how long to wait first.
///
/// Retryers own their attempt and time budgets; the pool only reports what
/// happened.
pub trait Retryer: Send + Sync {
    /// `Some(delay)` to retry after `delay`, `None` to give up
    fn next_delay(&self, ctx: &RetryContext) -> Option<Duration>;
}

impl<R: Retryer + ?Sized> Retryer for Arc<R> {
    fn next_delay(&self, ctx: &RetryContext) -> Option<Duration> {
        (**self).next_delay(ctx)
    }
}

impl<R: Retryer + ?Sized> Retryer for Box<R> {
    fn next_delay(&self, ctx: &RetryContext) -> Option<Duration> {
        (**self).next_delay(ctx)
    }
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl Retryer for NoRetry {
    fn next_delay(&self, _ctx: &RetryContext) -> Option<Duration> {
        None
    }
}

/// Retries up to a fixed number of attempts with a constant delay
#[derive(Debug, Clone)]
pub struct FixedRetryer {
    /// Total attempts allowed, including the first
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
    /// Stop retrying once this much time has passed
    pub max_elapsed: Option<Duration>,
}

impl FixedRetryer {
    /// Create a fixed retryer
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            max_elapsed: None,
        }
    }

    /// Set total time budget
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }
}

impl Retryer for FixedRetryer {
    fn next_delay(&self, ctx: &RetryContext) -> Option<Duration> {
        if !within_budget(ctx, self.max_attempts, self.max_elapsed) {
            return None;
        }
        Some(self.delay)
    }
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetryer {
    /// Total attempts allowed, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Randomize each delay between half and all of its nominal value
    pub jitter: bool,
    /// Stop retrying once this much time has passed
    pub max_elapsed: Option<Duration>,
}

impl Default for ExponentialBackoffRetryer {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
            jitter: true,
            max_elapsed: None,
        }
    }
}

impl ExponentialBackoffRetryer {
    /// Create a backoff retryer allowing `max_attempts` attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Set the first delay
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set maximum single delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set total time budget
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Delay before the retry following failed attempt number `attempt`
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Retryer for ExponentialBackoffRetryer {
    fn next_delay(&self, ctx: &RetryContext) -> Option<Duration> {
        if !within_budget(ctx, self.max_attempts, self.max_elapsed) {
            return None;
        }

        let delay = self.nominal_delay(ctx.attempt);
        if !self.jitter || delay.is_zero() {
            return Some(delay);
        }
        let half = delay / 2;
        Some(half + rand::thread_rng().gen_range(Duration::ZERO..=delay - half))
    }
}

/// Backoff retryer allowing `max_attempts` attempts with default timing
pub fn exponential_backoff(max_attempts: u32) -> ExponentialBackoffRetryer {
    ExponentialBackoffRetryer::new(max_attempts)
}

fn within_budget(ctx: &RetryContext, max_attempts: u32, max_elapsed: Option<Duration>) -> bool {
    if ctx.attempt >= max_attempts {
        return false;
    }
    max_elapsed.map_or(true, |limit| ctx.elapsed < limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(attempt: u32) -> RetryContext {
        RetryContext {
            attempt,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(NoRetry.next_delay(&ctx(1)), None);
    }

    #[test]
    fn test_fixed_retryer() {
        let retryer = FixedRetryer::new(3, Duration::from_millis(5));
        assert_eq!(retryer.next_delay(&ctx(1)), Some(Duration::from_millis(5)));
        assert_eq!(retryer.next_delay(&ctx(2)), Some(Duration::from_millis(5)));
        assert_eq!(retryer.next_delay(&ctx(3)), None);
    }

    #[test]
    fn test_time_budget() {
        let retryer = FixedRetryer::new(100, Duration::ZERO).with_max_elapsed(Duration::from_secs(1));
        let late = RetryContext {
            attempt: 1,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(retryer.next_delay(&late), None);
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let retryer = ExponentialBackoffRetryer::new(20)
            .with_base(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_jitter(false);

        assert_eq!(retryer.next_delay(&ctx(1)), Some(Duration::from_millis(10)));
        assert_eq!(retryer.next_delay(&ctx(2)), Some(Duration::from_millis(20)));
        assert_eq!(retryer.next_delay(&ctx(3)), Some(Duration::from_millis(40)));
        assert_eq!(retryer.next_delay(&ctx(5)), Some(Duration::from_millis(100)));
        assert_eq!(retryer.nominal_delay(u32::MAX), Duration::from_millis(100));
        assert_eq!(retryer.next_delay(&ctx(20)), None);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let retryer = exponential_backoff(10).with_base(Duration::from_millis(40));
        for _ in 0..50 {
            let delay = retryer.next_delay(&ctx(2)).unwrap();
            assert!(delay >= Duration::from_millis(40));
            assert!(delay <= Duration::from_millis(80));
        }
    }
}
