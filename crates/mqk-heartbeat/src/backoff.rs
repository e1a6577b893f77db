use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_millis() as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(scaled.min(self.max_delay.as_millis() as f64) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Transport errors are retryable; explicit HTTP error responses are not.
/// Reused uniformly by every poller per the ambient error-handling design.
pub fn classify_transport_error(is_http_status_error: bool) -> ErrorClass {
    if is_http_status_error {
        ErrorClass::Fatal
    } else {
        ErrorClass::Retryable
    }
}

/// Retries `op` up to `policy.max_attempts` times, sleeping with exponential
/// backoff between attempts. `classify` decides whether a given error is
/// worth retrying at all.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    classify: impl Fn(&E) -> ErrorClass,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt + 1 >= policy.max_attempts || classify(&e) == ErrorClass::Fatal {
                    return Err(e);
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Sliding-window rate limiter for the advisory-oracle consultation layer.
#[derive(Debug, Default)]
pub struct SlidingHourRateLimiter {
    calls: VecDeque<DateTime<Utc>>,
}

impl SlidingHourRateLimiter {
    pub fn try_acquire(&mut self, max_per_hour: u32, now: DateTime<Utc>) -> bool {
        let cutoff = now - chrono::Duration::hours(1);
        while matches!(self.calls.front(), Some(t) if *t <= cutoff) {
            self.calls.pop_front();
        }
        if self.calls.len() as u32 >= max_per_hour {
            false
        } else {
            self.calls.push_back(now);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy { base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5), ..RetryPolicy::default() };
        let result: Result<i32, &str> = retry_with_backoff(&policy, |_| ErrorClass::Retryable, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("timeout") } else { Ok(42) } }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<i32, &str> = retry_with_backoff(&policy, |_| ErrorClass::Fatal, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err("400 bad request") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rate_limiter_blocks_past_max_and_recovers_after_window() {
        let mut rl = SlidingHourRateLimiter::default();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for _ in 0..20 {
            assert!(rl.try_acquire(20, t0));
        }
        assert!(!rl.try_acquire(20, t0));
        let later = t0 + chrono::Duration::hours(1) + chrono::Duration::seconds(1);
        assert!(rl.try_acquire(20, later));
    }
}
