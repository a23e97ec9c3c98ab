use std::time::Duration;

use rand::Rng;

/// Bounded retry policy for transient provider failures.
///
/// The webhook path runs under a hard response deadline, so attempts and
/// backoff stay small: one retry with a short jittered pause, then the
/// caller degrades to its fallback.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn webhook_default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(150),
            jitter: Duration::from_millis(100),
        }
    }

    /// Delay before the given retry attempt (attempt 0 is the first try).
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter.as_millis() as u64)
        };
        Some(self.backoff * attempt + Duration::from_millis(jitter_ms))
    }

    pub fn attempts(&self) -> std::ops::Range<u32> {
        0..self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_has_no_delay() {
        let policy = RetryPolicy::webhook_default();
        assert!(policy.delay_before(0).is_none());
    }

    #[test]
    fn retry_delay_is_bounded() {
        let policy = RetryPolicy::webhook_default();
        for _ in 0..50 {
            let delay = policy.delay_before(1).expect("retry should back off");
            assert!(delay >= Duration::from_millis(150));
            assert!(delay < Duration::from_millis(250));
        }
    }

    #[test]
    fn default_allows_exactly_one_retry() {
        let policy = RetryPolicy::webhook_default();
        assert_eq!(policy.attempts().count(), 2);
    }
}
