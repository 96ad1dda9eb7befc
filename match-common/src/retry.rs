use std::time;

#[derive(Copy, Clone, Debug)]
/// Exponential backoff used between store write attempts and batch redeliveries.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
    /// Attempts allowed in total, the first one included.
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Backoff to wait after the given (zero-based) attempt failed.
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt));

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }

    /// Whether another attempt may follow the given (zero-based) attempt.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_millis(50),
            maximum_interval: Some(time::Duration::from_secs(2)),
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_until_maximum() {
        let policy = RetryPolicy::new(
            2,
            time::Duration::from_millis(100),
            Some(time::Duration::from_millis(500)),
            10,
        );

        assert_eq!(
            policy.time_until_next_retry(0),
            time::Duration::from_millis(100)
        );
        assert_eq!(
            policy.time_until_next_retry(2),
            time::Duration::from_millis(400)
        );
        assert_eq!(
            policy.time_until_next_retry(3),
            time::Duration::from_millis(500)
        );
        assert_eq!(
            policy.time_until_next_retry(40),
            time::Duration::from_millis(500)
        );
    }

    #[test]
    fn test_attempts_are_bounded() {
        let policy = RetryPolicy::new(2, time::Duration::from_millis(1), None, 3);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let policy = RetryPolicy::new(2, time::Duration::from_millis(1), None, 0);

        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(0));
    }
}
