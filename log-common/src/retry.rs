use std::time;

#[derive(Copy, Clone, Debug)]
/// Backoff policy for operations that are retried until shutdown, such as
/// fetching from a stream whose broker is unavailable.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: time::Duration,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: time::Duration,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Time to wait before retrying after `attempt` consecutive failures
    /// (the first failure is attempt 0). Never exceeds the maximum interval.
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        self.backoff_coefficient
            .checked_pow(attempt)
            .and_then(|factor| self.initial_interval.checked_mul(factor))
            .map_or(self.maximum_interval, |candidate| {
                std::cmp::min(candidate, self.maximum_interval)
            })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: time::Duration::from_secs(30),
        }
    }
}
