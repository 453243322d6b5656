use std::time;

use tracing::warn;

/// A bounded retry policy: a fixed number of attempts separated by a
/// (possibly growing) backoff interval.
///
/// Used for both the pool-open retry loop (constant interval) and the
/// in-transaction retry bound on serialization failures (see
/// [`retry_async`](RetryPolicy::retry_async)).
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    max_attempts: u32,
    /// Coefficient to multiply `initial_interval` with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval before the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            max_attempts,
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// A policy with a constant interval between attempts, no backoff growth.
    pub fn constant(max_attempts: u32, interval: time::Duration) -> Self {
        Self::new(max_attempts, 1, interval, Some(interval))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calculate the time until the next retry, given how many attempts have
    /// already been made.
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self.initial_interval * self.backoff_coefficient.pow(attempt);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }

    /// Run `f` up to `max_attempts` times, sleeping per
    /// [`time_until_next_retry`](Self::time_until_next_retry) between
    /// attempts. Returns the last error if every attempt fails.
    pub async fn retry_async<T, E, F, Fut>(&self, label: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt + 1 >= self.max_attempts => return Err(error),
                Err(error) => {
                    warn!(
                        "{label} failed (attempt {}/{}): {error}",
                        attempt + 1,
                        self.max_attempts
                    );
                    tokio::time::sleep(self.time_until_next_retry(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_coefficient: 1,
            initial_interval: time::Duration::from_secs(2),
            maximum_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy::constant(3, time::Duration::from_millis(1));
        let attempts = AtomicU32::new(0);

        let result: Result<u32, &str> = policy
            .retry_async("test", || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_error_after_exhausting_attempts() {
        let policy = RetryPolicy::constant(3, time::Duration::from_millis(1));
        let attempts = AtomicU32::new(0);

        let result: Result<(), &str> = policy
            .retry_async("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            })
            .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
