//! Backoff policy for outbound calls (spec.md §7: base 200 ms, factor 2,
//! cap 5 s, jitter ±20%). The retry *budget* — how many attempts a given
//! error class gets — is not uniform: spec.md §4.7 step 3 grants
//! connection-level errors up to 2 retries but a 5xx only 1, so the
//! budget travels with the `classify` callback's [`DeliveryOutcome`]
//! rather than living on this policy.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-indexed), exponential with
    /// jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let raw_ms = (self.base_delay.as_millis() as f64) * exp;
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        let jitter_span = capped_ms * self.jitter_factor;
        let jittered_ms = if jitter_span > 0.0 {
            let offset = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
            (capped_ms + offset).max(0.0)
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms.round() as u64)
    }
}

/// Whether an error observed during delivery should be retried, and if
/// so, the total attempt budget for its class (spec.md §4.7 step 3:
/// connection-level errors get up to 2 retries, a 5xx gets 1, a 4xx
/// gets none). `max_attempts` counts the *total* attempts, including
/// the first, so a single retry is `max_attempts: 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Retry { max_attempts: u32 },
    GiveUp,
}

pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut classify: impl FnMut(&E) -> DeliveryOutcome,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let max_attempts = match classify(&e) {
                    DeliveryOutcome::GiveUp => return Err(e),
                    DeliveryOutcome::Retry { max_attempts } => max_attempts,
                };
                if attempt >= max_attempts {
                    return Err(e);
                }
                warn!(
                    operation = operation_name,
                    attempt, error = %e, "retrying after delivery failure"
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        // attempt 6 would be 6400ms uncapped; capped at 5s.
        assert_eq!(policy.delay_for(6), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=3 {
            let base_ms = (policy.base_delay.as_millis() as f64)
                * policy.multiplier.powi(attempt - 1);
            let capped_ms = base_ms.min(policy.max_delay.as_millis() as f64);
            let span = capped_ms * policy.jitter_factor;
            let got = policy.delay_for(attempt as u32).as_millis() as f64;
            assert!(got >= (capped_ms - span - 1.0).max(0.0));
            assert!(got <= capped_ms + span + 1.0);
        }
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_fails() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        };
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            &policy,
            "test_op",
            |_e: &&str| DeliveryOutcome::Retry { max_attempts: 3 },
            || {
                calls += 1;
                async { Err("boom") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_budget_is_per_class() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        };
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            &policy,
            "test_op",
            |_e: &&str| DeliveryOutcome::Retry { max_attempts: 2 },
            || {
                calls += 1;
                async { Err("server error") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn give_up_classification_stops_immediately() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            &policy,
            "test_op",
            |_e: &&str| DeliveryOutcome::GiveUp,
            || {
                calls += 1;
                async { Err("client error") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
