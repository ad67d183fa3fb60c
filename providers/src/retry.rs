//! Exponential backoff + jitter around outer-model calls (C5).
//!
//! Retry delay for attempt `a` (0-indexed): `min(base * rate^a, max) * (1 +
//! U(-jitter, jitter))`. `PermanentError` is never retried; `RateLimitError`
//! and `TransientError` are retried up to `max_retries` times.

use std::future::Future;

use rand::Rng;
use rlm_config::RetryConfig;
use rlm_types::ModelError;

/// Computes the sleep duration for a given zero-indexed attempt, including jitter.
#[must_use]
pub fn calculate_retry_delay(config: &RetryConfig, attempt: u32) -> std::time::Duration {
    let exponential = config.base_delay_secs * config.rate.powi(attempt as i32);
    let capped = exponential.min(config.max_delay_secs);
    let jitter_factor = rand::rng().random_range(-config.jitter..=config.jitter);
    let delay_secs = (capped * (1.0 + jitter_factor)).max(0.0);
    std::time::Duration::from_secs_f64(delay_secs)
}

#[must_use]
pub fn should_retry(err: &ModelError) -> bool {
    err.is_retryable()
}

/// Outcome of one attempt inside [`send_with_retry`]'s internal bookkeeping.
#[derive(Debug)]
enum AttemptOutcome<T> {
    Success(T),
    Retry(ModelError),
    GiveUp(ModelError),
}

/// Drive `attempt` up to `config.max_retries` additional times, sleeping
/// between retryable failures and calling `on_retry` before each sleep.
pub async fn send_with_retry<T, F, Fut>(
    config: &RetryConfig,
    mut on_retry: impl FnMut(&ModelError, u32),
    mut attempt: F,
) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut attempt_number = 0u32;
    loop {
        let outcome = match attempt().await {
            Ok(value) => AttemptOutcome::Success(value),
            Err(err) if !should_retry(&err) => AttemptOutcome::GiveUp(err),
            Err(err) if attempt_number >= config.max_retries => AttemptOutcome::GiveUp(err),
            Err(err) => AttemptOutcome::Retry(err),
        };

        match outcome {
            AttemptOutcome::Success(value) => return Ok(value),
            AttemptOutcome::GiveUp(err) => {
                tracing::debug!(attempt = attempt_number, "model call failed permanently: {err}");
                return Err(err);
            }
            AttemptOutcome::Retry(err) => {
                on_retry(&err, attempt_number);
                let delay = calculate_retry_delay(config, attempt_number);
                tracing::debug!(
                    attempt = attempt_number,
                    delay_ms = delay.as_millis() as u64,
                    "retrying model call after {err}"
                );
                tokio::time::sleep(delay).await;
                attempt_number += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter_config() -> RetryConfig {
        RetryConfig {
            base_delay_secs: 1.0,
            rate: 2.0,
            max_delay_secs: 60.0,
            jitter: 0.0,
            max_retries: 3,
        }
    }

    #[test]
    fn delay_follows_exponential_formula_without_jitter() {
        let config = no_jitter_config();
        assert_eq!(calculate_retry_delay(&config, 0).as_secs_f64(), 1.0);
        assert_eq!(calculate_retry_delay(&config, 1).as_secs_f64(), 2.0);
        assert_eq!(calculate_retry_delay(&config, 2).as_secs_f64(), 4.0);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let config = no_jitter_config();
        let delay = calculate_retry_delay(&config, 10);
        assert_eq!(delay.as_secs_f64(), 60.0);
    }

    #[test]
    fn permanent_errors_are_never_retried() {
        assert!(!should_retry(&ModelError::Permanent("bad request".into())));
        assert!(should_retry(&ModelError::Transient("boom".into())));
        assert!(should_retry(&ModelError::RateLimit { message: "slow down".into(), retry_after: None }));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_up_to_the_limit_then_gives_up() {
        let config = no_jitter_config();
        let attempts = AtomicU32::new(0);
        let result = send_with_retry(
            &config,
            |_, _| {},
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ModelError::Transient("still down".into())) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), config.max_retries + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_once_an_attempt_succeeds() {
        let config = no_jitter_config();
        let attempts = AtomicU32::new(0);
        let result = send_with_retry(
            &config,
            |_, _| {},
            || {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(ModelError::Transient("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_short_circuits_without_sleeping() {
        let config = no_jitter_config();
        let attempts = AtomicU32::new(0);
        let result = send_with_retry(
            &config,
            |_, _| {},
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ModelError::Permanent("bad key".into())) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
