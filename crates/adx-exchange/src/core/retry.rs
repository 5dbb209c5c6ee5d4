use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::BidderError;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay).min(self.max_delay)
    }
}

/// Run `op` with bounded exponential backoff. Only retryable failures
/// (timeout, network, rate-limit) are retried; backoff sleeps race the
/// deadline and give up early once it cannot fit another attempt.
pub async fn retry_with_deadline<T, F, Fut>(
    deadline: Instant,
    config: &RetryConfig,
    mut op: F,
) -> Result<T, BidderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BidderError>>,
{
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                last_err = Some(err);
            }
        }

        if attempt < config.max_retries {
            let delay = config.backoff_delay(attempt);
            let now = Instant::now();
            if now + delay >= deadline {
                break;
            }
            tokio::time::sleep(delay).await;
        }
    }

    Err(last_err.unwrap_or_else(|| BidderError::timeout("deadline elapsed before first attempt")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BidderErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(cfg.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(cfg.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(cfg.backoff_delay(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_retryable_until_success() {
        let attempts = AtomicU32::new(0);
        let cfg = RetryConfig {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };

        let result = retry_with_deadline(
            Instant::now() + Duration::from_secs(5),
            &cfg,
            || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BidderError::network("flaky"))
                } else {
                    Ok(42)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let attempts = AtomicU32::new(0);
        let cfg = RetryConfig::default();

        let result: Result<(), _> = retry_with_deadline(
            Instant::now() + Duration::from_secs(5),
            &cfg,
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(BidderError::protocol("malformed"))
            },
        )
        .await;

        assert_eq!(result.unwrap_err().kind, BidderErrorKind::Protocol);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_gives_up_at_deadline() {
        let attempts = AtomicU32::new(0);
        let cfg = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            ..Default::default()
        };

        let start = Instant::now();
        let result: Result<(), _> = retry_with_deadline(
            start + Duration::from_millis(50),
            &cfg,
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(BidderError::timeout("slow"))
            },
        )
        .await;

        assert!(result.is_err());
        // First backoff (100ms) would overshoot the 50ms deadline.
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
