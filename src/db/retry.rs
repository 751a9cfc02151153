//! Bounded exponential-backoff retry for store operations. Only transient
//! failure classes are retried; everything else fails fast and the final
//! error is always handed back untouched.

use std::future::Future;
use std::time::Duration;

/// Error-text fragments that mark a failure as transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timeout",
    "network is unreachable",
    "no route to host",
    "broken pipe",
    "eof",
];

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Cap on the cumulative backoff; once spent, no further attempt is
    /// made even if the attempt budget remains.
    pub max_total_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_total_delay: Duration::from_secs(6),
        }
    }
}

pub fn is_retryable(error: &sqlx::Error) -> bool {
    is_transient_text(&error.to_string())
}

pub fn is_transient_text(text: &str) -> bool {
    let text = text.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|pattern| text.contains(pattern))
}

/// Runs the operation, retrying failures the predicate marks transient with
/// doubling delays. Honours cancellation at every sleep and at the
/// operation itself.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    config: RetryConfig,
    retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;
    let mut slept = Duration::ZERO;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt == config.max_attempts
                    || !retryable(&err)
                    || slept + delay > config.max_total_delay
                {
                    return Err(err);
                }
                tracing::warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "store operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                slept += delay;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient_error() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }

    fn permanent_error() -> sqlx::Error {
        sqlx::Error::ColumnNotFound("device_id".to_string())
    }

    #[test]
    fn classifies_transient_patterns() {
        assert!(is_retryable(&transient_error()));
        assert!(is_transient_text("pool timed out: timeout"));
        assert!(is_transient_text("unexpected EOF while reading"));
        assert!(is_transient_text("write: broken pipe"));
        assert!(!is_retryable(&permanent_error()));
        assert!(!is_transient_text("syntax error at or near SELECT"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_with_backoff(
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient_error())
                    } else {
                        Ok(42)
                    }
                }
            },
            RetryConfig::default(),
            is_retryable,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_fast_on_permanent_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = retry_with_backoff(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(permanent_error())
                }
            },
            RetryConfig::default(),
            is_retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_the_budget_returns_the_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = retry_with_backoff(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient_error())
                }
            },
            RetryConfig::default(),
            is_retryable,
        )
        .await;

        let err = result.unwrap_err();
        assert!(is_retryable(&err));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cumulative_delay_is_capped() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_total_delay: Duration::from_secs(3),
        };

        let result: Result<(), _> = retry_with_backoff(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient_error())
                }
            },
            config,
            is_retryable,
        )
        .await;

        assert!(result.is_err());
        // 1s + 2s sleeps fit the 3s budget; the 4s sleep would not.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
