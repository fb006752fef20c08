//! Retry with exponential backoff for chapter fetches
//!
//! A chapter fetch that fails transiently (connection reset, gateway busy,
//! HTTP 5xx/429) is retried according to [`RetryConfig`]. Everything else
//! fails the chapter immediately, which in turn fails the whole book.
//!
//! # Example
//!
//! ```no_run
//! use bookdl::retry::{IsRetryable, fetch_with_retry};
//! use bookdl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     Busy,
//!     Missing,
//! }
//!
//! impl std::fmt::Display for FetchError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for FetchError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, FetchError::Busy)
//!     }
//! }
//!
//! # async fn example() -> Result<(), FetchError> {
//! let config = RetryConfig::default();
//! let body = fetch_with_retry(&config, || async {
//!     Ok::<_, FetchError>("chapter text".to_string())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient (worth another attempt) or permanent
pub trait IsRetryable {
    /// Returns true if the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|status| {
                        status.is_server_error() || status.as_u16() == 429
                    })
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // A record-level failure does not get better by asking again
            Error::Download(_) => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Config { .. } => false,
            Error::NotFound(_) => false,
            Error::ShuttingDown => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retry budget is spent
///
/// `config.max_attempts` counts retries, so the operation runs at most
/// `max_attempts + 1` times. The last error is returned unchanged.
pub async fn fetch_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;
    let mut delay = config.initial_delay;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::debug!(attempts = retries + 1, "Fetch succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::debug!(error = %err, "Fetch failed with non-retryable error");
            return Err(err);
        }
        if retries >= config.max_attempts {
            tracing::warn!(
                error = %err,
                attempts = retries + 1,
                "Fetch failed after all retry attempts"
            );
            return Err(err);
        }

        retries += 1;
        let wait = if config.jitter { add_jitter(delay) } else { delay };
        tracing::debug!(
            error = %err,
            retry = retries,
            max_attempts = config.max_attempts,
            delay_ms = wait.as_millis() as u64,
            "Fetch failed, retrying"
        );
        tokio::time::sleep(wait).await;

        delay = next_delay(delay, config);
    }
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay)
}

/// Stretch `delay` by a random factor in [1, 2]
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
