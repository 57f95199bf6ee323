//! Bounded retry with exponential backoff for signed asset fetches
//!
//! A page fetch is retried only while its failure is transient and the signed URL is
//! still alive. Backoff grows geometrically up to a cap, with optional jitter so that a
//! pool of page workers hitting the same outage does not come back in lockstep.
//!
//! # Example
//!
//! ```no_run
//! use grabber::config::RetryConfig;
//! use grabber::error::FetchError;
//! use grabber::retry::fetch_with_backoff;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), FetchError> {
//! let config = RetryConfig::default();
//! let deadline = tokio::time::Instant::now() + Duration::from_secs(210);
//! let bytes = fetch_with_backoff(&config, Some(deadline), || async {
//!     Ok::<_, FetchError>(b"page".to_vec())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Classifies failures as worth another attempt or not
pub trait IsRetryable {
    /// Whether the same request may succeed if sent again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::Connection(_)
                | FetchError::RateLimited
                | FetchError::Server { .. }
        )
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Fetch(e) => e.is_retryable(),
            Error::TransientNetwork(_) => true,
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            // Expiry is remedied by re-extraction, never by retrying the same URL
            _ => false,
        }
    }
}

/// Run `fetch` until it succeeds, fails terminally or runs out of retries
///
/// `fetch` runs once, then up to `config.max_retries` more times while it keeps failing
/// with a retryable error. When `deadline` is set, no backoff sleep may end past it: the
/// last error is returned instead of waking up to a dead URL.
pub async fn fetch_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    deadline: Option<Instant>,
    mut fetch: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;
    let mut delay = config.initial_delay;

    loop {
        let e = match fetch().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::debug!(attempts = retries + 1, "fetch succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !e.is_retryable() {
            tracing::debug!(error = %e, "fetch failed terminally");
            return Err(e);
        }
        if retries >= config.max_retries {
            tracing::warn!(error = %e, attempts = retries + 1, "retry budget exhausted");
            return Err(e);
        }

        let pause = if config.jitter { add_jitter(delay) } else { delay };
        if deadline.is_some_and(|d| Instant::now() + pause >= d) {
            tracing::debug!(error = %e, "no time left for another attempt");
            return Err(e);
        }

        retries += 1;
        tracing::warn!(
            error = %e,
            retry = retries,
            max_retries = config.max_retries,
            delay_ms = pause.as_millis() as u64,
            "fetch failed, backing off"
        );
        tokio::time::sleep(pause).await;
        delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
            .min(config.max_delay);
    }
}

/// Stretch `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
