//! Retry logic with exponential backoff
//!
//! Used for artifact fetches only. Conversion sessions are never retried
//! internally; a failed job is retried by resuming the batch.
//!
//! # Example
//!
//! ```no_run
//! use vectorq::retry::{IsRetryable, with_retry};
//! use vectorq::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = with_retry(&config, "example", || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, 5xx responses) return `true`.
/// Permanent failures (4xx, decode errors, full disks) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Pause the server asked for before the next attempt, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|status| status.is_server_error())
            }
            Error::ServiceBusy { .. } => true,
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
            Error::Config { .. }
            | Error::Session(_)
            | Error::Materialize(_)
            | Error::Validation(_)
            | Error::Quota(_)
            | Error::WebSocket(_)
            | Error::Serialization(_)
            | Error::Image(_)
            | Error::BatchRunning
            | Error::InvalidState(_)
            | Error::Other(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::ServiceBusy { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Delay schedule for one retried operation
#[derive(Debug)]
struct Backoff<'a> {
    config: &'a RetryConfig,
    next: Duration,
    retries: u32,
}

impl<'a> Backoff<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            next: config.initial_delay,
            retries: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the retries are used up
    ///
    /// A server-requested pause replaces the scheduled one, capped at `max_delay`.
    fn next_delay(&mut self, requested: Option<Duration>) -> Option<Duration> {
        if self.retries >= self.config.max_attempts {
            return None;
        }
        self.retries += 1;

        let scheduled = if self.config.jitter {
            add_jitter(self.next)
        } else {
            self.next
        };
        self.next = Duration::from_secs_f64(self.next.as_secs_f64() * self.config.backoff_multiplier)
            .min(self.config.max_delay);

        Some(requested.map_or(scheduled, |pause| pause.min(self.config.max_delay)))
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries
///
/// `what` names the operation in log lines (for artifact fetches, the
/// format being fetched). Up to `max_attempts` retries follow the first
/// call; the last error is returned once they are used up.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);

    loop {
        let err = match operation().await {
            Ok(value) => {
                if backoff.retries > 0 {
                    tracing::info!(what, attempts = backoff.retries + 1, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::debug!(what, error = %err, "Permanent failure, not retrying");
            return Err(err);
        }
        let Some(delay) = backoff.next_delay(err.retry_after()) else {
            tracing::error!(what, error = %err, attempts = backoff.retries + 1, "Giving up after retries");
            return Err(err);
        };

        tracing::warn!(
            what,
            error = %err,
            retry = backoff.retries,
            max_retries = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            server_requested = err.retry_after().is_some(),
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Jitter is uniform between 0% and 100% of the delay
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    delay.mul_f64(1.0 + factor)
}
