//! Bounded retry with exponential backoff.
//!
//! Each call to [`execute_with_retry`] owns its delay state; nothing is shared
//! between invocations. Whether a failure is worth retrying is decided by
//! [`is_retryable_error`] on the error's display text. Callers that know more
//! about their errors (a Retry-After header, a payload that will never
//! parse) use [`execute_with_retry_by`] with their own verdict.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::classifier::is_retryable_error;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries (total attempts = `max_retries + 1`)
    pub max_retries: u32,

    /// Delay before the first retry
    pub retry_delay: Duration,

    /// Multiplier applied to the delay after every retry
    pub backoff_multiplier: f64,

    /// Extra random delay as a fraction of the current delay (0.0 = none).
    /// The deterministic delay is always the minimum.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, retry_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            retry_delay,
            backoff_multiplier,
            jitter: 0.0,
        }
    }

    /// Add random jitter on top of the deterministic delay.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Total attempts allowed, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Longest possible wait before each retry, jitter included.
    pub fn max_backoff_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let multiplier = self.backoff_multiplier.max(0.0);
        std::iter::successors(Some(self.retry_delay), move |delay| Some(scale(*delay, multiplier)))
            .take(self.max_retries as usize)
            .map(move |delay| {
                if self.jitter > 0.0 {
                    delay.saturating_add(scale(delay, self.jitter))
                } else {
                    delay
                }
            })
    }

    fn sleep_for(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay.saturating_add(scale(delay, extra))
    }
}

/// `delay * factor`, saturating at `Duration::MAX`.
fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor.max(0.0)).unwrap_or(Duration::MAX)
}

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Stop now and return the error
    Fatal,
    /// Retry after the backoff delay, or after `after` if that is longer
    Retry { after: Option<Duration> },
}

/// Default verdict: retry exactly when [`is_retryable_error`] matches the
/// error's display text.
pub fn classify_by_message<E: fmt::Display + ?Sized>(error: &E) -> RetryVerdict {
    if is_retryable_error(&error.to_string()) {
        RetryVerdict::Retry { after: None }
    } else {
        RetryVerdict::Fatal
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, thiserror::Error)]
#[error("{context} failed after {attempts} attempt{}: {source}", plural(.attempts))]
pub struct RetryError<E> {
    /// What was being attempted (for logs and error messages)
    pub context: String,
    /// Number of attempts made before giving up
    pub attempts: u32,
    /// Whether the last error was classified as transient
    pub retryable: bool,
    /// The last underlying error
    #[source]
    pub source: E,
}

fn plural(count: &u32) -> &'static str {
    if *count == 1 {
        ""
    } else {
        "s"
    }
}

impl<E> RetryError<E> {
    /// Discard the retry metadata and return the underlying error.
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Run `f` until it succeeds, fails fatally, or runs out of attempts.
///
/// Attempts happen at t=0, then after `retry_delay`, then after
/// `retry_delay * backoff_multiplier`, and so on.
pub async fn execute_with_retry<T, E, F, Fut>(
    f: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    execute_with_retry_by(f, config, context, |error: &E| classify_by_message(error)).await
}

/// Like [`execute_with_retry`], with `verdict` deciding what each failure
/// means. A `Retry { after }` hint longer than the backoff delay replaces it.
pub async fn execute_with_retry_by<T, E, F, Fut, V>(
    mut f: F,
    config: &RetryConfig,
    context: &str,
    verdict: V,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    V: Fn(&E) -> RetryVerdict,
{
    let start = Instant::now();
    let max_attempts = config.max_attempts();
    let multiplier = config.backoff_multiplier.max(0.0);
    let mut delay = config.retry_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::debug!(context, attempt, max_attempts, "Attempting operation");

        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        context,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                let message = error.to_string();
                let hint = match verdict(&error) {
                    RetryVerdict::Retry { after } => Some(after),
                    RetryVerdict::Fatal => None,
                };
                let retryable = hint.is_some();

                let Some(hint) = hint.filter(|_| attempt < max_attempts) else {
                    if retryable {
                        tracing::error!(
                            context,
                            attempt,
                            error = %message,
                            "Operation failed, retries exhausted"
                        );
                    } else {
                        tracing::error!(
                            context,
                            attempt,
                            error = %message,
                            "Operation failed (non-retryable)"
                        );
                    }
                    return Err(RetryError {
                        context: context.to_string(),
                        attempts: attempt,
                        retryable,
                        source: error,
                    });
                };

                let backoff = config.sleep_for(delay);
                let wait = hint.map_or(backoff, |after| after.max(backoff));
                tracing::warn!(
                    context,
                    attempt,
                    delay_ms = wait.as_millis() as u64,
                    error = %message,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(wait).await;
                delay = scale(delay, multiplier);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting<F>(calls: &Arc<AtomicU32>, outcome: F) -> impl FnMut() -> futures::future::Ready<Result<u32, String>>
    where
        F: Fn(u32) -> Result<u32, String>,
    {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            futures::future::ready(outcome(n))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let f = counting(&calls, |n| {
            if n <= 2 {
                Err("503 Service Unavailable".to_string())
            } else {
                Ok(42)
            }
        });

        let result = execute_with_retry(f, &RetryConfig::default(), "fetch boards").await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_fails_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let f = counting(&calls, |_| Err("invalid api token".to_string()));
        let config = RetryConfig::new(5, Duration::from_millis(10), 2.0);

        let err = execute_with_retry(f, &config, "create card").await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
        assert!(!err.retryable);
        assert_eq!(err.source, "invalid api token");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let f = counting(&calls, |_| Err("request timeout".to_string()));

        let err = execute_with_retry(f, &RetryConfig::default(), "list repos")
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts, 3);
        assert!(err.retryable);
        assert_eq!(
            err.to_string(),
            "list repos failed after 3 attempts: request timeout"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_grow() {
        let calls = Arc::new(AtomicU32::new(0));
        let f = counting(&calls, |_| Err("rate limit".to_string()));
        let start = Instant::now();

        let _ = execute_with_retry(f, &RetryConfig::default(), "sync").await;

        // 1000ms + 2000ms of backoff before the third attempt
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_never_shortens_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let f = counting(&calls, |_| Err("network error".to_string()));
        let config = RetryConfig::new(1, Duration::from_millis(100), 2.0).with_jitter(0.5);
        let start = Instant::now();

        let _ = execute_with_retry(f, &config, "jittered").await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed <= Duration::from_millis(155));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_multiplier_saturates_instead_of_panicking() {
        let calls = Arc::new(AtomicU32::new(0));
        let f = counting(&calls, |_| Err("timeout".to_string()));
        let config = RetryConfig::new(2, Duration::from_millis(1000), 1e30).with_jitter(1e30);

        let err = execute_with_retry(f, &config, "overflow").await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let delays: Vec<Duration> = config.max_backoff_delays().collect();
        assert_eq!(delays, vec![Duration::MAX, Duration::MAX]);
    }

    #[test]
    fn test_max_backoff_delays() {
        let delays: Vec<Duration> = RetryConfig::default().max_backoff_delays().collect();
        assert_eq!(delays, vec![Duration::from_millis(1000), Duration::from_millis(2000)]);

        let jittered = RetryConfig::new(1, Duration::from_millis(100), 2.0).with_jitter(0.5);
        let delays: Vec<Duration> = jittered.max_backoff_delays().collect();
        assert_eq!(delays, vec![Duration::from_millis(150)]);

        assert_eq!(RetryConfig::new(0, Duration::from_secs(1), 2.0).max_backoff_delays().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verdict_hint_extends_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let f = counting(&calls, |n| if n == 1 { Err("slow down".to_string()) } else { Ok(7) });
        let config = RetryConfig::new(2, Duration::from_millis(100), 2.0);
        let start = Instant::now();

        let result = execute_with_retry_by(f, &config, "hinted", |_: &String| RetryVerdict::Retry {
            after: Some(Duration::from_secs(5)),
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_millis(5010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_verdict_overrides_message() {
        let calls = Arc::new(AtomicU32::new(0));
        let f = counting(&calls, |_| Err("503 Service Unavailable".to_string()));

        let err = execute_with_retry_by(f, &RetryConfig::default(), "forced", |_: &String| {
            RetryVerdict::Fatal
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.retryable);
        assert_eq!(err.to_string(), "forced failed after 1 attempt: 503 Service Unavailable");
    }
}
