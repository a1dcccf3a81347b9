//! Per-dependency circuit breakers.
//!
//! A breaker wraps calls to one external dependency and stops calling it
//! after repeated failures, probing for recovery once a cooldown elapses:
//!
//! ```text
//!   CLOSED ──failures ≥ threshold──▶ OPEN ──cooldown elapsed──▶ HALF_OPEN
//!     ▲                               ▲                            │
//!     │                               └──────any failure───────────┤
//!     └──────────────successes ≥ success_threshold─────────────────┘
//! ```
//!
//! Breakers are owned by a [`BreakerRegistry`] keyed by dependency name, so
//! every component talking to the same dependency shares one breaker.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration & State
// ─────────────────────────────────────────────────────────────────────────────

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
    /// Trial calls test whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Thresholds and cooldowns for a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures while closed before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,
    /// Cooldown between opening and the first trial call.
    pub timeout: Duration,
    /// Reserved for failure-count decay; not consulted by transitions.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_millis(30_000),
            reset_timeout: Duration::from_millis(60_000),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    consecutive_successes: u32,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    /// Monotonic deadline used for transitions.
    next_retry: Instant,
    /// Wall-clock mirror of `next_retry` for status reporting.
    next_retry_time: Option<DateTime<Utc>>,
    /// Start of the half-open trial currently in flight.
    trial_started: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            consecutive_successes: 0,
            last_failure: None,
            last_success: None,
            next_retry: Instant::now(),
            next_retry_time: None,
            trial_started: None,
        }
    }

    fn zero_counters(&mut self) {
        self.failures = 0;
        self.successes = 0;
        self.consecutive_successes = 0;
        self.trial_started = None;
    }
}

/// Serializable snapshot of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub consecutive_successes: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// When the next trial call is allowed (only while open).
    pub next_retry_time: Option<DateTime<Utc>>,
    /// Milliseconds until the next trial call (only while open).
    pub retry_in_ms: Option<u64>,
}

/// Failure of a call made through a breaker.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker refused to call the dependency.
    #[error("Circuit breaker '{name}' is open; retry in {}ms", .retry_in.as_millis())]
    Open {
        name: String,
        retry_at: Instant,
        retry_in: Duration,
    },

    /// The dependency was called and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The underlying failure, if the dependency was actually called.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

// ─────────────────────────────────────────────────────────────────────────────
// Circuit Breaker
// ─────────────────────────────────────────────────────────────────────────────

/// Failure-isolation guard for a single dependency.
///
/// All counter updates go through one mutex; the lock is never held while the
/// protected call is running.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Call `f` through the breaker.
    ///
    /// # Errors
    /// - `BreakerError::Open` if the circuit is open (f is not called)
    /// - `BreakerError::Inner` with f's own error otherwise
    pub async fn execute<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admission = self.admit::<E>().await?;

        match f().await {
            Ok(value) => {
                self.record_success(admission).await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(admission, &error.to_string()).await;
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// Like [`execute`](Self::execute), but substitutes `fallback` when the
    /// circuit is open. Underlying failures still propagate.
    pub async fn execute_with_fallback<T, E, F, Fut>(&self, f: F, fallback: T) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_with_fallback_fn(f, move || fallback).await
    }

    /// Like [`execute_with_fallback`](Self::execute_with_fallback), producing
    /// the fallback lazily.
    pub async fn execute_with_fallback_fn<T, E, F, Fut, P>(&self, f: F, fallback: P) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: FnOnce() -> T,
    {
        match self.execute(f).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Open { retry_in, .. }) => {
                tracing::debug!(
                    breaker = %self.name,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Circuit open, using fallback"
                );
                Ok(fallback())
            }
            Err(BreakerError::Inner(error)) => Err(error),
        }
    }

    /// Read-only snapshot of the breaker.
    pub async fn status(&self) -> BreakerStatus {
        let st = self.state.lock().await;
        let open = st.state == CircuitState::Open;
        BreakerStatus {
            name: self.name.clone(),
            state: st.state,
            failures: st.failures,
            successes: st.successes,
            consecutive_successes: st.consecutive_successes,
            last_failure: st.last_failure,
            last_success: st.last_success,
            next_retry_time: if open { st.next_retry_time } else { None },
            retry_in_ms: if open {
                Some(
                    st.next_retry
                        .saturating_duration_since(Instant::now())
                        .as_millis() as u64,
                )
            } else {
                None
            },
        }
    }

    /// Current state (without forcing an OPEN → HALF_OPEN transition).
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Force the breaker closed and clear all counters.
    pub async fn reset(&self) {
        let mut st = self.state.lock().await;
        *st = BreakerState::new();
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Whether the breaker is not OPEN, or OPEN past its retry time.
    ///
    /// A HALF_OPEN breaker reports available even while its single trial is
    /// in flight; [`execute`](Self::execute) still rejects concurrent calls.
    pub async fn is_available(&self) -> bool {
        let st = self.state.lock().await;
        match st.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => Instant::now() >= st.next_retry,
        }
    }

    async fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut st = self.state.lock().await;
        let now = Instant::now();

        match st.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open if now < st.next_retry => Err(BreakerError::Open {
                name: self.name.clone(),
                retry_at: st.next_retry,
                retry_in: st.next_retry - now,
            }),
            CircuitState::Open => {
                st.state = CircuitState::HalfOpen;
                st.consecutive_successes = 0;
                st.trial_started = Some(now);
                tracing::info!(breaker = %self.name, "Circuit half-open, sending trial call");
                Ok(Admission::Trial)
            }
            CircuitState::HalfOpen => match st.trial_started {
                // A trial older than the cooldown was abandoned (its future was dropped).
                Some(started) if now < started + self.config.timeout => Err(BreakerError::Open {
                    name: self.name.clone(),
                    retry_at: now,
                    retry_in: Duration::ZERO,
                }),
                _ => {
                    st.trial_started = Some(now);
                    Ok(Admission::Trial)
                }
            },
        }
    }

    async fn record_success(&self, admission: Admission) {
        let mut st = self.state.lock().await;
        st.successes = st.successes.saturating_add(1);
        st.consecutive_successes = st.consecutive_successes.saturating_add(1);
        st.last_success = Some(Utc::now());
        if admission == Admission::Trial {
            st.trial_started = None;
        }

        if st.state == CircuitState::HalfOpen
            && st.consecutive_successes >= self.config.success_threshold
        {
            st.state = CircuitState::Closed;
            st.zero_counters();
            st.next_retry_time = None;
            tracing::info!(breaker = %self.name, "Circuit closed, dependency recovered");
        }
    }

    async fn record_failure(&self, admission: Admission, error: &str) {
        let mut st = self.state.lock().await;
        st.failures = st.failures.saturating_add(1);
        st.consecutive_successes = 0;
        st.last_failure = Some(Utc::now());
        if admission == Admission::Trial {
            st.trial_started = None;
        }

        let should_open = match st.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => st.failures >= self.config.failure_threshold,
            // A call admitted before the circuit opened; the cooldown stands.
            CircuitState::Open => false,
        };

        if should_open {
            let previous = st.state;
            st.state = CircuitState::Open;
            st.trial_started = None;
            st.next_retry = Instant::now() + self.config.timeout;
            st.next_retry_time = chrono::Duration::from_std(self.config.timeout)
                .ok()
                .map(|cooldown| Utc::now() + cooldown);
            tracing::warn!(
                breaker = %self.name,
                from = %previous,
                failures = st.failures,
                cooldown_ms = self.config.timeout.as_millis() as u64,
                error,
                "Circuit opened"
            );
        } else {
            tracing::debug!(
                breaker = %self.name,
                failures = st.failures,
                threshold = self.config.failure_threshold,
                error,
                "Recorded failure"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Breakers keyed by dependency name.
///
/// Cheap to clone; clones share the same breakers. Repeated lookups of a name
/// return the same instance.
#[derive(Debug, Clone, Default)]
pub struct BreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    defaults: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose newly created breakers use `defaults`.
    pub fn with_defaults(defaults: BreakerConfig) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            defaults,
        }
    }

    pub fn defaults(&self) -> &BreakerConfig {
        &self.defaults
    }

    /// Breaker for `name`, created with the registry defaults if missing.
    pub async fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with_config(name, self.defaults.clone()).await
    }

    /// Breaker for `name`, created with `config` if missing.
    ///
    /// An existing breaker keeps the config it was created with.
    pub async fn get_with_config(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().await;
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(breaker = %name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(name, config))
        }))
    }

    /// Snapshots of every breaker, sorted by name.
    pub async fn statuses(&self) -> Vec<BreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            statuses.push(breaker.status().await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Force every breaker closed.
    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> BreakerError<String> {
        breaker
            .execute(|| async { Err::<(), _>("boom".to_string()) })
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<String>> {
        breaker.execute(|| async { Ok::<_, String>(7) }).await
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..breaker.config().failure_threshold {
            fail(breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new("trello", config());
        trip(&breaker).await;

        let calls = AtomicU32::new(0);
        let err = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err {
            BreakerError::Open { retry_in, .. } => assert_eq!(retry_in, Duration::from_secs(30)),
            BreakerError::Inner(_) => panic!("expected open signal"),
        }
        assert!(!breaker.is_available().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout() {
        let breaker = CircuitBreaker::new("github", config());
        trip(&breaker).await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(fail(&breaker).await.is_open());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.is_available().await);

        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(1)
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // One success is below the success threshold
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_deadline() {
        let breaker = CircuitBreaker::new("gcloud", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(45)).await;

        let err = fail(&breaker).await;
        assert!(!err.is_open());
        assert_eq!(breaker.state().await, CircuitState::Open);

        let status = breaker.status().await;
        assert_eq!(status.retry_in_ms, Some(30_000));
        assert!(status.next_retry_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_successes_close_and_zero_counters() {
        let breaker = CircuitBreaker::new("api", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();

        let status = breaker.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures, 0);
        assert_eq!(status.successes, 0);
        assert_eq!(status.consecutive_successes, 0);
        assert!(status.last_success.is_some());
        assert!(status.next_retry_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_accumulate_across_isolated_successes() {
        let breaker = CircuitBreaker::new("accumulating", config());
        fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();

        let status = breaker.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures, 2);
        assert_eq!(status.consecutive_successes, 2);

        // Third failure overall trips the breaker even though successes intervened
        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_only_swallows_open_signal() {
        let breaker = CircuitBreaker::new("fallback", config());

        let err = breaker
            .execute_with_fallback(|| async { Err::<u32, _>("bad request".to_string()) }, 0)
            .await
            .unwrap_err();
        assert_eq!(err, "bad request");

        trip(&breaker).await;
        let value = breaker
            .execute_with_fallback(|| async { Ok::<u32, String>(1) }, 99)
            .await
            .unwrap();
        assert_eq!(value, 99);

        let produced = breaker
            .execute_with_fallback_fn(|| async { Ok::<u32, String>(1) }, || 100)
            .await
            .unwrap();
        assert_eq!(produced, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_trial_at_a_time() {
        let breaker = Arc::new(CircuitBreaker::new("single_trial", config()));
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        let _ = rx.await;
                        Ok::<_, String>(())
                    })
                    .await
            })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        // available, although execute turns the concurrent call away
        assert!(breaker.is_available().await);

        let concurrent = succeed(&breaker).await.unwrap_err();
        assert!(concurrent.is_open());

        tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forces_closed() {
        let breaker = CircuitBreaker::new("reset", config());
        trip(&breaker).await;

        breaker.reset().await;

        let status = breaker.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures, 0);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test]
    async fn test_registry_returns_same_instance() {
        let registry = BreakerRegistry::with_defaults(config());
        let a = registry.get("trello").await;
        let b = registry.get("trello").await;
        let other = registry.get("github").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));

        let names: Vec<String> = registry.statuses().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["github".to_string(), "trello".to_string()]);
    }

    #[tokio::test]
    async fn test_registry_clones_share_breakers() {
        let registry = BreakerRegistry::with_defaults(config());
        let clone = registry.clone();
        trip(&*registry.get("shared").await).await;

        assert_eq!(clone.get("shared").await.state().await, CircuitState::Open);
        clone.reset_all().await;
        assert_eq!(registry.get("shared").await.state().await, CircuitState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_counted_exactly() {
        let registry = BreakerRegistry::with_defaults(BreakerConfig {
            failure_threshold: 1_000,
            ..BreakerConfig::default()
        });

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let breaker = registry.get("concurrent").await;
                    let _ = breaker
                        .execute(|| async { Err::<(), _>("network error".to_string()) })
                        .await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let status = registry.get("concurrent").await.status().await;
        assert_eq!(status.failures, 50);
        assert_eq!(status.state, CircuitState::Closed);
    }
}
