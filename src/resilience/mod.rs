//! Resilience primitives for calls to unreliable dependencies.
//!
//! - `classifier`: transient vs fatal error classification
//! - `retry`: bounded retry with exponential backoff
//! - `breaker`: per-dependency circuit breakers and their registry
//!
//! Breaker and retry compose in either order. With the breaker outside,
//! a whole retry sequence counts as one breaker call:
//!
//! ```ignore
//! let breaker = registry.get("github").await;
//! breaker
//!     .execute(|| execute_with_retry(|| client.list_repos(), &retry, "list repos"))
//!     .await?;
//! ```
//!
//! With retry outside, the open signal is classified as fatal and ends the
//! retry loop immediately.

pub mod breaker;
pub mod classifier;
pub mod retry;

pub use breaker::{
    BreakerConfig, BreakerError, BreakerRegistry, BreakerStatus, CircuitBreaker, CircuitState,
};
pub use classifier::is_retryable_error;
pub use retry::{
    classify_by_message, execute_with_retry, execute_with_retry_by, RetryConfig, RetryError,
    RetryVerdict,
};
