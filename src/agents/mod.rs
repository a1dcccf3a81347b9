//! Agents module - task execution on top of the resilience layer.
//!
//! # Components
//! - **TaskPipeline**: analyzes a task, schedules its subtasks and runs each
//!   one through its dependency's circuit breaker with retries
//! - **LlmComplexityRefiner**: semantic classifier that corrects the keyword
//!   heuristic for non-simple tasks
//!
//! # Failure Handling
//! - Transient tool failures are retried with backoff
//! - Repeated failures open the dependency's breaker; later subtasks for
//!   that dependency fail fast
//! - Malformed tool payloads are reported as contract violations
//! - A classifier failure falls back to the heuristic estimate

mod pipeline;
mod refiner;
mod types;

pub use pipeline::{PipelineOptions, TaskPipeline, DEFAULT_MAX_CONCURRENCY, SINGLE_TASK_ID};
pub use refiner::{
    LlmComplexityRefiner, CLASSIFIER_BREAKER, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_CLASSIFIER_MODEL,
};
pub use types::{PipelineReport, RunId, SubtaskOutcome, SubtaskStatus};
