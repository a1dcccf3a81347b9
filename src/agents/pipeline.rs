//! Task pipeline: analyze, decompose, schedule, then run every subtask
//! through its dependency's circuit breaker with retries.
//!
//! ```text
//! description ─► ComplexityAnalyzer ─► subtasks ─► get_execution_order
//!                                                        │
//!           ┌────────────────────────────────────────────┘
//!           ▼
//!   batch 1 (concurrent) ─► barrier ─► batch 2 ─► ... ─► PipelineReport
//!
//!   per subtask: breaker.execute(retry(invoke ─► validate ─► parse))
//! ```
//!
//! Breaker bookkeeping per subtask:
//! - success: the tool answered with a valid `success: true` result
//! - failure: the tool errored, answered `success: false`, or broke the
//!   result contract
//!
//! Contract violations are never retried; transient failures are, waiting
//! at least as long as the tool's own "retry after" hint.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use super::types::{PipelineReport, RunId, SubtaskOutcome, SubtaskStatus};
use crate::resilience::{
    classify_by_message, execute_with_retry_by, BreakerError, BreakerRegistry, RetryConfig,
    RetryVerdict,
};
use crate::task::{
    calculate_iteration_limit, get_execution_order, validate_dependencies, ComplexityAnalysis,
    ComplexityAnalyzer, Subtask,
};
use crate::tools::{
    compress_result, get_retry_after, validate_tool_result, ToolInvoker, ToolResult,
    ToolValidation, DEFAULT_MAX_LENGTH,
};

/// Default number of subtasks running at once within a batch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Id of the single subtask a simple task runs as.
pub const SINGLE_TASK_ID: &str = "task";

/// Tuning for [`TaskPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Retry policy applied to every tool call
    pub retry: RetryConfig,
    /// Serialized-size budget for result payloads
    pub max_result_length: usize,
    /// Subtasks running at once within a batch (minimum 1)
    pub max_concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_result_length: DEFAULT_MAX_LENGTH,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Why one tool attempt failed.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    /// The invocation itself failed
    #[error("{0}")]
    Invoke(anyhow::Error),

    /// The tool answered `success: false`
    #[error("{message}")]
    Failed {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The payload breaks the result contract
    #[error("{}", .0.error.as_deref().unwrap_or("tool result violates the result contract"))]
    Violation(ToolValidation),
}

impl AttemptError {
    fn verdict(&self) -> RetryVerdict {
        match self {
            Self::Violation(_) => RetryVerdict::Fatal,
            Self::Invoke(e) => classify_by_message(e),
            Self::Failed { retry_after, .. } => match classify_by_message(self) {
                RetryVerdict::Retry { .. } => RetryVerdict::Retry {
                    after: *retry_after,
                },
                RetryVerdict::Fatal => RetryVerdict::Fatal,
            },
        }
    }
}

/// Runs task descriptions end to end against a [`ToolInvoker`].
pub struct TaskPipeline {
    analyzer: ComplexityAnalyzer,
    breakers: BreakerRegistry,
    invoker: Arc<dyn ToolInvoker>,
    options: PipelineOptions,
}

impl TaskPipeline {
    pub fn new(
        analyzer: ComplexityAnalyzer,
        breakers: BreakerRegistry,
        invoker: Arc<dyn ToolInvoker>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            analyzer,
            breakers,
            invoker,
            options,
        }
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Analyze `description` and execute its plan.
    ///
    /// Never fails as a whole: every subtask ends in a [`SubtaskStatus`], and
    /// a failed subtask does not stop later batches.
    pub async fn run(&self, description: &str) -> PipelineReport {
        let run_id = RunId::new();
        let analysis = self.analyzer.analyze_task(description).await;
        let iteration_limit = calculate_iteration_limit(&analysis);
        let subtasks = plan(description, &analysis);

        tracing::info!(
            run_id = %run_id,
            complexity = %analysis.complexity,
            estimated_iterations = analysis.estimated_iterations,
            iteration_limit,
            subtasks = subtasks.len(),
            "Starting task"
        );

        let plan_warning = match validate_dependencies(&subtasks) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "Subtask plan is inconsistent");
                Some(e.to_string())
            }
        };

        let order = get_execution_order(&subtasks);
        let concurrency = self.options.max_concurrency.max(1);
        let mut batches = Vec::with_capacity(order.len());

        for (index, batch) in order.batches.iter().enumerate() {
            tracing::debug!(
                run_id = %run_id,
                batch = index + 1,
                of = order.len(),
                size = batch.len(),
                "Running batch"
            );
            let outcomes: Vec<SubtaskOutcome> = stream::iter(batch.iter().map(|s| self.run_subtask(s)))
                .buffered(concurrency)
                .collect()
                .await;
            batches.push(outcomes);
        }

        let report = PipelineReport {
            run_id,
            description: description.to_string(),
            analysis,
            iteration_limit,
            plan_warning,
            cycle_detected: order.cycle_detected,
            batches,
        };

        tracing::info!(
            run_id = %run_id,
            completed = report.completed_count(),
            total = report.outcomes().count(),
            "Task finished"
        );
        report
    }

    async fn run_subtask(&self, subtask: &Subtask) -> SubtaskOutcome {
        let dependency = self.invoker.dependency(subtask);
        let breaker = self.breakers.get(&dependency).await;
        let context = format!("subtask {}", subtask.id);
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result = breaker
            .execute(|| {
                execute_with_retry_by(
                    || self.attempt(subtask, &dependency, &attempts),
                    &self.options.retry,
                    &context,
                    AttemptError::verdict,
                )
            })
            .await;

        let status = match result {
            Ok(result) => SubtaskStatus::Completed {
                result: compress_result(result, self.options.max_result_length),
            },
            Err(BreakerError::Open { retry_in, .. }) => SubtaskStatus::CircuitOpen {
                dependency: dependency.clone(),
                retry_in_ms: retry_in.as_millis() as u64,
            },
            Err(BreakerError::Inner(e)) => {
                let error = e.to_string();
                match e.source {
                    AttemptError::Violation(validation) => {
                        tracing::warn!(
                            subtask = %subtask.id,
                            dependency = %dependency,
                            error = validation.error.as_deref().unwrap_or_default(),
                            "Tool result violates contract"
                        );
                        SubtaskStatus::ContractViolation {
                            error: validation.error.unwrap_or_default(),
                            suggestion: validation.suggestion,
                        }
                    }
                    AttemptError::Invoke(_) | AttemptError::Failed { .. } => SubtaskStatus::Failed {
                        retryable: e.retryable,
                        error,
                    },
                }
            }
        };

        SubtaskOutcome {
            subtask_id: subtask.id.clone(),
            dependency,
            attempts: attempts.load(Ordering::SeqCst),
            duration_ms: started.elapsed().as_millis() as u64,
            status,
        }
    }

    /// One tool call. A `success: false` result becomes an error so the
    /// classifier and the breaker both see its text.
    async fn attempt(
        &self,
        subtask: &Subtask,
        tool: &str,
        attempts: &AtomicU32,
    ) -> Result<ToolResult, AttemptError> {
        attempts.fetch_add(1, Ordering::SeqCst);
        let raw = self.invoker.invoke(subtask).await.map_err(AttemptError::Invoke)?;

        let validation = validate_tool_result(&raw, tool);
        if !validation.valid {
            return Err(AttemptError::Violation(validation));
        }

        let result = match ToolResult::from_value(raw) {
            Ok(result) => result,
            Err(e) => {
                return Err(AttemptError::Violation(ToolValidation {
                    valid: false,
                    error: Some(format!("{} returned an unreadable result: {}", tool, e)),
                    suggestion: Some(
                        "stdout and stderr must be strings when present".to_string(),
                    ),
                }))
            }
        };

        if !result.success {
            let retry_after = get_retry_after(&result);
            if let Some(wait) = retry_after {
                tracing::debug!(
                    subtask = %subtask.id,
                    retry_after_ms = wait.as_millis() as u64,
                    "Tool asked to retry later"
                );
            }
            return Err(AttemptError::Failed {
                message: result.failure_text(),
                retry_after,
            });
        }

        Ok(result)
    }
}

/// Subtasks to run: the decomposition, or the whole task as one subtask.
fn plan(description: &str, analysis: &ComplexityAnalysis) -> Vec<Subtask> {
    if analysis.requires_decomposition && !analysis.subtasks.is_empty() {
        analysis.subtasks.clone()
    } else {
        vec![Subtask::new(
            SINGLE_TASK_ID,
            description,
            analysis.estimated_iterations,
        )]
    }
}
