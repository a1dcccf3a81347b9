//! Semantic complexity classifier backed by an LLM.
//!
//! Calls go through a dedicated circuit breaker with retries inside it, so
//! a flapping provider costs one breaker failure per exhausted call rather
//! than one per attempt. Every attempt has its own deadline inside the
//! breaker, so a hanging provider is recorded as a failure instead of being
//! cancelled from outside.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::resilience::{
    classify_by_message, execute_with_retry_by, BreakerError, CircuitBreaker, RetryConfig,
    RetryVerdict,
};
use crate::task::{ComplexityAnalysis, ComplexityLevel, ComplexityRefiner, RefineError};

/// Breaker name used for the classifier dependency.
pub const CLASSIFIER_BREAKER: &str = "semantic_classifier";

/// Default classifier model.
pub const DEFAULT_CLASSIFIER_MODEL: &str = "openai/gpt-4o-mini";

/// Default deadline for a single classifier request.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Headroom added to [`LlmComplexityRefiner::deadline`].
const DEADLINE_SLACK: Duration = Duration::from_millis(500);

/// Refines heuristic estimates by asking an LLM.
pub struct LlmComplexityRefiner {
    llm: Arc<dyn LlmClient>,
    model: String,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    attempt_timeout: Duration,
}

impl LlmComplexityRefiner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            breaker,
            retry,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Give up on a single request after `timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Longest a [`refine`](ComplexityRefiner::refine) call can take: every
    /// attempt timing out, plus the longest wait before each retry.
    ///
    /// Use it as the analyzer timeout so the outer deadline never cuts a
    /// call short before the breaker has recorded its outcome.
    pub fn deadline(&self) -> Duration {
        let mut total = self
            .attempt_timeout
            .saturating_mul(self.retry.max_attempts())
            .saturating_add(DEADLINE_SLACK);
        for wait in self.retry.max_backoff_delays() {
            if total == Duration::MAX {
                break;
            }
            // waits are stretched to a Retry-After hint of up to one attempt timeout
            total = total.saturating_add(wait.max(self.attempt_timeout));
        }
        total
    }

    /// Retry transient failures; a Retry-After longer than one attempt
    /// timeout ends the call instead of waiting it out.
    fn verdict(&self, error: &LlmError) -> RetryVerdict {
        match classify_by_message(error) {
            RetryVerdict::Fatal => RetryVerdict::Fatal,
            RetryVerdict::Retry { .. } => match error.retry_after {
                Some(wait) if wait > self.attempt_timeout => {
                    tracing::debug!(
                        retry_after_ms = wait.as_millis() as u64,
                        "Classifier asked to wait too long, giving up"
                    );
                    RetryVerdict::Fatal
                }
                after => RetryVerdict::Retry { after },
            },
        }
    }

    /// Build the classification prompt.
    ///
    /// The LLM should respond with JSON matching [`ComplexityAnalysis`].
    fn build_prompt(description: &str, heuristic: &ComplexityAnalysis) -> String {
        format!(
            r#"You are a task complexity analyzer for an automation agent. Estimate how many tool-calling iterations the following task needs.

Task: {description}

A keyword heuristic estimated {iterations} iterations ({complexity}). Correct it if the task is harder or easier than that.

Respond with a JSON object containing:
- "complexity": one of {bands}
- "estimatedIterations": integer estimate of iterations needed
- "requiresDecomposition": boolean, true for "complex" and "very_complex" tasks
- "reasoning": brief explanation
- "subtasks": if requiresDecomposition is true, an array of objects with "id", "description", "estimatedIterations", optional "dependencies" (array of ids), "priority" (integer, higher runs first) and "type" ("sequential" or "parallel")

Respond with ONLY the JSON object, no other text."#,
            iterations = heuristic.estimated_iterations,
            complexity = heuristic.complexity,
            bands = complexity_bands(),
        )
    }

    /// Parse the classifier's answer.
    ///
    /// Accepts bare JSON, JSON inside a markdown fence, or JSON surrounded
    /// by prose.
    fn parse_response(response: &str) -> Result<ComplexityAnalysis, RefineError> {
        let json = extract_json(response)
            .ok_or_else(|| RefineError::Malformed("no JSON object in response".to_string()))?;
        serde_json::from_str(json).map_err(|e| RefineError::Malformed(e.to_string()))
    }
}

/// `"simple" (1-5 iterations), "moderate" (6-15 iterations), ...`
fn complexity_bands() -> String {
    let mut lower = 1;
    ComplexityLevel::ALL
        .into_iter()
        .map(|level| match level.max_iterations() {
            Some(max) => {
                let band = format!("\"{}\" ({}-{} iterations)", level, lower, max);
                lower = max + 1;
                band
            }
            None => format!("\"{}\" ({}+ iterations)", level, lower),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Slice from the first `{` to the last `}`.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[async_trait]
impl ComplexityRefiner for LlmComplexityRefiner {
    async fn refine(
        &self,
        description: &str,
        heuristic: &ComplexityAnalysis,
    ) -> Result<ComplexityAnalysis, RefineError> {
        let messages = vec![
            ChatMessage::system("You classify task complexity. Answer with JSON only."),
            ChatMessage::user(Self::build_prompt(description, heuristic)),
        ];
        let messages = messages.as_slice();

        let attempt = move || async move {
            match tokio::time::timeout(
                self.attempt_timeout,
                self.llm.chat_completion(&self.model, messages),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::network_error(format!(
                    "Request timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            }
        };

        let response = self
            .breaker
            .execute(|| {
                execute_with_retry_by(
                    attempt,
                    &self.retry,
                    "complexity classification",
                    |e: &LlmError| self.verdict(e),
                )
            })
            .await
            .map_err(|e| match e {
                BreakerError::Open { .. } => RefineError::Unavailable(e.to_string()),
                BreakerError::Inner(inner) => RefineError::Unavailable(inner.to_string()),
            })?;

        let content = response
            .content
            .ok_or_else(|| RefineError::Malformed("empty response".to_string()))?;
        Self::parse_response(&content)
    }
}
