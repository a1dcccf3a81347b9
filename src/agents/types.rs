//! Core types for pipeline runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::ComplexityAnalysis;
use crate::tools::ToolResult;

/// Unique identifier for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new unique run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a subtask ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// The tool returned a valid, successful result (possibly compressed)
    Completed { result: ToolResult },

    /// The tool failed fatally or ran out of retries
    Failed { error: String, retryable: bool },

    /// The dependency's circuit was open; the tool was not called
    CircuitOpen { dependency: String, retry_in_ms: u64 },

    /// The tool answered with a payload that breaks the result contract
    ContractViolation {
        error: String,
        suggestion: Option<String>,
    },
}

/// Result of executing one subtask.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskOutcome {
    pub subtask_id: String,
    /// Dependency (breaker name) the subtask called
    pub dependency: String,
    /// Tool invocations made, including retries
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub status: SubtaskStatus,
}

impl SubtaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, SubtaskStatus::Completed { .. })
    }

    /// The result payload, if the subtask completed.
    pub fn result(&self) -> Option<&ToolResult> {
        match &self.status {
            SubtaskStatus::Completed { result } => Some(result),
            _ => None,
        }
    }
}

/// Aggregated output of one pipeline run.
///
/// # Invariants
/// - `batches[k]` finished completely before `batches[k + 1]` started
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub description: String,
    pub analysis: ComplexityAnalysis,
    /// Maximum iterations the agent may spend on the whole task
    pub iteration_limit: u32,
    /// Why the subtask plan is malformed, if it is
    pub plan_warning: Option<String>,
    /// The last batch was produced by the cycle fallback
    pub cycle_detected: bool,
    pub batches: Vec<Vec<SubtaskOutcome>>,
}

impl PipelineReport {
    /// All outcomes in execution order.
    pub fn outcomes(&self) -> impl Iterator<Item = &SubtaskOutcome> {
        self.batches.iter().flatten()
    }

    pub fn outcome(&self, subtask_id: &str) -> Option<&SubtaskOutcome> {
        self.outcomes().find(|o| o.subtask_id == subtask_id)
    }

    /// Whether every subtask completed.
    pub fn success(&self) -> bool {
        self.outcomes().all(SubtaskOutcome::is_success)
    }

    pub fn completed_count(&self) -> usize {
        self.outcomes().filter(|o| o.is_success()).count()
    }
}
