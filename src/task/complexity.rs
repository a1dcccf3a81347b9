//! Task complexity estimation.
//!
//! Two strategies behind one entry point:
//! - [`quick_complexity_check`]: deterministic keyword heuristic, always available
//! - [`ComplexityRefiner`]: optional semantic classifier (usually an LLM)
//!   consulted for non-simple tasks
//!
//! [`ComplexityAnalyzer::analyze_task`] never fails: any refiner problem
//! degrades to the heuristic result.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::decompose::{auto_decompose, first_count};
use super::subtask::Subtask;

/// Default time budget for a refiner call.
pub const DEFAULT_REFINE_TIMEOUT: Duration = Duration::from_secs(15);

/// Complexity bands by estimated iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    /// ≤ 5 iterations
    Simple,
    /// ≤ 15 iterations
    Moderate,
    /// ≤ 40 iterations
    Complex,
    /// > 40 iterations
    VeryComplex,
}

impl ComplexityLevel {
    /// All levels, least complex first.
    pub const ALL: [Self; 4] = [Self::Simple, Self::Moderate, Self::Complex, Self::VeryComplex];

    /// Largest iteration estimate in this band (`None` = unbounded).
    pub fn max_iterations(self) -> Option<u32> {
        match self {
            Self::Simple => Some(5),
            Self::Moderate => Some(15),
            Self::Complex => Some(40),
            Self::VeryComplex => None,
        }
    }

    pub fn from_iterations(iterations: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|level| level.max_iterations().map_or(true, |max| iterations <= max))
            .unwrap_or(Self::VeryComplex)
    }

    pub fn requires_decomposition(self) -> bool {
        matches!(self, Self::Complex | Self::VeryComplex)
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Complex => write!(f, "complex"),
            Self::VeryComplex => write!(f, "very_complex"),
        }
    }
}

/// Complexity estimate for one task description.
///
/// Field names match the JSON contract of the semantic classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAnalysis {
    pub complexity: ComplexityLevel,
    pub estimated_iterations: u32,
    pub requires_decomposition: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

impl ComplexityAnalysis {
    /// A simple, undecomposed estimate.
    pub fn simple(reasoning: impl Into<String>) -> Self {
        Self {
            complexity: ComplexityLevel::Simple,
            estimated_iterations: 5,
            requires_decomposition: false,
            reasoning: reasoning.into(),
            subtasks: Vec::new(),
        }
    }
}

fn keyword_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

fn count_matches(cell: &'static OnceLock<Regex>, pattern: &str, text: &str) -> u32 {
    keyword_regex(cell, pattern).find_iter(text).count() as u32
}

/// Score a task description with keyword heuristics.
///
/// `iterations = max(5, items × actions × iteration_factor × analysis_factor + api_bonus)`
/// where `items` is the first number in the text (default 1), `actions`
/// counts action words and conjunctions (minimum 1), `api_bonus` is 2 per
/// API/tool keyword, `iteration_factor` is 2 for each/all/every and
/// `analysis_factor` is 3 when the task asks to analyze.
pub fn quick_complexity_check(description: &str) -> ComplexityAnalysis {
    static ACTIONS: OnceLock<Regex> = OnceLock::new();
    static APIS: OnceLock<Regex> = OnceLock::new();
    static ITERATION: OnceLock<Regex> = OnceLock::new();

    let text = description.to_lowercase();

    let items = first_count(&text).unwrap_or(1).max(1) as u64;
    let actions = count_matches(
        &ACTIONS,
        r"\b(?:and|then|create|analyze|fetch|update|delete)\b",
        &text,
    )
    .max(1) as u64;
    let api_bonus = count_matches(&APIS, r"\b(?:trello|github|gcloud|api)\b", &text) as u64 * 2;
    let iteration_factor: u64 = if keyword_regex(&ITERATION, r"\b(?:each|all|every)\b").is_match(&text)
    {
        2
    } else {
        1
    };
    let analysis_factor: u64 = if text.contains("analyze") { 3 } else { 1 };

    let score = items
        .saturating_mul(actions)
        .saturating_mul(iteration_factor)
        .saturating_mul(analysis_factor)
        .saturating_add(api_bonus);
    let estimated_iterations = score.max(5).min(u32::MAX as u64) as u32;

    let complexity = ComplexityLevel::from_iterations(estimated_iterations);
    let requires_decomposition = complexity.requires_decomposition();
    let subtasks = if requires_decomposition {
        auto_decompose(description, estimated_iterations)
    } else {
        Vec::new()
    };

    ComplexityAnalysis {
        complexity,
        estimated_iterations,
        requires_decomposition,
        reasoning: format!(
            "Heuristic: {} item(s) x {} action(s) x {} (iteration) x {} (analysis) + {} (API) = {} iterations",
            items, actions, iteration_factor, analysis_factor, api_bonus, estimated_iterations
        ),
        subtasks,
    }
}

/// Why a refiner could not produce an estimate.
#[derive(Debug, thiserror::Error)]
pub enum RefineError {
    #[error("Refiner unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed refiner output: {0}")]
    Malformed(String),

    #[error("Refiner timed out after {0:?}")]
    Timeout(Duration),
}

/// Secondary estimator consulted for non-simple tasks.
#[async_trait]
pub trait ComplexityRefiner: Send + Sync {
    /// Produce a refined estimate; `heuristic` is the primary result.
    async fn refine(
        &self,
        description: &str,
        heuristic: &ComplexityAnalysis,
    ) -> Result<ComplexityAnalysis, RefineError>;
}

/// Heuristic-first complexity analyzer with an optional refiner.
#[derive(Clone)]
pub struct ComplexityAnalyzer {
    refiner: Option<Arc<dyn ComplexityRefiner>>,
    timeout: Duration,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::heuristic()
    }
}

impl fmt::Debug for ComplexityAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexityAnalyzer")
            .field("refiner", &self.refiner.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ComplexityAnalyzer {
    /// Analyzer that only uses the heuristic.
    pub fn heuristic() -> Self {
        Self {
            refiner: None,
            timeout: DEFAULT_REFINE_TIMEOUT,
        }
    }

    /// Analyzer that refines non-simple estimates with `refiner`.
    pub fn with_refiner(refiner: Arc<dyn ComplexityRefiner>, timeout: Duration) -> Self {
        Self {
            refiner: Some(refiner),
            timeout,
        }
    }

    pub fn has_refiner(&self) -> bool {
        self.refiner.is_some()
    }

    /// Estimate complexity. Never fails.
    pub async fn analyze_task(&self, description: &str) -> ComplexityAnalysis {
        let heuristic = quick_complexity_check(description);
        if heuristic.complexity == ComplexityLevel::Simple {
            return heuristic;
        }
        let Some(refiner) = &self.refiner else {
            return heuristic;
        };

        let refined = match tokio::time::timeout(self.timeout, refiner.refine(description, &heuristic)).await {
            Ok(result) => result,
            Err(_) => Err(RefineError::Timeout(self.timeout)),
        };

        match refined {
            Ok(analysis) => {
                let analysis = normalize(description, analysis);
                tracing::debug!(
                    heuristic = %heuristic.complexity,
                    refined = %analysis.complexity,
                    iterations = analysis.estimated_iterations,
                    "Refined complexity estimate"
                );
                analysis
            }
            Err(e) => {
                tracing::debug!(error = %e, "Complexity refiner failed, using heuristic");
                heuristic
            }
        }
    }
}

/// Make a refined estimate internally consistent.
///
/// The level decides decomposition: complex and very complex tasks always
/// get subtasks, simpler ones never do.
fn normalize(description: &str, mut analysis: ComplexityAnalysis) -> ComplexityAnalysis {
    analysis.estimated_iterations = analysis.estimated_iterations.max(1);
    analysis.requires_decomposition = analysis.complexity.requires_decomposition();
    if !analysis.requires_decomposition {
        analysis.subtasks.clear();
    } else if analysis.subtasks.is_empty() {
        analysis.subtasks = auto_decompose(description, analysis.estimated_iterations);
    }
    if analysis.reasoning.trim().is_empty() {
        analysis.reasoning = "Semantic classifier estimate".to_string();
    }
    analysis
}
