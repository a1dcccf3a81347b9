//! Task module - complexity analysis, decomposition and scheduling.
//!
//! A task is just its free-text description; everything here is derived from
//! it and owned by the caller:
//! - `complexity`: heuristic estimate, optionally refined
//! - `decompose`: subtask generation and iteration limits
//! - `schedule`: dependency-ordered batches

mod complexity;
mod decompose;
mod schedule;
mod subtask;

pub use complexity::{
    quick_complexity_check, ComplexityAnalysis, ComplexityAnalyzer, ComplexityLevel,
    ComplexityRefiner, RefineError, DEFAULT_REFINE_TIMEOUT,
};
pub use decompose::{
    auto_decompose, calculate_iteration_limit, BASE_ITERATION_LIMIT, CHUNK_ITERATIONS,
    MAX_CHUNKS, MAX_ITEM_SUBTASKS,
};
pub use schedule::{get_execution_order, ExecutionOrder};
pub use subtask::{validate_dependencies, Subtask, SubtaskPlanError, SubtaskType};
