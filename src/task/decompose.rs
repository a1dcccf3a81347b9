//! Pattern-based task decomposition.
//!
//! Rules, in priority order:
//! 1. "for each" / "go through" with a count N: fetch the items, then process
//!    up to [`MAX_ITEM_SUBTASKS`] of them in parallel
//! 2. "A and B and C": a sequential chain, one step per clause
//! 3. Anything else: equal sequential chunks of [`CHUNK_ITERATIONS`], at most
//!    [`MAX_CHUNKS`] of them

use std::sync::OnceLock;

use regex::Regex;

use super::complexity::{ComplexityAnalysis, ComplexityLevel};
use super::subtask::{Subtask, SubtaskType};

/// Upper bound on per-item subtasks for iteration phrasing.
pub const MAX_ITEM_SUBTASKS: u32 = 10;

/// Target iterations per chunk for the fallback rule.
pub const CHUNK_ITERATIONS: u32 = 15;

/// Upper bound on fallback chunks, whatever the estimate.
pub const MAX_CHUNKS: u32 = 32;

/// Iteration limit for a simple task.
pub const BASE_ITERATION_LIMIT: u32 = 15;

fn iteration_phrase() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:for each|go through)\b").unwrap())
}

fn conjunction() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\band\b").unwrap())
}

/// First integer in `text`, if any.
pub(crate) fn first_count(text: &str) -> Option<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\d+").unwrap());
    re.find(text).map(|m| m.as_str().parse().unwrap_or(u32::MAX))
}

/// Split a task into dependency-linked subtasks sharing `total_iterations`.
pub fn auto_decompose(description: &str, total_iterations: u32) -> Vec<Subtask> {
    let total = total_iterations.max(1);

    if iteration_phrase().is_match(description) {
        if let Some(count) = first_count(description).filter(|&n| n > 0) {
            return per_item_subtasks(description, total, count);
        }
    }

    let clauses: Vec<&str> = conjunction()
        .split(description)
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .collect();
    if clauses.len() >= 2 {
        return sequential_steps(&clauses, total);
    }

    chunked(description, total)
}

fn per_item_subtasks(description: &str, total: u32, count: u32) -> Vec<Subtask> {
    let per_item = total.div_ceil(count);
    let processed = count.min(MAX_ITEM_SUBTASKS);

    let mut subtasks = Vec::with_capacity(processed as usize + 1);
    subtasks.push(
        Subtask::new(
            "fetch_items",
            format!("Fetch the {} items to work through: {}", count, description),
            per_item,
        )
        .with_priority(10),
    );
    for i in 1..=processed {
        subtasks.push(
            Subtask::new(
                format!("process_item_{}", i),
                format!("Process item {} of {}: {}", i, count, description),
                per_item,
            )
            .with_dependency("fetch_items")
            .with_priority(5)
            .with_kind(SubtaskType::Parallel),
        );
    }
    subtasks
}

fn sequential_steps(clauses: &[&str], total: u32) -> Vec<Subtask> {
    let n = clauses.len();
    let per_step = total.div_ceil(n as u32);

    clauses
        .iter()
        .enumerate()
        .map(|(i, clause)| {
            let subtask = Subtask::new(format!("step_{}", i + 1), *clause, per_step)
                .with_priority((n - i) as i32);
            if i == 0 {
                subtask
            } else {
                subtask.with_dependency(format!("step_{}", i))
            }
        })
        .collect()
}

fn chunked(description: &str, total: u32) -> Vec<Subtask> {
    let chunks = total.div_ceil(CHUNK_ITERATIONS).clamp(1, MAX_CHUNKS);
    let per_chunk = total.div_ceil(chunks);

    (1..=chunks)
        .map(|i| {
            let subtask = Subtask::new(
                format!("chunk_{}", i),
                format!("Part {} of {}: {}", i, chunks, description),
                per_chunk,
            )
            .with_priority((chunks - i + 1) as i32);
            if i == 1 {
                subtask
            } else {
                subtask.with_dependency(format!("chunk_{}", i - 1))
            }
        })
        .collect()
}

/// Maximum iterations an agent may spend on the whole task.
pub fn calculate_iteration_limit(analysis: &ComplexityAnalysis) -> u32 {
    BASE_ITERATION_LIMIT
        + match analysis.complexity {
            ComplexityLevel::Simple => 0,
            ComplexityLevel::Moderate => 5,
            ComplexityLevel::Complex => 10,
            ComplexityLevel::VeryComplex => 15,
        }
}
