//! Dependency-ordered batching of subtasks.

use std::collections::HashSet;

use serde::Serialize;

use super::subtask::Subtask;

/// Subtasks grouped into batches that can run concurrently.
///
/// Every dependency of a subtask in batch `k` is in an earlier batch, except
/// in the final batch when `cycle_detected` is set: that batch holds every
/// subtask that could not be ordered, and its order is undefined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionOrder {
    pub batches: Vec<Vec<Subtask>>,
    pub cycle_detected: bool,
}

impl ExecutionOrder {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Batch ids, for logging.
    pub fn ids(&self) -> Vec<Vec<&str>> {
        self.batches
            .iter()
            .map(|batch| batch.iter().map(|s| s.id.as_str()).collect())
            .collect()
    }
}

/// Order subtasks into dependency-respecting batches.
///
/// Each round selects the unscheduled subtasks whose dependencies are all
/// scheduled and sorts them by descending priority (ties keep input order).
/// If a round selects nothing, the remaining subtasks are emitted as one
/// final batch and scheduling stops.
pub fn get_execution_order(subtasks: &[Subtask]) -> ExecutionOrder {
    let mut scheduled: HashSet<&str> = HashSet::with_capacity(subtasks.len());
    let mut remaining: Vec<&Subtask> = subtasks.iter().collect();
    let mut order = ExecutionOrder::default();

    while !remaining.is_empty() {
        let (mut ready, blocked): (Vec<&Subtask>, Vec<&Subtask>) = remaining
            .into_iter()
            .partition(|s| s.dependencies.iter().all(|d| scheduled.contains(d.as_str())));

        if ready.is_empty() {
            tracing::warn!(
                remaining = blocked.len(),
                ids = ?blocked.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                "Unsatisfiable subtask dependencies, scheduling the rest as one batch"
            );
            order.batches.push(blocked.into_iter().cloned().collect());
            order.cycle_detected = true;
            break;
        }

        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        scheduled.extend(ready.iter().map(|s| s.id.as_str()));
        order.batches.push(ready.into_iter().cloned().collect());
        remaining = blocked;
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::auto_decompose;

    #[test]
    fn test_chain_runs_one_per_batch() {
        let plan = vec![
            Subtask::new("C", "third", 1).with_dependency("B"),
            Subtask::new("A", "first", 1),
            Subtask::new("B", "second", 1).with_dependency("A"),
        ];
        let order = get_execution_order(&plan);
        assert_eq!(order.ids(), vec![vec!["A"], vec!["B"], vec!["C"]]);
        assert!(!order.cycle_detected);
    }

    #[test]
    fn test_mutual_dependency_terminates() {
        let plan = vec![
            Subtask::new("A", "x", 1).with_dependency("B"),
            Subtask::new("B", "y", 1).with_dependency("A"),
        ];
        let order = get_execution_order(&plan);
        assert_eq!(order.len(), 1);
        assert_eq!(order.batches[0].len(), 2);
        assert!(order.cycle_detected);
    }

    #[test]
    fn test_cycle_after_valid_prefix() {
        let plan = vec![
            Subtask::new("root", "x", 1),
            Subtask::new("A", "y", 1).with_dependency("root").with_dependency("B"),
            Subtask::new("B", "z", 1).with_dependency("A"),
        ];
        let order = get_execution_order(&plan);
        assert_eq!(order.ids()[0], vec!["root"]);
        assert_eq!(order.len(), 2);
        assert_eq!(order.batches[1].len(), 2);
        assert!(order.cycle_detected);
    }

    #[test]
    fn test_batches_sorted_by_priority() {
        let plan = vec![
            Subtask::new("low", "x", 1).with_priority(1),
            Subtask::new("high", "y", 1).with_priority(9),
            Subtask::new("mid", "z", 1).with_priority(5),
            Subtask::new("mid2", "w", 1).with_priority(5),
        ];
        let order = get_execution_order(&plan);
        assert_eq!(order.ids(), vec![vec!["high", "mid", "mid2", "low"]]);
    }

    #[test]
    fn test_fan_out_plan() {
        let plan = auto_decompose("go through my 3 boards", 9);
        let order = get_execution_order(&plan);
        assert_eq!(order.len(), 2);
        assert_eq!(order.ids()[0], vec!["fetch_items"]);
        assert_eq!(order.batches[1].len(), 3);
    }

    #[test]
    fn test_empty_plan() {
        assert!(get_execution_order(&[]).is_empty());
    }
}
