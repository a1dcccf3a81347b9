//! Subtask definitions and dependency checks.
//!
//! A complex task is decomposed into subtasks. Each subtask has:
//! - A description of what to do
//! - An iteration budget
//! - Dependencies on sibling subtasks (by id)
//! - A priority used to order subtasks within a batch

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// How a subtask relates to its siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskType {
    /// Runs after the previous step
    #[default]
    Sequential,
    /// Independent of its siblings at the same level
    Parallel,
}

/// A unit of work produced by decomposition.
///
/// # Invariants
/// - `id` is unique within one decomposition
/// - `dependencies` reference sibling ids only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,

    pub description: String,

    #[serde(default)]
    pub estimated_iterations: u32,

    /// Ids of subtasks that must complete first
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    /// Higher runs earlier within a batch
    #[serde(default)]
    pub priority: i32,

    #[serde(rename = "type", default)]
    pub kind: SubtaskType,
}

impl Subtask {
    /// Create a sequential subtask with no dependencies.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        estimated_iterations: u32,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            estimated_iterations,
            dependencies: BTreeSet::new(),
            priority: 0,
            kind: SubtaskType::Sequential,
        }
    }

    /// Add a dependency on another subtask.
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: SubtaskType) -> Self {
        self.kind = kind;
        self
    }
}

/// Problems in a set of sibling subtasks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubtaskPlanError {
    #[error("Subtask id '{0}' is used more than once")]
    DuplicateId(String),

    #[error("Subtask '{subtask}' depends on unknown subtask '{dependency}'")]
    UnknownDependency { subtask: String, dependency: String },

    #[error("Subtask '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Circular dependency among subtasks: {}", .0.join(", "))]
    CircularDependency(Vec<String>),
}

/// Check that sibling dependencies form a well-formed DAG.
///
/// The scheduler tolerates malformed plans; this reports why a plan is
/// malformed.
pub fn validate_dependencies(subtasks: &[Subtask]) -> Result<(), SubtaskPlanError> {
    let mut ids = HashSet::with_capacity(subtasks.len());
    for subtask in subtasks {
        if !ids.insert(subtask.id.as_str()) {
            return Err(SubtaskPlanError::DuplicateId(subtask.id.clone()));
        }
    }

    for subtask in subtasks {
        for dep in &subtask.dependencies {
            if dep == &subtask.id {
                return Err(SubtaskPlanError::SelfDependency(subtask.id.clone()));
            }
            if !ids.contains(dep.as_str()) {
                return Err(SubtaskPlanError::UnknownDependency {
                    subtask: subtask.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Kahn's algorithm; whatever is left over sits on a cycle
    let mut in_degree: HashMap<&str, usize> = subtasks
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for subtask in subtasks {
        for dep in &subtask.dependencies {
            dependents.entry(dep.as_str()).or_default().push(subtask.id.as_str());
        }
    }

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0usize;

    while let Some(node) = queue.pop() {
        visited += 1;
        for &next in dependents.get(node).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push(next);
                }
            }
        }
    }

    if visited == subtasks.len() {
        Ok(())
    } else {
        let mut stuck: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        stuck.sort();
        Err(SubtaskPlanError::CircularDependency(stuck))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_chain() {
        let plan = vec![
            Subtask::new("a", "first", 5),
            Subtask::new("b", "second", 5).with_dependency("a"),
            Subtask::new("c", "third", 5).with_dependency("b"),
        ];
        assert_eq!(validate_dependencies(&plan), Ok(()));
    }

    #[test]
    fn test_rejects_duplicates_and_bad_references() {
        let dupes = vec![Subtask::new("a", "x", 1), Subtask::new("a", "y", 1)];
        assert_eq!(
            validate_dependencies(&dupes),
            Err(SubtaskPlanError::DuplicateId("a".into()))
        );

        let unknown = vec![Subtask::new("a", "x", 1).with_dependency("ghost")];
        assert!(matches!(
            validate_dependencies(&unknown),
            Err(SubtaskPlanError::UnknownDependency { .. })
        ));

        let own = vec![Subtask::new("a", "x", 1).with_dependency("a")];
        assert_eq!(
            validate_dependencies(&own),
            Err(SubtaskPlanError::SelfDependency("a".into()))
        );
    }

    #[test]
    fn test_reports_cycle_members() {
        let plan = vec![
            Subtask::new("root", "independent", 1),
            Subtask::new("a", "x", 1).with_dependency("b"),
            Subtask::new("b", "y", 1).with_dependency("a"),
            Subtask::new("c", "z", 1).with_dependency("a"),
        ];
        assert_eq!(
            validate_dependencies(&plan),
            Err(SubtaskPlanError::CircularDependency(vec![
                "a".into(),
                "b".into(),
                "c".into()
            ]))
        );
    }

    #[test]
    fn test_serde_shape() {
        let subtask = Subtask::new("fetch_items", "Fetch repos", 3)
            .with_priority(10)
            .with_kind(SubtaskType::Parallel);
        let json = serde_json::to_value(&subtask).unwrap();
        assert_eq!(json["estimatedIterations"], 3);
        assert_eq!(json["type"], "parallel");

        let parsed: Subtask =
            serde_json::from_str(r#"{"id": "s1", "description": "do it", "dependencies": ["s0"]}"#)
                .unwrap();
        assert_eq!(parsed.kind, SubtaskType::Sequential);
        assert!(parsed.dependencies.contains("s0"));
    }
}
