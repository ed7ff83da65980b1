//! Checklist task dependencies
//!
//! "Task A is blocked by task B" edges share the acyclic graph used for
//! columns, so a task can never end up waiting on itself.

use crate::core::dependencies::CycleCheck;
use crate::core::graph::DependencyGraph;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// One "blocked by" edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_id: String,
    pub depends_on_task_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskDependencies {
    graph: DependencyGraph<String>,
}

impl TaskDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = TaskDependency>) -> EngineResult<Self> {
        let mut tasks = Self::new();
        for edge in edges {
            tasks.add_dependency(&edge.task_id, &edge.depends_on_task_id)?;
        }
        Ok(tasks)
    }

    pub fn would_create_cycle(&self, task_id: &str, depends_on: &str) -> CycleCheck {
        match self
            .graph
            .would_create_cycle(&task_id.to_string(), &depends_on.to_string())
        {
            Some(cycle_path) => CycleCheck::Cycle { cycle_path },
            None => CycleCheck::Acyclic,
        }
    }

    /// Record that `task_id` cannot start before `depends_on` is done.
    pub fn add_dependency(&mut self, task_id: &str, depends_on: &str) -> EngineResult<()> {
        if task_id == depends_on {
            return Err(EngineError::Validation(format!(
                "Task '{}' cannot depend on itself",
                task_id
            )));
        }
        self.graph
            .add_edge(task_id.to_string(), depends_on.to_string(), ())
            .map_err(EngineError::from)
    }

    pub fn remove_dependency(&mut self, task_id: &str, depends_on: &str) -> bool {
        self.graph
            .remove_edge(&task_id.to_string(), &depends_on.to_string())
            > 0
    }

    /// Forget a task and every edge touching it.
    pub fn remove_task(&mut self, task_id: &str) -> bool {
        self.graph.remove_node(&task_id.to_string())
    }

    /// Tasks `task_id` waits on directly.
    pub fn blocked_by(&self, task_id: &str) -> Vec<String> {
        self.graph.dependencies(&task_id.to_string())
    }

    /// Tasks waiting on `task_id` directly.
    pub fn blocking(&self, task_id: &str) -> Vec<String> {
        self.graph.dependents(&task_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_self_dependency_rejected() {
        let mut tasks = TaskDependencies::new();
        assert!(matches!(
            tasks.add_dependency("t1", "t1"),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let mut tasks = TaskDependencies::new();
        tasks.add_dependency("a", "b").unwrap();
        tasks.add_dependency("b", "c").unwrap();
        assert_eq!(
            tasks.would_create_cycle("c", "a"),
            CycleCheck::Cycle {
                cycle_path: vec!["a".to_string(), "b".to_string(), "c".to_string()]
            }
        );
        let err = tasks.add_dependency("c", "a").unwrap_err();
        assert_eq!(
            err.cycle_path(),
            Some(&["a".to_string(), "b".to_string(), "c".to_string()][..])
        );
    }

    #[test]
    fn test_reverse_of_existing_edge_is_a_cycle() {
        let mut tasks = TaskDependencies::new();
        tasks.add_dependency("write", "outline").unwrap();
        assert!(tasks.would_create_cycle("outline", "write").is_cycle());
        assert!(!tasks.would_create_cycle("publish", "write").is_cycle());
    }

    #[test]
    fn test_blocked_by_and_blocking() {
        let tasks = TaskDependencies::from_edges(vec![
            TaskDependency {
                task_id: "ship".to_string(),
                depends_on_task_id: "test".to_string(),
            },
            TaskDependency {
                task_id: "test".to_string(),
                depends_on_task_id: "build".to_string(),
            },
        ])
        .unwrap();
        assert_eq!(tasks.blocked_by("ship"), vec!["test".to_string()]);
        assert_eq!(tasks.blocking("build"), vec!["test".to_string()]);
    }

    #[test]
    fn test_remove_dependency_allows_reverse_edge() {
        let mut tasks = TaskDependencies::new();
        tasks.add_dependency("a", "b").unwrap();
        assert!(tasks.remove_dependency("a", "b"));
        assert!(!tasks.remove_dependency("a", "b"));
        tasks.add_dependency("b", "a").unwrap();
        assert!(tasks.remove_task("a"));
        assert!(tasks.blocked_by("b").is_empty());
    }
}
