use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskStatus};

/// Service for dependency eligibility, cascade closure and cycle detection
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util(
    node: Uuid,
    graph: &HashMap<Uuid, Vec<Uuid>>,
    visited: &mut HashSet<Uuid>,
    rec_stack: &mut HashSet<Uuid>,
    path: &mut Vec<Uuid>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Dependencies of `task` that are not yet completed.
    ///
    /// A dependency id that names no known task counts as unmet.
    pub fn unmet_dependencies(&self, task: &Task, all_tasks: &[Task]) -> Vec<Uuid> {
        let status: HashMap<Uuid, TaskStatus> =
            all_tasks.iter().map(|t| (t.id, t.status)).collect();
        task.dependencies
            .iter()
            .copied()
            .filter(|dep| status.get(dep) != Some(&TaskStatus::Completed))
            .collect()
    }

    /// Whether every dependency of `task` is completed.
    pub fn is_eligible(&self, task: &Task, all_tasks: &[Task]) -> bool {
        self.unmet_dependencies(task, all_tasks).is_empty()
    }

    /// Every task that depends on `root`, directly or transitively, in
    /// breadth-first order. `root` itself is not included.
    pub fn transitive_dependents(&self, root: Uuid, all_tasks: &[Task]) -> Vec<Uuid> {
        let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for task in all_tasks {
            for &dep in &task.dependencies {
                dependents.entry(dep).or_default().push(task.id);
            }
        }

        let mut seen = HashSet::from([root]);
        let mut order = Vec::new();
        let mut frontier = VecDeque::from([root]);
        while let Some(current) = frontier.pop_front() {
            for &next in dependents.get(&current).into_iter().flatten() {
                if seen.insert(next) {
                    order.push(next);
                    frontier.push_back(next);
                }
            }
        }
        order
    }

    /// Detect circular dependencies in a set of tasks
    pub fn detect_cycle(&self, tasks: &[Task]) -> Option<Vec<Uuid>> {
        let mut graph: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for task in tasks {
            graph
                .entry(task.id)
                .or_default()
                .extend(task.dependencies.iter().copied());
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        // Walk in insertion order so the reported cycle is deterministic
        for task in tasks {
            if !visited.contains(&task.id)
                && detect_cycle_util(task.id, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }

        None
    }

    /// Reject task sets containing a dependency cycle.
    pub fn ensure_acyclic(&self, tasks: &[Task]) -> DomainResult<()> {
        match self.detect_cycle(tasks) {
            Some(cycle) => Err(DomainError::DependencyCycle(cycle)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(id: Uuid, deps: &[Uuid]) -> Task {
        let mut task = Task::new("Test");
        task.id = id;
        task.dependencies = deps.to_vec();
        task
    }

    #[test]
    fn test_unmet_dependencies() {
        let resolver = DependencyResolver::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut done = task_with(a, &[]);
        done.status = TaskStatus::Completed;
        let blocked = task_with(b, &[a, Uuid::nil()]);

        let all = vec![done, blocked.clone()];
        assert_eq!(resolver.unmet_dependencies(&blocked, &all), vec![Uuid::nil()]);
        assert!(!resolver.is_eligible(&blocked, &all));
    }

    #[test]
    fn test_transitive_dependents_chain_and_diamond() {
        let resolver = DependencyResolver::new();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        // 0 <- 1 <- 2, 0 <- 3, {2,3} <- 4
        let tasks = vec![
            task_with(ids[0], &[]),
            task_with(ids[1], &[ids[0]]),
            task_with(ids[2], &[ids[1]]),
            task_with(ids[3], &[ids[0]]),
            task_with(ids[4], &[ids[2], ids[3]]),
        ];

        let closure = resolver.transitive_dependents(ids[0], &tasks);
        assert_eq!(closure.len(), 4);
        assert_eq!(closure.iter().filter(|id| **id == ids[4]).count(), 1);
        assert!(resolver.transitive_dependents(ids[4], &tasks).is_empty());
        assert_eq!(resolver.transitive_dependents(ids[1], &tasks), vec![ids[2], ids[4]]);
    }

    #[test]
    fn test_detect_cycle_no_cycle() {
        let resolver = DependencyResolver::new();
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        let tasks = vec![task_with(id1, &[]), task_with(id2, &[id1])];
        assert!(resolver.detect_cycle(&tasks).is_none());
        assert!(resolver.ensure_acyclic(&tasks).is_ok());
    }

    #[test]
    fn test_detect_cycle_with_cycle() {
        let resolver = DependencyResolver::new();
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        let tasks = vec![task_with(id1, &[id2]), task_with(id2, &[id1])];

        let cycle = resolver.detect_cycle(&tasks).expect("cycle");
        assert_eq!(cycle.first(), cycle.last());
        assert!(matches!(
            resolver.ensure_acyclic(&tasks),
            Err(DomainError::DependencyCycle(_))
        ));
    }
}
