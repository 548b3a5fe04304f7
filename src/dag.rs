//! Dependency graph: cycle detection and transitive priority inheritance
//! (§4.3).
//!
//! Grounded on the teacher's `TaskDAG` in `dag/mod.rs`, which also
//! maintains a `DiGraph` alongside an id→node-index map for O(1) lookup.
//! This version uses `StableDiGraph` instead of `DiGraph` so node indices
//! survive the retention sweeper removing arbitrary nodes out of order —
//! `DiGraph` would silently invalidate every index after the first
//! removal.

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{Result, SchedulerError};
use crate::task::{Priority, TaskId};

/// Tracks dependency edges between tasks (`dependency -> dependent`, i.e.
/// an edge points from the task that must finish first to the task that
/// is waiting on it) and performs the priority-inheritance walk.
///
/// The graph only ever stores `TaskId`s as node weights; task data itself
/// lives in the registry's task map.
#[derive(Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<TaskId, ()>,
    index_of: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index_of.contains_key(id)
    }

    /// Add `id` as a bare node with no edges yet. A no-op if already
    /// present.
    pub fn add_node(&mut self, id: TaskId) {
        if !self.index_of.contains_key(&id) {
            let index = self.graph.add_node(id.clone());
            self.index_of.insert(id, index);
        }
    }

    pub fn remove_node(&mut self, id: &TaskId) {
        if let Some(index) = self.index_of.remove(id) {
            self.graph.remove_node(index);
        }
    }

    /// Record that `dependent` depends on `dependency`. Returns
    /// `DependencyCycle` if the edge would create one, leaving the graph
    /// unmodified on error (§4.1: insertion either fully succeeds or
    /// fails with nothing recorded).
    pub fn add_dependency(&mut self, dependency: &TaskId, dependent: &TaskId) -> Result<()> {
        let dep_index = *self
            .index_of
            .get(dependency)
            .ok_or_else(|| SchedulerError::UnknownDependency(dependency.clone(), dependent.clone()))?;
        let dependent_index = *self
            .index_of
            .get(dependent)
            .expect("dependent must be added as a node before its edges");

        self.graph.add_edge(dep_index, dependent_index, ());

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(
                self.graph
                    .find_edge(dep_index, dependent_index)
                    .expect("edge was just inserted"),
            );
            return Err(SchedulerError::DependencyCycle(dependent.clone()));
        }

        Ok(())
    }

    /// Direct dependencies of `id` (tasks that must complete before `id`
    /// can run).
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&index) = self.index_of.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| self.graph[edge.source()].clone())
            .collect()
    }

    /// Direct dependents of `id` (tasks waiting on `id`).
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&index) = self.index_of.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| self.graph[edge.target()].clone())
            .collect()
    }

    /// Walk every transitive dependent of `id` and collect the set, in no
    /// particular order, deduplicated. Used both by priority inheritance
    /// (§4.3) and by the failure cascade (§4.8).
    pub fn transitive_dependents(&self, id: &TaskId) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let mut stack = self.dependents_of(id);
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependents_of(&next));
            }
        }
        seen
    }
}


/// Recompute `effective_priority` for every transitive dependency of a
/// task whose priority just rose, raising (never lowering) each ancestor
/// so that a high-priority task is never stuck waiting behind a
/// low-priority dependency (§4.3).
///
/// This lives next to `DependencyGraph` rather than inside it because it
/// needs mutable access to the task map, which `DependencyGraph` does not
/// own; `registry.rs` calls this after inserting a new dependency edge or
/// bumping a task's own priority.
///
/// Returns the ids of every ancestor whose `effective_priority` actually
/// rose, so the caller can resync their position in the ready queue —
/// raising a `Task`'s priority in place does not move an already-enqueued
/// `ReadyQueue` entry, which was pushed with the old priority (§4.3, §4.4,
/// §9: "after any change to a pending task's effective priority, its
/// position in the ready index is updated").
pub fn propagate_priority(
    graph: &DependencyGraph,
    tasks: &mut HashMap<TaskId, crate::task::Task>,
    from: &TaskId,
) -> Vec<TaskId> {
    let Some(from_priority) = tasks.get(from).map(|t| t.effective_priority) else {
        return Vec::new();
    };

    let mut changed = Vec::new();

    // Walk `from`'s dependencies (the tasks it is waiting on), short
    // circuiting a branch once a node's priority doesn't actually rise
    // (it and everything it depends on is already at least
    // `from_priority`, by the same invariant applied on a previous
    // propagation).
    let mut stack = graph.dependencies_of(from);
    while let Some(dependency) = stack.pop() {
        let Some(task) = tasks.get_mut(&dependency) else {
            continue;
        };
        if task.raise_effective_priority(from_priority) {
            changed.push(dependency.clone());
            stack.extend(graph.dependencies_of(&dependency));
        }
    }

    changed
}

#[cfg(test)]
mod propagation_tests {
    use super::*;
    use crate::task::{Task, TaskDescriptor};
    use std::time::Instant;

    fn make_task(id_str: &str, priority: Priority) -> crate::task::Task {
        let descriptor = TaskDescriptor::new("CUSTOM", serde_json::json!({})).with_priority(priority);
        Task::new(descriptor, TaskId::from(id_str), 0, Instant::now())
    }

    #[test]
    fn priority_propagates_transitively_and_only_rises() {
        let mut graph = DependencyGraph::new();
        for n in ["a", "b", "c", "d"] {
            graph.add_node(TaskId::from(n));
        }
        // a depends on b, b depends on c; d is unrelated.
        graph.add_dependency(&TaskId::from("b"), &TaskId::from("a")).unwrap();
        graph.add_dependency(&TaskId::from("c"), &TaskId::from("b")).unwrap();

        let mut tasks = HashMap::new();
        tasks.insert(TaskId::from("a"), make_task("a", Priority::High));
        tasks.insert(TaskId::from("b"), make_task("b", Priority::Low));
        tasks.insert(TaskId::from("c"), make_task("c", Priority::Low));
        tasks.insert(TaskId::from("d"), make_task("d", Priority::Low));

        propagate_priority(&graph, &mut tasks, &TaskId::from("a"));

        assert_eq!(tasks[&TaskId::from("b")].effective_priority, Priority::High);
        assert_eq!(tasks[&TaskId::from("c")].effective_priority, Priority::High);
        assert_eq!(tasks[&TaskId::from("d")].effective_priority, Priority::Low);
    }
}
