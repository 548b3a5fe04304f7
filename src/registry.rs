//! Task registry: owns every task's state plus the dependency graph,
//! ready queue, and executor registry, and implements the insertion
//! validation pipeline (§4.1).

use std::collections::HashMap;
use std::time::Instant;

use crate::dag::{propagate_priority, DependencyGraph};
use crate::error::{Result, SchedulerError};
use crate::executor::ExecutorRegistry;
use crate::ready_queue::ReadyQueue;
use crate::task::{FailureCause, Task, TaskDescriptor, TaskId, TaskStatus};

/// Owns all scheduler state that isn't purely about the current frame's
/// dispatch progress: the task map, the dependency graph, the ready
/// queue, and the executor registry.
///
/// Grounded on the teacher's `SchedulerEngine`, which similarly bundles a
/// job store, a `DependencyGraph`, and a priority queue behind one
/// `Arc<RwLock<_>>`-guarded struct; here there is no interior lock
/// because the whole scheduler is single-threaded (§1).
pub struct TaskRegistry {
    tasks: HashMap<TaskId, Task>,
    graph: DependencyGraph,
    ready: ReadyQueue,
    executors: ExecutorRegistry,
    queue_size_limit: Option<usize>,
    next_sequence: u64,
}

impl TaskRegistry {
    pub fn new(queue_size_limit: Option<usize>) -> Self {
        Self {
            tasks: HashMap::new(),
            graph: DependencyGraph::new(),
            ready: ReadyQueue::new(),
            executors: ExecutorRegistry::new(),
            queue_size_limit,
            next_sequence: 0,
        }
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    pub fn register_executor(
        &mut self,
        task_type: impl Into<String>,
        executor: impl Fn(
                serde_json::Value,
                crate::context::TaskContext,
            ) -> futures::future::LocalBoxFuture<'static, crate::executor::ExecutorResult>
            + 'static,
    ) {
        self.executors.register(task_type, executor);
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.graph.dependents_of(id)
    }

    pub fn transitive_dependents(&self, id: &TaskId) -> std::collections::HashSet<TaskId> {
        self.graph.transitive_dependents(id)
    }

    /// Validate and insert a new task (§4.1). Checks run in this order,
    /// each one short-circuiting the rest so the error is unambiguous:
    /// queue-size limit, duplicate id, unknown executor, unknown
    /// dependency, dependency cycle. Nothing is recorded unless every
    /// check passes.
    pub fn add_task(&mut self, descriptor: TaskDescriptor, now: Instant) -> Result<TaskId> {
        if let Some(limit) = self.queue_size_limit {
            if self.tasks.len() >= limit {
                return Err(SchedulerError::QueueFull { limit });
            }
        }

        let id = descriptor.id.clone().unwrap_or_else(TaskId::generate);
        if self.tasks.contains_key(&id) {
            return Err(SchedulerError::DuplicateId(id));
        }

        if !self.executors.contains(&descriptor.task_type) {
            return Err(SchedulerError::NoExecutor(descriptor.task_type.clone()));
        }

        for dependency in &descriptor.dependencies {
            if !self.tasks.contains_key(dependency) {
                return Err(SchedulerError::UnknownDependency(dependency.clone(), id));
            }
        }

        // `DependencyGraph::add_dependency` already leaves the graph
        // untouched on a cycle error, so adding edges one at a time and
        // bailing out on the first failure is sufficient to guarantee
        // nothing is recorded unless every edge is accepted.
        self.graph.add_node(id.clone());
        for dependency in &descriptor.dependencies {
            if let Err(err) = self.graph.add_dependency(dependency, &id) {
                self.graph.remove_node(&id);
                return Err(err);
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let dependencies = descriptor.dependencies.clone();
        let priority = descriptor.priority;
        let mut task = Task::new(descriptor, id.clone(), sequence, now);

        // Record this task as a dependent on each of its dependencies,
        // and raise their effective priority if this task outranks them.
        for dependency in &dependencies {
            if let Some(dep_task) = self.tasks.get_mut(dependency) {
                dep_task.dependents.insert(id.clone());
            }
        }

        // A dependency that already terminated in Failed/Cancelled before
        // this task was inserted never emits the cascade in
        // `dispatcher.rs::cascade_failure`, since that cascade only walks
        // dependents recorded *at* the moment of failure. Without this
        // check the new task would sit Pending forever (§3).
        let already_failed_dependency = dependencies.iter().find(|dep| {
            matches!(
                self.tasks.get(*dep).map(|t| t.status),
                Some(TaskStatus::Failed) | Some(TaskStatus::Cancelled)
            )
        });

        if let Some(dependency) = already_failed_dependency {
            task.fail(
                FailureCause::DependencyFailed {
                    dependency: dependency.clone(),
                },
                now,
            );
            self.tasks.insert(id.clone(), task);
            return Ok(id);
        }

        let all_deps_terminal_ok = dependencies.iter().all(|dep| {
            matches!(
                self.tasks.get(dep).map(|t| t.status),
                Some(TaskStatus::Completed)
            )
        });

        if dependencies.is_empty() || all_deps_terminal_ok {
            task.status = TaskStatus::Pending;
            self.ready.push(id.clone(), priority, sequence);
        }

        self.tasks.insert(id.clone(), task);
        let changed = propagate_priority(&self.graph, &mut self.tasks, &id);
        self.resync_ready_priority(&changed);

        Ok(id)
    }

    /// After priority inheritance raises `effective_priority` on one or
    /// more already-tracked tasks, re-seat each one in the ready queue at
    /// its new priority if it is currently sitting there — otherwise the
    /// queue would keep dispatching it at its old, lower priority (§4.3,
    /// §4.4).
    fn resync_ready_priority(&mut self, changed: &[TaskId]) {
        for id in changed {
            let Some(task) = self.tasks.get(id) else { continue };
            if task.status != TaskStatus::Pending {
                continue;
            }
            let is_ready = task.dependencies.iter().all(|dep| {
                self.tasks
                    .get(dep)
                    .map(|d| d.status == TaskStatus::Completed)
                    .unwrap_or(false)
            });
            if is_ready {
                self.ready.remove(id);
                self.ready.push(id.clone(), task.effective_priority, task.sequence);
            }
        }
    }

    /// Move a task from "waiting on dependencies" into the ready queue
    /// once its last outstanding dependency completes (§4.2, §4.8).
    pub fn mark_ready(&mut self, id: &TaskId) {
        if let Some(task) = self.tasks.get(id) {
            if task.status == TaskStatus::Pending {
                self.ready
                    .push(id.clone(), task.effective_priority, task.sequence);
            }
        }
    }

    pub fn pop_ready(&mut self) -> Option<TaskId> {
        self.ready.pop()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn remove_from_ready(&mut self, id: &TaskId) {
        self.ready.remove(id);
    }

    /// Ids of every `Pending` task whose retry backoff has elapsed and is
    /// ready to be promoted back into the ready queue (§4.7).
    pub fn due_retries(&self, now: Instant) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && task.retry_at.map(|at| at <= now).unwrap_or(false)
            })
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn clear_retry_at(&mut self, id: &TaskId) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.retry_at = None;
        }
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        self.graph.remove_node(id);
        self.tasks.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use futures::FutureExt;

    fn registry_with_custom_executor() -> TaskRegistry {
        let mut registry = TaskRegistry::new(None);
        registry.register_executor("CUSTOM", |data, _ctx: TaskContext| {
            async move { Ok(data) }.boxed_local()
        });
        registry
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut registry = registry_with_custom_executor();
        let descriptor = TaskDescriptor::new("CUSTOM", serde_json::json!({})).with_id("t1");
        registry.add_task(descriptor.clone(), Instant::now()).unwrap();

        let err = registry.add_task(descriptor, Instant::now()).unwrap_err();
        assert_eq!(err, SchedulerError::DuplicateId(TaskId::from("t1")));
    }

    #[test]
    fn rejects_unknown_executor() {
        let mut registry = TaskRegistry::new(None);
        let descriptor = TaskDescriptor::new("MISSING", serde_json::json!({}));
        let err = registry.add_task(descriptor, Instant::now()).unwrap_err();
        assert_eq!(err, SchedulerError::NoExecutor("MISSING".to_string()));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let mut registry = registry_with_custom_executor();
        let descriptor = TaskDescriptor::new("CUSTOM", serde_json::json!({}))
            .with_id("t1")
            .with_dependencies([TaskId::from("ghost")]);
        let err = registry.add_task(descriptor, Instant::now()).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::UnknownDependency(TaskId::from("ghost"), TaskId::from("t1"))
        );
    }

    #[test]
    fn rejects_queue_full() {
        let mut registry = TaskRegistry::new(Some(1));
        registry.register_executor("CUSTOM", |data, _ctx: TaskContext| {
            async move { Ok(data) }.boxed_local()
        });
        registry
            .add_task(TaskDescriptor::new("CUSTOM", serde_json::json!({})), Instant::now())
            .unwrap();

        let err = registry
            .add_task(TaskDescriptor::new("CUSTOM", serde_json::json!({})), Instant::now())
            .unwrap_err();
        assert_eq!(err, SchedulerError::QueueFull { limit: 1 });
    }

    #[test]
    fn task_with_no_dependencies_is_immediately_ready() {
        let mut registry = registry_with_custom_executor();
        let id = registry
            .add_task(TaskDescriptor::new("CUSTOM", serde_json::json!({})), Instant::now())
            .unwrap();
        assert_eq!(registry.ready_len(), 1);
        assert_eq!(registry.pop_ready(), Some(id));
    }

    #[test]
    fn priority_inheritance_resyncs_an_already_queued_ancestor() {
        use crate::task::Priority;

        let mut registry = registry_with_custom_executor();
        // `a` has no deps, so it is pushed into the ready queue at Low
        // immediately. `b` depends on `a` and is High, so inserting it
        // must raise `a`'s queued priority to High — not just its stored
        // `effective_priority` — or `c` (Normal) would wrongly dequeue
        // ahead of `a` (§4.3, §4.4).
        registry
            .add_task(
                TaskDescriptor::new("CUSTOM", serde_json::json!({}))
                    .with_id("a")
                    .with_priority(Priority::Low),
                Instant::now(),
            )
            .unwrap();
        registry
            .add_task(
                TaskDescriptor::new("CUSTOM", serde_json::json!({}))
                    .with_id("b")
                    .with_priority(Priority::High)
                    .with_dependencies([TaskId::from("a")]),
                Instant::now(),
            )
            .unwrap();
        registry
            .add_task(
                TaskDescriptor::new("CUSTOM", serde_json::json!({}))
                    .with_id("c")
                    .with_priority(Priority::Normal),
                Instant::now(),
            )
            .unwrap();

        assert_eq!(registry.get(&TaskId::from("a")).unwrap().effective_priority, Priority::High);
        assert_eq!(registry.pop_ready(), Some(TaskId::from("a")));
        assert_eq!(registry.pop_ready(), Some(TaskId::from("c")));
    }

    #[test]
    fn task_with_incomplete_dependency_is_not_ready() {
        let mut registry = registry_with_custom_executor();
        let dep_id = registry
            .add_task(
                TaskDescriptor::new("CUSTOM", serde_json::json!({})).with_id("dep"),
                Instant::now(),
            )
            .unwrap();
        registry
            .add_task(
                TaskDescriptor::new("CUSTOM", serde_json::json!({}))
                    .with_id("t1")
                    .with_dependencies([dep_id]),
                Instant::now(),
            )
            .unwrap();

        // Only the dependency itself is ready; the dependent is waiting.
        assert_eq!(registry.ready_len(), 1);
        assert_eq!(registry.pop_ready(), Some(TaskId::from("dep")));
    }

    #[test]
    fn dependency_already_failed_at_insertion_fails_the_dependent_immediately() {
        let mut registry = registry_with_custom_executor();
        let dep_id = registry
            .add_task(
                TaskDescriptor::new("CUSTOM", serde_json::json!({})).with_id("dep"),
                Instant::now(),
            )
            .unwrap();
        registry
            .get_mut(&dep_id)
            .unwrap()
            .fail(crate::task::FailureCause::Timeout, Instant::now());

        let id = registry
            .add_task(
                TaskDescriptor::new("CUSTOM", serde_json::json!({}))
                    .with_id("t1")
                    .with_dependencies([dep_id.clone()]),
                Instant::now(),
            )
            .unwrap();

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error,
            Some(crate::task::FailureCause::DependencyFailed { dependency: dep_id })
        );
        assert_eq!(registry.ready_len(), 0);
    }
}
