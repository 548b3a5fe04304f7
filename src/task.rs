//! Task definitions and lifecycle state.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::Instant;

use serde::Serialize;

use crate::error::ExecutionError;
use crate::retry::RetryStrategy;

/// A per-task progress callback (§3: `onProgress`), invoked in addition to
/// the `TASK_PROGRESS` event on every `reportProgress` call (§4.6). Wrapped
/// so `Task`/`TaskDescriptor` can still derive `Debug`/`Clone` — `Rc<dyn
/// Fn>` is `Clone` but not `Debug`.
#[derive(Clone)]
pub struct ProgressCallback(pub Rc<dyn Fn(serde_json::Value)>);

impl ProgressCallback {
    pub fn new(f: impl Fn(serde_json::Value) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, progress: serde_json::Value) {
        (self.0)(progress)
    }
}

impl std::fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressCallback(..)")
    }
}

/// Unique identifier for a task, unique within a single scheduler instance.
///
/// Client-supplied via `TaskDescriptor::with_id`, or generated from a random
/// UUID if omitted (spec.md §3: "client-supplied or generated").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh, random task id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level for a task. Total order `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Lifecycle status of a task.
///
/// `READY` is not a distinct variant — spec.md §3 notes it "may be
/// represented as pending + in ready queue"; a task is ready exactly when
/// it is `Pending` and its id appears in the scheduler's ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Why a task ended in `Failed` (supplemented detail beyond spec.md's bare
/// error string — see SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    ExecutorError(String),
    Timeout,
    DependencyFailed { dependency: TaskId },
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExecutorError(msg) => write!(f, "{msg}"),
            Self::Timeout => write!(f, "Task timeout"),
            Self::DependencyFailed { dependency } => {
                write!(f, "dependency '{dependency}' failed")
            }
        }
    }
}

impl From<ExecutionError> for FailureCause {
    /// `ExecutionError::Cancelled` has no `Failed`-path counterpart — a
    /// cancelled task transitions to `TaskStatus::Cancelled`, never
    /// `Failed`, so that variant is deliberately not represented here.
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::ExecutorError(msg) => Self::ExecutorError(msg),
            ExecutionError::Timeout => Self::Timeout,
            ExecutionError::DependencyFailed { dependency } => {
                Self::DependencyFailed { dependency }
            }
            ExecutionError::Cancelled => {
                Self::ExecutorError("Task cancelled".to_string())
            }
        }
    }
}

/// Descriptor supplied to `Scheduler::add_task`; everything the caller
/// controls about a new task. Builder-style, mirroring `JobMetadata`'s
/// `with_*` methods in the teacher's `jobs/job.rs`.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub id: Option<TaskId>,
    pub task_type: String,
    pub data: serde_json::Value,
    pub priority: Priority,
    pub dependencies: HashSet<TaskId>,
    pub retry_count: u32,
    pub retry_strategy: RetryStrategy,
    pub timeout: Option<std::time::Duration>,
    pub interruptible: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl TaskDescriptor {
    pub fn new(task_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: None,
            task_type: task_type.into(),
            data,
            priority: Priority::default(),
            dependencies: HashSet::new(),
            retry_count: 0,
            retry_strategy: RetryStrategy::default(),
            timeout: None,
            interruptible: true,
            on_progress: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn non_interruptible(mut self) -> Self {
        self.interruptible = false;
        self
    }

    /// Register a per-task progress callback (§3: `onProgress`), invoked
    /// alongside the `TASK_PROGRESS` event on every `reportProgress` call.
    pub fn with_on_progress(mut self, callback: impl Fn(serde_json::Value) + 'static) -> Self {
        self.on_progress = Some(ProgressCallback::new(callback));
        self
    }
}

/// The canonical in-memory entity for a submitted task, owned by the
/// registry for its full lifetime.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub data: serde_json::Value,

    /// Immutable after insertion.
    pub original_priority: Priority,
    /// May only be raised, never lowered, by priority inheritance (§4.3).
    pub effective_priority: Priority,

    pub dependencies: HashSet<TaskId>,
    pub dependents: HashSet<TaskId>,

    pub retry_count: u32,
    pub retry_strategy: RetryStrategy,
    pub timeout: Option<std::time::Duration>,
    pub interruptible: bool,
    pub on_progress: Option<ProgressCallback>,

    pub status: TaskStatus,
    pub attempts: u32,

    pub result: Option<serde_json::Value>,
    pub error: Option<FailureCause>,

    /// Monotonic sequence number assigned at insertion; breaks priority
    /// ties deterministically (§4.1).
    pub sequence: u64,

    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,

    /// Deadline for the current attempt's retry backoff, if the task is
    /// waiting out a delay before being re-readied (§4.7).
    pub retry_at: Option<Instant>,
}

impl Task {
    pub fn new(descriptor: TaskDescriptor, id: TaskId, sequence: u64, now: Instant) -> Self {
        Self {
            id,
            task_type: descriptor.task_type,
            data: descriptor.data,
            original_priority: descriptor.priority,
            effective_priority: descriptor.priority,
            dependencies: descriptor.dependencies,
            dependents: HashSet::new(),
            retry_count: descriptor.retry_count,
            retry_strategy: descriptor.retry_strategy,
            timeout: descriptor.timeout,
            interruptible: descriptor.interruptible,
            on_progress: descriptor.on_progress,
            status: TaskStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            sequence,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
            retry_at: None,
        }
    }

    /// Raise effective priority if `candidate` is higher. Returns whether a
    /// change was made (used by the inheritance DFS to decide whether to
    /// recurse further, per §4.3).
    pub fn raise_effective_priority(&mut self, candidate: Priority) -> bool {
        if candidate > self.effective_priority {
            self.effective_priority = candidate;
            true
        } else {
            false
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.started_at = Some(now);
    }

    pub fn complete(&mut self, result: serde_json::Value, now: Instant) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(now);
    }

    pub fn fail(&mut self, cause: FailureCause, now: Instant) {
        self.status = TaskStatus::Failed;
        self.error = Some(cause);
        self.finished_at = Some(now);
    }

    pub fn cancel(&mut self, now: Instant) {
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(now);
    }

    /// `attempts <= 1 + retry_count` is the governing invariant (§3); this
    /// checks whether one more attempt is still allowed.
    pub fn can_retry(&self) -> bool {
        self.attempts < 1 + self.retry_count
    }

    /// Put the task back in `Pending`, waiting out `delay` before it is
    /// eligible to re-enter the ready queue.
    pub fn prepare_retry(&mut self, delay: std::time::Duration, now: Instant) {
        self.status = TaskStatus::Pending;
        self.retry_at = Some(now + delay);
        self.started_at = None;
    }
}
