//! The public scheduler facade (§1, §4).
//!
//! Grounded on the teacher's `SchedulerEngine::new`/`start`/`stop` entry
//! points in `dag/scheduler.rs`; the shape of the public API (register an
//! executor, submit a task, observe events, query status, start/stop the
//! loop) follows the teacher closely; everything underneath it does not.

use std::cell::Cell;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::config::SchedulerConfig;
use crate::context::TaskContext;
use crate::dispatcher::Engine;
use crate::error::Result;
use crate::events::{EventEmitter, ListenerId, SchedulerEvent};
use crate::executor::ExecutorResult;
use crate::retention::RetentionSweeper;
use crate::task::{Priority, Task, TaskDescriptor, TaskId, TaskStatus};
use crate::time::{Clock, FramePump, SystemClock};

/// A read-only snapshot of a task, returned by `Scheduler::task_snapshot`
/// (§3 supplemented feature: richer introspection beyond the bare
/// `getTaskStatus` the distilled spec names).
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,
    pub original_priority: Priority,
    pub effective_priority: Priority,
    pub attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl From<&Task> for TaskHandle {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            task_type: task.task_type.clone(),
            status: task.status,
            original_priority: task.original_priority,
            effective_priority: task.effective_priority,
            attempts: task.attempts,
            result: task.result.clone(),
            error: task.error.as_ref().map(|cause| cause.to_string()),
        }
    }
}

/// Aggregate counts across every task currently in the registry, mirroring
/// spec.md §4's exact `getStats()` shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

/// Richer stats beyond the six-field `getStats()` contract (§3
/// supplemented feature): adds queue depth and in-flight concurrency,
/// which a host dashboard wants but spec.md's minimal contract omits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailedStats {
    pub base: SchedulerStats,
    pub ready_queue_depth: usize,
    pub in_flight: usize,
}

/// Cooperative, single-threaded, priority-aware task scheduler.
///
/// Cheaply cloneable: internally an `Rc<Engine>` plus a frame pump, so a
/// host can hand out multiple handles to the same running scheduler.
#[derive(Clone)]
pub struct Scheduler {
    engine: Rc<Engine>,
    frame_pump: Rc<dyn FramePump>,
    sweeper: Rc<RetentionSweeper>,
    running: Rc<Cell<bool>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock_and_pump(config, Rc::new(SystemClock), Rc::new(crate::time::ImmediateFramePump))
    }

    /// Construct a scheduler with injected `Clock`/`FramePump`
    /// implementations, for hosts that drive their own frame loop or for
    /// deterministic tests (§9: "do not hard-wire to a specific host
    /// API").
    pub fn with_clock_and_pump(
        config: SchedulerConfig,
        clock: Rc<dyn Clock>,
        frame_pump: Rc<dyn FramePump>,
    ) -> Self {
        let now = clock.now();
        let engine = Engine::new(config, clock);
        Self {
            engine,
            frame_pump,
            sweeper: Rc::new(RetentionSweeper::new(now)),
            running: Rc::new(Cell::new(false)),
        }
    }

    /// Register the executor for a task type (§4.4). Registering a
    /// second executor for the same type replaces the first.
    pub fn register_executor(
        &self,
        task_type: impl Into<String>,
        executor: impl Fn(Value, TaskContext) -> LocalBoxFuture<'static, ExecutorResult> + 'static,
    ) {
        self.engine
            .registry
            .borrow_mut()
            .register_executor(task_type, executor);
    }

    /// Submit a new task (§4.1). Fails synchronously and leaves nothing
    /// recorded if validation rejects it.
    ///
    /// A task that depends on an already-`Failed`/`Cancelled` task is
    /// still recorded (its id stays resolvable via `getTaskStatus`, §8),
    /// but the registry fails it in place rather than queuing it; in that
    /// case `TASK_ADDED` is immediately followed by `TASK_FAILED`, the
    /// same pair the dependent cascade in `dispatcher.rs` emits, just
    /// without a `TASK_STARTED` in between since it never ran (§3).
    pub fn add_task(&self, descriptor: TaskDescriptor) -> Result<TaskId> {
        let now = self.engine.clock.now();
        let id = self.engine.registry.borrow_mut().add_task(descriptor, now)?;
        let (priority, status, cause) = {
            let registry = self.engine.registry.borrow();
            let task = registry.get(&id).expect("just inserted");
            (task.effective_priority, task.status, task.error.clone())
        };
        self.engine.events.emit(SchedulerEvent::TaskAdded {
            id: id.clone(),
            priority,
        });
        if status == TaskStatus::Failed {
            self.engine.events.emit(SchedulerEvent::TaskFailed {
                id: id.clone(),
                cause: cause.expect("a Failed task always carries a FailureCause"),
            });
        }
        Ok(id)
    }

    /// Request cancellation of a task (§4.9). Returns whether the
    /// cancellation took effect: `false` for a task that is already
    /// terminal, unknown, or `Running` and non-interruptible.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        self.engine.cancel_task(id)
    }

    pub fn get_task_status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.engine.registry.borrow().get(id).map(|task| task.status)
    }

    /// A read-only snapshot of a task's current state (§3 supplemented
    /// feature).
    pub fn task_snapshot(&self, id: &TaskId) -> Option<TaskHandle> {
        self.engine
            .registry
            .borrow()
            .get(id)
            .map(TaskHandle::from)
    }

    /// Aggregate counts matching spec.md §4's `getStats()` exactly.
    pub fn get_stats(&self) -> SchedulerStats {
        let registry = self.engine.registry.borrow();
        let mut stats = SchedulerStats::default();
        for task in registry.iter() {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Stats plus queue depth and in-flight concurrency (§3 supplemented
    /// feature).
    pub fn detailed_stats(&self) -> DetailedStats {
        DetailedStats {
            base: self.get_stats(),
            ready_queue_depth: self.engine.registry.borrow().ready_len(),
            in_flight: self.engine.running_count(),
        }
    }

    /// Register a listener for `event_name` (one of the `SCREAMING_SNAKE`
    /// names in `SchedulerEvent::name`); returns a handle for `off`.
    pub fn on(
        &self,
        event_name: &'static str,
        listener: impl Fn(&SchedulerEvent) + 'static,
    ) -> ListenerId {
        self.engine.events.on(event_name, listener)
    }

    pub fn off(&self, event_name: &str, id: ListenerId) {
        self.engine.events.off(event_name, id)
    }

    pub fn events(&self) -> &EventEmitter {
        &self.engine.events
    }

    /// Run exactly one frame: promote retries, admit tasks, poll
    /// in-flight attempts, and sweep expired terminal tasks if due.
    /// Exposed directly for hosts driving their own loop; `start` calls
    /// this once per `FramePump` callback.
    pub fn tick(&self) {
        self.engine.tick();
        self.sweeper.maybe_sweep(&self.engine);
    }

    /// Begin self-rearming: request a frame, run one tick when it fires,
    /// then request the next frame, until `stop` is called.
    pub fn start(&self) {
        if self.running.replace(true) {
            return;
        }
        self.request_next_frame();
    }

    fn request_next_frame(&self) {
        let scheduler = self.clone();
        self.frame_pump.request_frame(Box::new(move |_now| {
            if !scheduler.running.get() {
                return;
            }
            scheduler.tick();
            scheduler.request_next_frame();
        }));
    }

    pub fn stop(&self) {
        self.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Drop every task from the registry, ready queue, and in-flight set.
    /// Does not unregister executors or listeners.
    pub fn clear(&self) {
        let ids: Vec<TaskId> = self
            .engine
            .registry
            .borrow()
            .iter()
            .map(|task| task.id.clone())
            .collect();
        let mut registry = self.engine.registry.borrow_mut();
        for id in ids {
            registry.remove(&id);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
