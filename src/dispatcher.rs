//! The frame-budgeted dispatch loop (§4.5), per-attempt state machine
//! (§4.7), and dependency failure cascade (§4.8).
//!
//! Grounded on the teacher's `dag/scheduler.rs` run loop, which drains a
//! priority queue under a concurrency cap using `tokio::spawn` +
//! `tokio::select!`. This scheduler has no runtime to spawn onto (§1: a
//! single-threaded, frame-driven host model), so each running attempt's
//! future is polled by hand, once per tick, with a no-op waker — there is
//! nothing to wake us up early, so a tick either makes progress on a
//! poll or it doesn't, and the next frame tries again.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::LocalBoxFuture;

use crate::config::SchedulerConfig;
use crate::context::{AbortSignal, TaskContext};
use crate::error::ExecutionError;
use crate::events::{EventEmitter, SchedulerEvent};
use crate::executor::ExecutorResult;
use crate::registry::TaskRegistry;
use crate::task::{FailureCause, TaskId, TaskStatus};
use crate::time::Clock;

/// One in-flight attempt: its future, its cancellation signal, and the
/// deadline the dispatcher must abort it by.
struct RunningAttempt {
    future: LocalBoxFuture<'static, ExecutorResult>,
    signal: AbortSignal,
    deadline: Option<Instant>,
}

/// The engine: everything needed to run frames, independent of how those
/// frames get scheduled (that's `FramePump`'s job, driven by
/// `scheduler.rs`). Always held behind an `Rc`, so a running task's
/// progress-reporting callback can hold a cloned `Rc<Engine>` and stay
/// `'static` without any unsafe aliasing.
pub(crate) struct Engine {
    pub registry: RefCell<TaskRegistry>,
    pub events: EventEmitter,
    pub config: SchedulerConfig,
    pub clock: Rc<dyn Clock>,
    running: RefCell<HashMap<TaskId, RunningAttempt>>,
    /// The instant the current tick began; `TaskContext::should_yield`
    /// compares `clock.now()` against this (§4.5, §4.6). Shared across
    /// every task started or polled within the same tick.
    current_frame_start: Cell<Instant>,
}

impl Engine {
    pub fn new(config: SchedulerConfig, clock: Rc<dyn Clock>) -> Rc<Self> {
        let now = clock.now();
        Rc::new(Self {
            registry: RefCell::new(TaskRegistry::new(config.queue_size_limit)),
            events: EventEmitter::new(),
            config,
            clock,
            running: RefCell::new(HashMap::new()),
            current_frame_start: Cell::new(now),
        })
    }

    pub fn running_count(&self) -> usize {
        self.running.borrow().len()
    }

    /// Run exactly one frame: promote due retries, admit new tasks up to
    /// the frame's budget, then poll every in-flight attempt once.
    pub fn tick(self: &Rc<Self>) {
        self.current_frame_start.set(self.clock.now());
        self.promote_due_retries();
        self.admit_ready_tasks();
        self.poll_running_attempts();
    }

    fn promote_due_retries(&self) {
        let now = self.clock.now();
        let due = self.registry.borrow().due_retries(now);
        let mut registry = self.registry.borrow_mut();
        for id in due {
            registry.clear_retry_at(&id);
            registry.mark_ready(&id);
        }
    }

    fn admit_ready_tasks(self: &Rc<Self>) {
        let frame_start = self.current_frame_start.get();
        let mut started = 0usize;

        loop {
            if started >= self.config.max_tasks_per_frame {
                break;
            }
            if self.clock.now().duration_since(frame_start) >= self.config.frame_time_budget {
                break;
            }
            if self.running.borrow().len() >= self.config.max_concurrent_tasks {
                break;
            }
            let next = self.registry.borrow_mut().pop_ready();
            let Some(id) = next else { break };
            self.start_task(id);
            started += 1;
        }
    }

    fn start_task(self: &Rc<Self>, id: TaskId) {
        let now = self.clock.now();

        let (task_type, data, attempt, timeout) = {
            let mut registry = self.registry.borrow_mut();
            let Some(task) = registry.get_mut(&id) else {
                return;
            };
            task.start(now);
            (
                task.task_type.clone(),
                task.data.clone(),
                task.attempts,
                task.timeout,
            )
        };

        let executor = self.registry.borrow().executors().get(&task_type);
        let Some(executor) = executor else {
            // Validated at insertion time; an executor cannot disappear
            // mid-flight in this crate's API, but fail safe rather than
            // panic if it somehow did.
            self.fail_task(&id, ExecutionError::ExecutorError(format!(
                "no executor registered for task type '{task_type}'"
            )));
            return;
        };

        let signal = AbortSignal::new();
        let on_progress = {
            let engine = Rc::clone(self);
            let progress_id = id.clone();
            Rc::new(move |progress: serde_json::Value| {
                // Invoke the task's own `onProgress` callback, if any,
                // before emitting the event — both see the same value
                // (§4.6, §3: "onProgress").
                if let Some(callback) = engine
                    .registry
                    .borrow()
                    .get(&progress_id)
                    .and_then(|task| task.on_progress.clone())
                {
                    callback.call(progress.clone());
                }
                engine.events.emit(SchedulerEvent::TaskProgress {
                    id: progress_id.clone(),
                    progress,
                });
            })
        };
        let should_yield = {
            let engine = Rc::clone(self);
            Rc::new(move || {
                engine.clock.now().duration_since(engine.current_frame_start.get())
                    >= engine.config.frame_time_budget
            })
        };
        let context =
            TaskContext::with_yield_check(signal.clone(), on_progress, should_yield, now);

        let future = executor(data, context);
        let deadline = timeout.map(|d| now + d);
        self.running.borrow_mut().insert(
            id.clone(),
            RunningAttempt {
                future,
                signal,
                deadline,
            },
        );

        self.events.emit(SchedulerEvent::TaskStarted { id, attempt });
    }

    fn poll_running_attempts(&self) {
        let now = self.clock.now();
        let ids: Vec<TaskId> = self.running.borrow().keys().cloned().collect();

        for id in ids {
            let timed_out = self
                .running
                .borrow()
                .get(&id)
                .and_then(|attempt| attempt.deadline)
                .map(|deadline| now >= deadline)
                .unwrap_or(false);

            if timed_out {
                if let Some(attempt) = self.running.borrow_mut().remove(&id) {
                    attempt.signal.abort();
                }
                self.finish_attempt(&id, Err(ExecutionError::Timeout));
                continue;
            }

            let poll_result = {
                let mut running = self.running.borrow_mut();
                let Some(attempt) = running.get_mut(&id) else {
                    continue;
                };
                let waker = futures::task::noop_waker_ref();
                let mut cx = Context::from_waker(waker);
                attempt.future.as_mut().poll(&mut cx)
            };

            if let Poll::Ready(result) = poll_result {
                self.running.borrow_mut().remove(&id);
                self.finish_attempt(&id, result);
            }
        }
    }

    fn finish_attempt(&self, id: &TaskId, result: ExecutorResult) {
        match result {
            Ok(value) => {
                let now = self.clock.now();
                {
                    let mut registry = self.registry.borrow_mut();
                    if let Some(task) = registry.get_mut(id) {
                        task.complete(value.clone(), now);
                    }
                }
                self.events.emit(SchedulerEvent::TaskCompleted {
                    id: id.clone(),
                    result: value,
                });
                self.cascade_ready(id);
            }
            Err(err) => self.handle_failure(id, err),
        }
    }

    fn handle_failure(&self, id: &TaskId, err: ExecutionError) {
        let now = self.clock.now();
        let retry_plan = {
            let mut registry = self.registry.borrow_mut();
            let Some(task) = registry.get_mut(id) else {
                return;
            };
            if err.is_retryable() && task.can_retry() {
                let delay = task
                    .retry_strategy
                    .delay_for_attempt(task.attempts, self.config.base_retry_delay);
                task.prepare_retry(delay, now);
                Some((task.attempts, delay))
            } else {
                None
            }
        };

        if let Some((attempt, delay)) = retry_plan {
            self.events.emit(SchedulerEvent::TaskRetry {
                id: id.clone(),
                attempt: attempt + 1,
                delay,
            });
            return;
        }

        if matches!(err, ExecutionError::Cancelled) {
            {
                let mut registry = self.registry.borrow_mut();
                if let Some(task) = registry.get_mut(id) {
                    task.cancel(now);
                }
            }
            self.events.emit(SchedulerEvent::TaskCancelled { id: id.clone() });
        } else {
            let cause = FailureCause::from(err);
            {
                let mut registry = self.registry.borrow_mut();
                if let Some(task) = registry.get_mut(id) {
                    task.fail(cause.clone(), now);
                }
            }
            self.events.emit(SchedulerEvent::TaskFailed {
                id: id.clone(),
                cause,
            });
        }

        self.cascade_failure(id);
    }

    fn fail_task(&self, id: &TaskId, err: ExecutionError) {
        let now = self.clock.now();
        let cause = FailureCause::from(err);
        {
            let mut registry = self.registry.borrow_mut();
            if let Some(task) = registry.get_mut(id) {
                task.fail(cause.clone(), now);
            }
        }
        self.events.emit(SchedulerEvent::TaskFailed {
            id: id.clone(),
            cause,
        });
        self.cascade_failure(id);
    }

    /// A dependent becomes ready once every one of its own dependencies
    /// has completed (§4.2).
    fn cascade_ready(&self, completed: &TaskId) {
        let dependents = self.registry.borrow().dependents_of(completed);
        for dependent in dependents {
            let all_deps_complete = {
                let registry = self.registry.borrow();
                registry
                    .get(&dependent)
                    .map(|task| {
                        task.dependencies.iter().all(|dep| {
                            registry
                                .get(dep)
                                .map(|d| d.status == TaskStatus::Completed)
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false)
            };
            if all_deps_complete {
                self.registry.borrow_mut().mark_ready(&dependent);
            }
        }
    }

    /// Walk every transitive dependent of a failed/cancelled task and
    /// fail it with `DependencyFailed`, layer by layer, so each
    /// dependent's cause names its own direct failed dependency rather
    /// than the root cause (§4.8).
    fn cascade_failure(&self, root: &TaskId) {
        let mut queue: VecDeque<(TaskId, TaskId)> = self
            .registry
            .borrow()
            .dependents_of(root)
            .into_iter()
            .map(|dependent| (dependent, root.clone()))
            .collect();

        while let Some((dependent, failed_dependency)) = queue.pop_front() {
            let now = self.clock.now();
            let should_cascade = {
                let mut registry = self.registry.borrow_mut();
                let already_terminal = registry
                    .get(&dependent)
                    .map(|task| task.status.is_terminal())
                    .unwrap_or(true);
                if already_terminal {
                    false
                } else {
                    registry.remove_from_ready(&dependent);
                    if let Some(task) = registry.get_mut(&dependent) {
                        task.fail(
                            FailureCause::DependencyFailed {
                                dependency: failed_dependency.clone(),
                            },
                            now,
                        );
                    }
                    true
                }
            };

            if should_cascade {
                self.events.emit(SchedulerEvent::TaskFailed {
                    id: dependent.clone(),
                    cause: FailureCause::DependencyFailed {
                        dependency: failed_dependency,
                    },
                });
                let next = self.registry.borrow().dependents_of(&dependent);
                queue.extend(next.into_iter().map(|d| (d, dependent.clone())));
            }
        }
    }

    /// Cancel a task directly (§4.9): a `Pending` task is pulled out of
    /// the ready queue immediately; a `Running` task is only aborted
    /// immediately if it is `interruptible` — otherwise the cancellation
    /// request is ignored and the task runs to its natural conclusion, a
    /// deliberate behavior documented in DESIGN.md.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        let now = self.clock.now();
        let status = self.registry.borrow().get(id).map(|t| t.status);
        match status {
            Some(TaskStatus::Pending) => {
                {
                    let mut registry = self.registry.borrow_mut();
                    registry.remove_from_ready(id);
                    if let Some(task) = registry.get_mut(id) {
                        task.cancel(now);
                    }
                }
                self.events.emit(SchedulerEvent::TaskCancelled { id: id.clone() });
                self.cascade_failure(id);
                true
            }
            Some(TaskStatus::Running) => {
                let interruptible = self
                    .registry
                    .borrow()
                    .get(id)
                    .map(|t| t.interruptible)
                    .unwrap_or(false);
                if !interruptible {
                    return false;
                }
                if let Some(attempt) = self.running.borrow_mut().remove(id) {
                    attempt.signal.abort();
                }
                {
                    let mut registry = self.registry.borrow_mut();
                    if let Some(task) = registry.get_mut(id) {
                        task.cancel(now);
                    }
                }
                self.events.emit(SchedulerEvent::TaskCancelled { id: id.clone() });
                self.cascade_failure(id);
                true
            }
            _ => false,
        }
    }
}
