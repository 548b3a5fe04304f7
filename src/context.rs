//! Per-attempt task context: cooperative cancellation signal and progress
//! reporting, handed to an executor for the lifetime of one attempt
//! (§4.6).
//!
//! The teacher signals cancellation to a running job via
//! `tokio::sync::watch`, which is an async-aware primitive. Since this
//! scheduler never spawns onto a runtime (see DESIGN.md), cancellation
//! here is a plain synchronous flag plus a listener list that the
//! dispatcher drains on every cancellation, and that an executor polls
//! from inside its future via `should_abort`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use serde_json::Value;

/// Shared, cloneable handle to a single attempt's abort state.
///
/// An executor that wants to cooperate with cancellation checks
/// `should_abort()` at safe points, or registers a listener via
/// `on_abort` to react immediately (§4.6: "interruptible tasks must
/// observe the signal promptly; non-interruptible tasks may ignore it").
#[derive(Clone)]
pub struct AbortSignal {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    aborted: bool,
    listeners: Vec<Box<dyn FnOnce()>>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner::default())),
        }
    }

    pub fn should_abort(&self) -> bool {
        self.inner.borrow().aborted
    }

    /// Register a callback to run exactly once, synchronously, the moment
    /// `abort` is called. If the signal is already aborted, the callback
    /// runs immediately instead of being queued.
    pub fn on_abort(&self, callback: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        if inner.aborted {
            drop(inner);
            callback();
        } else {
            inner.listeners.push(Box::new(callback));
        }
    }

    /// Flip the signal and synchronously run every registered listener,
    /// in registration order. Called by the dispatcher when a running
    /// task's timeout elapses or it is cancelled (§4.6, §4.7).
    pub fn abort(&self) {
        let listeners = {
            let mut inner = self.inner.borrow_mut();
            if inner.aborted {
                return;
            }
            inner.aborted = true;
            std::mem::take(&mut inner.listeners)
        };
        for listener in listeners {
            listener();
        }
    }
}

/// Handed to an executor for the duration of one attempt. Carries the
/// attempt's cancellation signal, a progress-reporting callback, and the
/// cooperative-yield check (§4.6); the executor's `data` argument is
/// passed separately (see `executor.rs`).
pub struct TaskContext {
    pub signal: AbortSignal,
    on_progress: Rc<dyn Fn(Value)>,
    should_yield: Rc<dyn Fn() -> bool>,
    task_started_at: Instant,
}

impl TaskContext {
    pub fn new(signal: AbortSignal, on_progress: Rc<dyn Fn(Value)>) -> Self {
        Self::with_yield_check(signal, on_progress, Rc::new(|| false), Instant::now())
    }

    /// Full constructor used by the dispatcher, which supplies the real
    /// `should_yield` closure (tied to the current frame's budget) and the
    /// attempt's start time for introspection (§4.6: `taskStartedAt`).
    pub fn with_yield_check(
        signal: AbortSignal,
        on_progress: Rc<dyn Fn(Value)>,
        should_yield: Rc<dyn Fn() -> bool>,
        task_started_at: Instant,
    ) -> Self {
        Self {
            signal,
            on_progress,
            should_yield,
            task_started_at,
        }
    }

    pub fn should_abort(&self) -> bool {
        self.signal.should_abort()
    }

    /// Emit a `TASK_PROGRESS` event carrying an arbitrary progress value
    /// (§4.6, §4.10). Purely informational — it does not affect
    /// scheduling.
    pub fn report_progress(&self, progress: Value) {
        (self.on_progress)(progress);
    }

    /// Whether the current frame's dispatch budget has been exhausted.
    /// Purely advisory: the scheduler never preempts an executor based on
    /// this, it is only a hint for voluntarily breaking a long loop
    /// (§4.6, glossary: "cooperative yield").
    pub fn should_yield(&self) -> bool {
        (self.should_yield)()
    }

    /// When this attempt was started, for executor-side introspection
    /// (§4.6).
    pub fn task_started_at(&self) -> Instant {
        self.task_started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn abort_runs_listeners_once_in_order() {
        let signal = AbortSignal::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let order1 = order.clone();
        signal.on_abort(move || order1.borrow_mut().push(1));
        let order2 = order.clone();
        signal.on_abort(move || order2.borrow_mut().push(2));

        signal.abort();
        signal.abort(); // second call is a no-op

        assert_eq!(*order.borrow(), vec![1, 2]);
        assert!(signal.should_abort());
    }

    #[test]
    fn listener_registered_after_abort_runs_immediately() {
        let signal = AbortSignal::new();
        signal.abort();

        let called = Rc::new(Cell::new(false));
        let called2 = called.clone();
        signal.on_abort(move || called2.set(true));

        assert!(called.get());
    }

    #[test]
    fn should_yield_reflects_injected_closure() {
        let flag = Rc::new(Cell::new(false));
        let flag2 = flag.clone();
        let context = TaskContext::with_yield_check(
            AbortSignal::new(),
            Rc::new(|_| {}),
            Rc::new(move || flag2.get()),
            Instant::now(),
        );

        assert!(!context.should_yield());
        flag.set(true);
        assert!(context.should_yield());
    }

    #[test]
    fn report_progress_invokes_callback() {
        let received = Rc::new(RefCell::new(None));
        let received2 = received.clone();
        let context = TaskContext::new(
            AbortSignal::new(),
            Rc::new(move |value| *received2.borrow_mut() = Some(value)),
        );

        context.report_progress(serde_json::json!({"pct": 50}));
        assert_eq!(*received.borrow(), Some(serde_json::json!({"pct": 50})));
    }
}
