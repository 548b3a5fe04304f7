//! Synchronous event emission (§4.10).
//!
//! The teacher dispatches domain events over a `tokio::sync::broadcast`
//! channel, which is the wrong shape here: broadcast channels drop
//! lagging receivers and give no way to `off` a specific listener. The
//! scheduler instead keeps an ordered, synchronous listener registry and
//! calls every listener in registration order on the thread that produced
//! the event (§1: "single-threaded... synchronous").

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::task::{FailureCause, Priority, TaskId};

/// A scheduler lifecycle event, passed by value to every registered
/// listener (§4.10).
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    TaskAdded {
        id: TaskId,
        priority: Priority,
    },
    TaskStarted {
        id: TaskId,
        attempt: u32,
    },
    TaskProgress {
        id: TaskId,
        progress: Value,
    },
    TaskCompleted {
        id: TaskId,
        result: Value,
    },
    TaskFailed {
        id: TaskId,
        cause: FailureCause,
    },
    TaskCancelled {
        id: TaskId,
    },
    TaskRetry {
        id: TaskId,
        attempt: u32,
        delay: std::time::Duration,
    },
}

impl SchedulerEvent {
    /// The event name as used by `Scheduler::on`/`off` (spec.md §4.10's
    /// `SCREAMING_SNAKE_CASE` event names).
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskAdded { .. } => "TASK_ADDED",
            Self::TaskStarted { .. } => "TASK_STARTED",
            Self::TaskProgress { .. } => "TASK_PROGRESS",
            Self::TaskCompleted { .. } => "TASK_COMPLETED",
            Self::TaskFailed { .. } => "TASK_FAILED",
            Self::TaskCancelled { .. } => "TASK_CANCELLED",
            Self::TaskRetry { .. } => "TASK_RETRY",
        }
    }
}

/// An opaque handle returned by `EventEmitter::on`, passed back to `off` to
/// remove exactly that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&SchedulerEvent)>;

/// Ordered, synchronous listener registry, keyed by event name.
///
/// Listeners are `Rc<dyn Fn>` rather than `Box<dyn FnMut>` so a listener
/// can itself call back into the scheduler (e.g. `get_task_status`)
/// without needing a second mutable borrow of the emitter.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RefCell<HashMap<&'static str, Vec<(ListenerId, Listener)>>>,
    next_id: std::cell::Cell<u64>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for every event named `event_name`. Returns a
    /// handle that can be passed to `off` later.
    pub fn on(
        &self,
        event_name: &'static str,
        listener: impl Fn(&SchedulerEvent) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.listeners
            .borrow_mut()
            .entry(event_name)
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    /// Remove a previously registered listener. A no-op if `id` is unknown
    /// or already removed.
    pub fn off(&self, event_name: &str, id: ListenerId) {
        if let Some(listeners) = self.listeners.borrow_mut().get_mut(event_name) {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    /// Emit `event` to every listener registered for its name, in
    /// registration order. A listener that panics is caught and logged
    /// rather than aborting the remaining listeners or the dispatcher
    /// tick that produced the event.
    pub fn emit(&self, event: SchedulerEvent) {
        let name = event.name();
        let listeners = match self.listeners.borrow().get(name) {
            Some(listeners) => listeners.clone(),
            None => return,
        };
        for (_, listener) in listeners {
            let event = event.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(&event);
            }));
            if result.is_err() {
                tracing::warn!(event = name, "event listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn listeners_are_called_in_registration_order() {
        let emitter = EventEmitter::new();
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let order1 = order.clone();
        emitter.on("TASK_ADDED", move |_| order1.borrow_mut().push(1));
        let order2 = order.clone();
        emitter.on("TASK_ADDED", move |_| order2.borrow_mut().push(2));

        emitter.emit(SchedulerEvent::TaskAdded {
            id: TaskId::from("t1"),
            priority: Priority::Normal,
        });

        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn off_removes_only_the_targeted_listener() {
        let emitter = EventEmitter::new();
        let calls = Rc::new(StdRefCell::new(0));

        let calls1 = calls.clone();
        let id1 = emitter.on("TASK_CANCELLED", move |_| *calls1.borrow_mut() += 1);
        let calls2 = calls.clone();
        emitter.on("TASK_CANCELLED", move |_| *calls2.borrow_mut() += 10);

        emitter.off("TASK_CANCELLED", id1);
        emitter.emit(SchedulerEvent::TaskCancelled {
            id: TaskId::from("t1"),
        });

        assert_eq!(*calls.borrow(), 10);
    }

    #[test]
    fn listeners_only_fire_for_their_own_event_name() {
        let emitter = EventEmitter::new();
        let calls = Rc::new(StdRefCell::new(0));
        let calls1 = calls.clone();
        emitter.on("TASK_COMPLETED", move |_| *calls1.borrow_mut() += 1);

        emitter.emit(SchedulerEvent::TaskStarted {
            id: TaskId::from("t1"),
            attempt: 1,
        });

        assert_eq!(*calls.borrow(), 0);
    }
}
