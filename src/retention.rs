//! Retention sweeping: periodically evict terminal tasks past their
//! retention period so the registry doesn't grow unbounded in a
//! long-running host (§4.9 supplemented feature — see SPEC_FULL.md §3).
//!
//! Grounded on the teacher's `jobs/scheduler.rs` interval bookkeeping,
//! which scans for jobs older than a configured TTL on a periodic timer.
//! That sweep runs on a `tokio::time::interval`; this one is driven off
//! the injected `Clock`, checked once per dispatcher tick rather than on
//! its own timer task, since there is no runtime to own a second task.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use crate::dispatcher::Engine;

/// Tracks when the next sweep is due and removes eligible tasks from the
/// registry when it fires.
pub(crate) struct RetentionSweeper {
    next_sweep_at: Cell<Instant>,
}

impl RetentionSweeper {
    pub fn new(now: Instant) -> Self {
        Self {
            next_sweep_at: Cell::new(now),
        }
    }

    /// Run a sweep if due. A no-op if `retention_period` is `None`.
    pub fn maybe_sweep(&self, engine: &Rc<Engine>) {
        let Some(retention_period) = engine.config.retention_period else {
            return;
        };

        let now = engine.clock.now();
        if now < self.next_sweep_at.get() {
            return;
        }
        self.next_sweep_at
            .set(now + engine.config.retention_sweep_interval);

        let expired: Vec<_> = engine
            .registry
            .borrow()
            .iter()
            .filter(|task| {
                task.status.is_terminal()
                    && task
                        .finished_at
                        .map(|finished| now.duration_since(finished) >= retention_period)
                        .unwrap_or(false)
            })
            .map(|task| task.id.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        tracing::debug!(count = expired.len(), "sweeping retained terminal tasks");
        let mut registry = engine.registry.borrow_mut();
        for id in &expired {
            registry.remove(id);
        }
    }
}
