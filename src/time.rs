//! Injectable time sources (§9 design note: "all time sources... are
//! injected so tests can mock them; do not hard-wire to a specific host
//! API").

use std::time::Instant;

/// A monotonic clock. The scheduler never reads wall time directly —
/// every `now()` call in `dispatcher.rs`/`retention.rs` goes through this
/// trait, so tests can substitute a manual clock and advance it
/// deterministically.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The real system clock, used unless a host supplies its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A frame callback: invoked with the timestamp of the current tick.
pub type FrameCallback = Box<dyn FnOnce(Instant)>;

/// The host's "call me back before next paint" contract (§1, §6). Only
/// this contract is assumed; the actual frame-scheduling primitive (e.g. a
/// browser's `requestAnimationFrame`) is the host's responsibility.
pub trait FramePump {
    /// Arrange for `callback` to run on (or before) the next frame.
    fn request_frame(&self, callback: FrameCallback);
}

/// A `FramePump` that invokes the callback immediately and synchronously.
///
/// Useful for hosts that want to drive the scheduler from their own loop
/// rather than receive frame callbacks (e.g. calling `Scheduler::tick`
/// directly from a `setInterval`-style driver).
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateFramePump;

impl FramePump for ImmediateFramePump {
    fn request_frame(&self, callback: FrameCallback) {
        callback(Instant::now());
    }
}

/// Test doubles for `Clock`/`FramePump`, kept as a regular (non-`cfg(test)`)
/// module so both this crate's unit tests and the crate-level
/// `tests/scheduler_tests.rs` integration suite can depend on them.
pub mod testing {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    /// A manual clock: `now()` returns a fixed base instant plus however
    /// far the test has explicitly advanced it.
    pub struct ManualClock {
        base: Instant,
        offset: Cell<Duration>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Cell::new(Duration::ZERO),
            }
        }

        pub fn advance(&self, by: Duration) {
            self.offset.set(self.offset.get() + by);
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + self.offset.get()
        }
    }

    /// A `FramePump` that only fires when the test explicitly calls
    /// `fire()`, instead of on every `request_frame` call. Lets a test
    /// drive exactly one frame tick at a time, independent of the
    /// scheduler's self-rearming loop.
    #[derive(Default)]
    pub struct ManualFramePump {
        pending: RefCell<Vec<FrameCallback>>,
    }

    impl ManualFramePump {
        pub fn new() -> Self {
            Self {
                pending: RefCell::new(Vec::new()),
            }
        }

        /// Run every callback queued since the last `fire`, in order.
        pub fn fire(&self, now: Instant) {
            let callbacks: Vec<_> = self.pending.borrow_mut().drain(..).collect();
            for callback in callbacks {
                callback(now);
            }
        }

        pub fn pending_count(&self) -> usize {
            self.pending.borrow().len()
        }
    }

    impl FramePump for ManualFramePump {
        fn request_frame(&self, callback: FrameCallback) {
            self.pending.borrow_mut().push(callback);
        }
    }
}
