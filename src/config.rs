//! Scheduler configuration (§9 ambient stack: plain struct + `Default`,
//! no file/env loading — wiring configuration sources into this struct is
//! the host's job).

use std::time::Duration;

/// Tunables for a `Scheduler` instance. Every field maps directly onto a
/// spec.md §1/§4 knob; none of them have a "zero means unlimited" special
/// case except `queue_size_limit`, which is explicitly optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum tasks started per frame (§4.5).
    pub max_tasks_per_frame: usize,

    /// Soft wall-clock budget per frame; the dispatcher stops starting new
    /// tasks once this is exceeded, even if `max_tasks_per_frame` has not
    /// been reached (§4.5).
    pub frame_time_budget: Duration,

    /// Maximum number of tasks with status `Running` at once (§4.5).
    pub max_concurrent_tasks: usize,

    /// How long a terminal task is kept in the registry before the
    /// retention sweeper removes it. `None` disables sweeping.
    pub retention_period: Option<Duration>,

    /// How often the retention sweeper runs (§9 Open Question: exposed as
    /// config rather than hard-coded, since spec.md left the interval
    /// unspecified).
    pub retention_sweep_interval: Duration,

    /// Maximum number of tasks the registry will hold at once (pending,
    /// running, or terminal-but-not-yet-swept). `None` disables the limit.
    pub queue_size_limit: Option<usize>,

    /// Base delay used by `RetryStrategy::Fixed`/`Exponential`.
    pub base_retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_frame: 10,
            frame_time_budget: Duration::from_millis(16),
            max_concurrent_tasks: 5,
            retention_period: Some(Duration::from_secs(60)),
            retention_sweep_interval: Duration::from_secs(10),
            queue_size_limit: None,
            base_retry_delay: Duration::from_millis(100),
        }
    }
}
