//! Delays, counts and deadlines used by the demo flows.
//!
//! Defaults reproduce the classic coroutine walkthrough: a 3 s launch delay,
//! a 100 ms maths deadline, 300 ms async steps and 100,000 bulk tasks.

use std::time::Duration;

/// Resolved timings for every flow. Existence of a value is the proof of its
/// validity; the config loader clamps raw values at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoTimings {
    /// Launch: sleep before entering the time-boxed maths job.
    pub launch_delay: Duration,
    /// Launch: upper bound on maths loop iterations.
    pub math_iterations: u32,
    /// Launch: deadline of the time-boxed operation.
    pub math_timeout: Duration,
    /// Launch: trailing suspension inside the time-boxed operation.
    pub math_tail_delay: Duration,
    /// Async: number of doubling steps.
    pub async_steps: u32,
    /// Async: suspension between doubling steps.
    pub async_step: Duration,
    /// Join: delay before the global child prints "2".
    pub join_child_delay: Duration,
    /// Join: delay before the scoped child prints "5".
    pub scoped_child_delay: Duration,
    /// CoroutineScope: delay of the loose child printing "5".
    pub scope_loose_child: Duration,
    /// CoroutineScope: delay of the child launched inside the scope, printing "3".
    pub scope_inner_child: Duration,
    /// CoroutineScope: delay of the scope body before printing "2".
    pub scope_body_delay: Duration,
    /// ManyCoroutines: number of tasks.
    pub bulk_tasks: u32,
    /// ManyCoroutines: exclusive upper bound of each task's random delay.
    pub bulk_max_delay: Duration,
}

impl Default for DemoTimings {
    fn default() -> Self {
        Self {
            launch_delay: Duration::from_secs(3),
            math_iterations: 10_000,
            math_timeout: Duration::from_millis(100),
            math_tail_delay: Duration::from_millis(1),
            async_steps: 10,
            async_step: Duration::from_millis(300),
            join_child_delay: Duration::from_secs(1),
            scoped_child_delay: Duration::from_secs(2),
            scope_loose_child: Duration::from_millis(900),
            scope_inner_child: Duration::from_millis(500),
            scope_body_delay: Duration::from_millis(100),
            bulk_tasks: 100_000,
            bulk_max_delay: Duration::from_secs(1),
        }
    }
}
