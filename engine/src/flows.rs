//! The demo flows. Each is an independent script against the shared runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tasklab_runtime::{Job, Scope, TaskError};
use tasklab_types::{DemoTimings, LaunchOutcome};

use crate::console::{Console, UiEvent};

pub(crate) const TAG: &str = "Demos";

// ============================================================================
// Launch: delay, then a time-boxed maths loop
// ============================================================================

pub(crate) async fn maths_job(
    scope: Scope,
    console: Console,
    timings: DemoTimings,
) -> Result<LaunchOutcome, TaskError> {
    console.log(
        TAG,
        format!(
            "launched job and takes a delay of {}",
            fmt_duration(timings.launch_delay)
        ),
    );
    if scope.delay(timings.launch_delay).await.is_err() {
        console.log(TAG, LaunchOutcome::Cancelled.message());
        return Ok(LaunchOutcome::Cancelled);
    }
    console.log(
        TAG,
        format!("{} passed", fmt_duration(timings.launch_delay)),
    );

    let loop_console = console.clone();
    let result = scope
        .with_timeout(timings.math_timeout, move |inner| async move {
            let mut i = 0;
            // The only check point inside the loop is the polled flag.
            while i < timings.math_iterations && inner.is_active() {
                loop_console.log(TAG, format!("doing maths {i}"));
                i += 1;
            }
            // Without this suspension the deadline can never surface as a timeout.
            inner.delay(timings.math_tail_delay).await
        })
        .await;

    let outcome = match result {
        Ok(()) if scope.is_active() => LaunchOutcome::Done,
        Ok(()) | Err(TaskError::Cancelled) => LaunchOutcome::Cancelled,
        Err(TaskError::Timeout(_)) => LaunchOutcome::TimedOut,
    };
    console.log(TAG, outcome.message());
    Ok(outcome)
}

// ============================================================================
// Cancel Launch
// ============================================================================

pub(crate) async fn cancel_job(
    scope: Scope,
    console: Console,
    target: Job,
) -> Result<(), TaskError> {
    console.log(TAG, "cancelling the job launched");
    target.cancel();
    scope.join(&target).await?;
    console.log(TAG, "the job launched has been cancelled");
    Ok(())
}

// ============================================================================
// Async: doubling compute job plus a waiter
// ============================================================================

pub(crate) async fn doubling(
    scope: Scope,
    console: Console,
    steps: u32,
    step: Duration,
) -> Result<u64, TaskError> {
    let mut i: u64 = 1;
    for _ in 0..steps {
        i += i;
        scope.delay(step).await?;
        console.log(TAG, format!("i = {i}"));
    }
    Ok(i)
}

// ============================================================================
// Join: explicit join, then an implicit one through a scope
// ============================================================================

pub(crate) async fn join_demo(
    scope: Scope,
    global: Scope,
    console: Console,
    timings: DemoTimings,
) -> Result<(), TaskError> {
    // Launched on the global scope: not a child of this job.
    let child_console = console.clone();
    let child = global.launch("join-child", move |child| async move {
        child.delay(timings.join_child_delay).await?;
        child_console.print("2");
        Ok(())
    });
    console.print("1");
    scope.join(&child).await?;
    console.print("3");

    let scoped_console = console.clone();
    scope
        .scope(move |inner| async move {
            let child_console = scoped_console.clone();
            inner.launch("scoped-child", move |child| async move {
                child.delay(timings.scoped_child_delay).await?;
                child_console.print("5");
                Ok(())
            });
            scoped_console.print("4");
            Ok(())
        })
        .await?;
    console.print("6");
    Ok(())
}

// ============================================================================
// Coroutine Scope: loose child vs. structured scope
// ============================================================================

pub(crate) async fn scope_demo(
    scope: Scope,
    console: Console,
    timings: DemoTimings,
) -> Result<(), TaskError> {
    // Child of this job but not of the scope below, so the scope exits first.
    let loose_console = console.clone();
    scope.launch("loose-child", move |child| async move {
        child.delay(timings.scope_loose_child).await?;
        loose_console.print("5");
        Ok(())
    });

    let inner_console = console.clone();
    scope
        .scope(move |inner| async move {
            let child_console = inner_console.clone();
            inner.launch("scoped-child", move |child| async move {
                child.delay(timings.scope_inner_child).await?;
                child_console.print("3");
                Ok(())
            });
            inner.delay(timings.scope_body_delay).await?;
            inner_console.print("2");
            Ok(())
        })
        .await?;

    // Not reached before "3": the scope waits for its child.
    console.print("4");
    Ok(())
}

// ============================================================================
// Many Coroutines
// ============================================================================

/// Shared counter incremented without synchronization.
///
/// The read and the write are separate atomic operations, so concurrent
/// increments from different worker threads can be lost. The lost updates are
/// what the bulk demo shows; the atomics only keep them free of undefined
/// behavior.
#[derive(Debug, Default)]
pub struct RacyCounter(AtomicU64);

impl RacyCounter {
    /// `i++`: returns the value seen before the increment.
    pub fn post_increment(&self) -> u64 {
        let seen = self.0.load(Ordering::Relaxed);
        self.0.store(seen + 1, Ordering::Relaxed);
        seen
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// What the bulk run observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkSummary {
    pub spawned: u32,
    /// Tasks that reached their reporting step. Counted with a proper atomic
    /// increment so it is exact.
    pub reported: u32,
    /// Final value of the racy counter; at most `reported`.
    pub counter: u64,
}

pub(crate) async fn many_coroutines(
    scope: Scope,
    console: Console,
    timings: DemoTimings,
) -> Result<BulkSummary, TaskError> {
    let counter = Arc::new(RacyCounter::default());
    let reported = Arc::new(AtomicU32::new(0));
    let max_delay = timings.bulk_max_delay;

    let task_counter = Arc::clone(&counter);
    let task_reported = Arc::clone(&reported);
    let task_console = console.clone();
    scope
        .scope(move |bulk| async move {
            for _ in 0..timings.bulk_tasks {
                let counter = Arc::clone(&task_counter);
                let reported = Arc::clone(&task_reported);
                let console = task_console.clone();
                bulk.launch("bulk-task", move |task| async move {
                    let delay = random_delay(max_delay);
                    console.print(format!("delay = {}", delay.as_millis()));
                    task.delay(delay).await?;
                    console.print(counter.post_increment().to_string());
                    reported.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                });
            }
            Ok(())
        })
        .await?;

    let summary = BulkSummary {
        spawned: timings.bulk_tasks,
        reported: reported.load(Ordering::Relaxed),
        counter: counter.get(),
    };
    console.log(
        TAG,
        format!(
            "{} coroutines finished, {} reported, counter = {}",
            summary.spawned, summary.reported, summary.counter
        ),
    );
    Ok(summary)
}

/// Uniform in `[0, max)`.
fn random_delay(max: Duration) -> Duration {
    max.mul_f64(rand::random::<f64>())
}

fn fmt_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 && duration.as_secs() > 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Post a computed value to the UI loop.
pub(crate) fn deliver_async_result(console: &Console, value: u64) {
    console.log(TAG, format!("math work finished result = {value}"));
    console.post(UiEvent::AsyncResult(value));
}
