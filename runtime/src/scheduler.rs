//! The process-wide root of the task tree.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;

use crate::TaskError;
use crate::job::{Job, JobState};
use crate::scope::{Scope, Shared};

/// Shared cooperative scheduler.
///
/// Constructed once at start-up around a tokio runtime handle and torn down
/// with [`Scheduler::shutdown`] at exit. Its root job plays the part of a
/// global scope: tasks launched on it have no parent other than the
/// scheduler itself.
#[derive(Clone, Debug)]
pub struct Scheduler {
    root: Arc<JobState>,
    shared: Arc<Shared>,
}

impl Scheduler {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            root: JobState::root("global"),
            shared: Arc::new(Shared {
                handle,
                live: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Scheduler on the runtime the caller is running in.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// The global scope.
    #[must_use]
    pub fn global(&self) -> Scope {
        Scope::new(Arc::clone(&self.root), Arc::clone(&self.shared))
    }

    /// Launch a top-level task.
    pub fn launch<F, Fut>(&self, name: impl Into<Cow<'static, str>>, body: F) -> Job
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.global().launch(name, body)
    }

    /// Number of spawned tasks that have not finished yet, at any depth.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.shared.live.load(Ordering::Relaxed)
    }

    /// Wait until every top-level task launched so far has completed.
    pub async fn wait_idle(&self) {
        self.root.children.close();
        self.root.children.wait().await;
        self.root.children.reopen();
    }

    /// Cancel everything and wait up to `grace` for it to unwind.
    ///
    /// Returns `false` when some task was still running at the end of the
    /// grace period, e.g. a busy loop that never reaches a check point.
    pub async fn shutdown(self, grace: Duration) -> bool {
        tracing::info!(live = self.active_tasks(), "scheduler shutting down");
        self.root.token.cancel();
        self.root.children.close();
        let finished = tokio::time::timeout(grace, self.root.children.wait())
            .await
            .is_ok();
        if !finished {
            tracing::warn!(
                live = self.active_tasks(),
                "tasks still running after shutdown grace period"
            );
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_suspended_tasks() {
        let scheduler = Scheduler::current();
        let jobs: Vec<Job> = (0..5)
            .map(|i| {
                scheduler.launch(format!("sleeper-{i}"), |scope| async move {
                    scope.delay(Duration::from_secs(3600)).await
                })
            })
            .collect();

        tokio::task::yield_now().await;
        assert_eq!(scheduler.active_tasks(), 5);

        let observer = scheduler.clone();
        assert!(scheduler.shutdown(Duration::from_secs(1)).await);
        assert_eq!(observer.active_tasks(), 0);
        assert!(jobs.iter().all(|job| job.is_completed() && job.is_cancelled()));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_returns_once_top_level_tasks_finish() {
        let scheduler = Scheduler::current();
        let job = scheduler.launch("short", |scope| async move {
            scope.delay(Duration::from_millis(250)).await
        });

        scheduler.wait_idle().await;
        assert!(job.is_completed());

        // The scheduler keeps accepting work afterwards.
        let again = scheduler.launch("again", |_| async { Ok(()) });
        scheduler.wait_idle().await;
        assert!(again.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn live_count_includes_nested_tasks() {
        let scheduler = Scheduler::current();
        let parent = scheduler.launch("parent", |scope| async move {
            for i in 0..3 {
                scope.launch(format!("child-{i}"), |scope| async move {
                    scope.delay(Duration::from_secs(1)).await
                });
            }
            Ok(())
        });

        tokio::task::yield_now().await;
        assert_eq!(scheduler.active_tasks(), 4);
        parent.join().await;
        assert_eq!(scheduler.active_tasks(), 0);
    }
}
