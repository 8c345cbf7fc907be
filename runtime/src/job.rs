//! Job state and the public handles onto it.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::TaskError;

/// Shared state behind a [`Job`].
///
/// Invariant: `done` flips to `true` exactly once, after the body returned
/// and every task registered in `children` has finished.
pub(crate) struct JobState {
    name: Cow<'static, str>,
    pub(crate) token: CancellationToken,
    pub(crate) children: TaskTracker,
    done: watch::Sender<bool>,
}

impl JobState {
    pub(crate) fn root(name: impl Into<Cow<'static, str>>) -> Arc<Self> {
        Arc::new(Self::with_token(name.into(), CancellationToken::new()))
    }

    pub(crate) fn child(&self, name: impl Into<Cow<'static, str>>) -> Arc<Self> {
        Arc::new(Self::with_token(name.into(), self.token.child_token()))
    }

    fn with_token(name: Cow<'static, str>, token: CancellationToken) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            name,
            token,
            children: TaskTracker::new(),
            done,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_completed(&self) -> bool {
        *self.done.borrow()
    }

    pub(crate) fn mark_completed(&self) {
        self.done.send_replace(true);
    }

    /// Wait for every child registered so far. A failed body cancels its
    /// children first so the wait ends at their next suspension point.
    pub(crate) async fn settle_children(&self, failed: bool) {
        if failed {
            self.token.cancel();
        }
        self.children.close();
        self.children.wait().await;
    }
}

impl fmt::Debug for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobState")
            .field("name", &self.name)
            .field("cancelled", &self.token.is_cancelled())
            .field("completed", &self.is_completed())
            .field("children", &self.children.len())
            .finish()
    }
}

/// Marks a spawned job completed when its task ends, including by panic,
/// and keeps the scheduler-wide live task count honest.
pub(crate) struct CompletionGuard {
    state: Arc<JobState>,
    live: Arc<AtomicUsize>,
}

impl CompletionGuard {
    pub(crate) fn new(state: Arc<JobState>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self { state, live }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.state.mark_completed();
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Job
// ============================================================================

/// Handle to a launched task.
///
/// Cloning is cheap; every clone observes the same flags. Dropping the last
/// handle does not stop the task.
#[derive(Clone)]
pub struct Job {
    state: Arc<JobState>,
}

impl Job {
    pub(crate) fn new(state: Arc<JobState>) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.state.name()
    }

    /// Neither completed nor cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_completed() && !self.is_cancelled()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// The body has returned and every child has finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    /// Request cancellation. The task stops at its next suspension point;
    /// cancelling a completed job has no effect.
    pub fn cancel(&self) {
        if self.is_completed() {
            return;
        }
        tracing::debug!(job = %self.name(), "cancellation requested");
        self.state.token.cancel();
    }

    /// Wait until the job has completed, however it ended.
    pub async fn join(&self) {
        let mut done = self.state.done.subscribe();
        // The sender lives in `self.state`, so the channel cannot close here.
        let _ = done.wait_for(|completed| *completed).await;
    }

    /// Cancel, then wait for the job to finish unwinding.
    pub async fn cancel_and_join(&self) {
        self.cancel();
        self.join().await;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Job").field(&self.state).finish()
    }
}

// ============================================================================
// Deferred
// ============================================================================

/// A job that produces a value.
///
/// [`Deferred::await_result`] consumes the handle, so the value is delivered
/// exactly once.
pub struct Deferred<T> {
    job: Job,
    result: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Deferred<T> {
    pub(crate) fn new(job: Job, result: oneshot::Receiver<Result<T, TaskError>>) -> Self {
        Self { job, result }
    }

    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Wait for the value. A task that died without producing one (panic)
    /// reports [`TaskError::Cancelled`].
    pub async fn await_result(self) -> Result<T, TaskError> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => {
                self.job.join().await;
                Err(TaskError::Cancelled)
            }
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("job", &self.job).finish()
    }
}
