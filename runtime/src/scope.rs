//! The context a task body runs in.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::TaskError;
use crate::job::{CompletionGuard, Deferred, Job, JobState};

/// Runtime-wide pieces every scope carries.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) handle: Handle,
    pub(crate) live: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn expired(self) -> bool {
        Instant::now() >= self.at
    }

    fn earliest(self, other: Option<Deadline>) -> Self {
        match other {
            Some(other) if other.at < self.at => other,
            _ => self,
        }
    }
}

/// Context handed to every task body.
///
/// Tasks launched from a scope are children of its job. A scope created by
/// [`Scope::with_timeout`] carries a deadline that every nested scope
/// inherits.
#[derive(Clone)]
pub struct Scope {
    job: Arc<JobState>,
    deadline: Option<Deadline>,
    shared: Arc<Shared>,
}

impl Scope {
    pub(crate) fn new(job: Arc<JobState>, shared: Arc<Shared>) -> Self {
        Self {
            job,
            deadline: None,
            shared,
        }
    }

    fn nested(&self, job: Arc<JobState>) -> Self {
        Self {
            job,
            deadline: self.deadline,
            shared: Arc::clone(&self.shared),
        }
    }

    // ------------------------------------------------------------------------
    // Cancellation checks
    // ------------------------------------------------------------------------

    /// Polled flag: false once the job is cancelled or the enclosing deadline
    /// has passed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.job.token.is_cancelled() && !self.deadline.is_some_and(Deadline::expired)
    }

    /// Check point: fails with the reason the scope stopped being active.
    pub fn ensure_active(&self) -> Result<(), TaskError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(self.interruption())
        }
    }

    fn interruption(&self) -> TaskError {
        match self.deadline {
            Some(deadline) if deadline.expired() => TaskError::Timeout(deadline.budget),
            _ => TaskError::Cancelled,
        }
    }

    // ------------------------------------------------------------------------
    // Suspension points
    // ------------------------------------------------------------------------

    /// Run `fut` as a suspension point: refuse to start when inactive, and
    /// abandon it as soon as the job is cancelled or the inherited deadline
    /// passes.
    pub async fn suspend<F: Future>(&self, fut: F) -> Result<F::Output, TaskError> {
        self.ensure_active()?;
        tokio::select! {
            biased;
            () = self.job.token.cancelled() => Err(self.interruption()),
            () = deadline_elapsed(self.deadline) => Err(self.interruption()),
            out = fut => Ok(out),
        }
    }

    pub async fn delay(&self, duration: Duration) -> Result<(), TaskError> {
        self.suspend(tokio::time::sleep(duration)).await
    }

    /// Give other tasks a turn, checking for cancellation on the way.
    pub async fn yield_now(&self) -> Result<(), TaskError> {
        self.suspend(tokio::task::yield_now()).await
    }

    /// Wait for another job to complete.
    pub async fn join(&self, job: &Job) -> Result<(), TaskError> {
        self.suspend(job.join()).await
    }

    /// Wait for a deferred value.
    pub async fn await_deferred<T>(&self, deferred: Deferred<T>) -> Result<T, TaskError> {
        self.suspend(deferred.await_result()).await?
    }

    // ------------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------------

    /// Launch a child task. The returned handle can be joined or cancelled;
    /// this scope's job will not complete before the child does.
    pub fn launch<F, Fut>(&self, name: impl Into<Cow<'static, str>>, body: F) -> Job
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.spawn_job(name, body, |_| {})
    }

    /// Launch a child task that produces a value.
    pub fn spawn_async<T, F, Fut>(
        &self,
        name: impl Into<Cow<'static, str>>,
        body: F,
    ) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = self.spawn_job(name, body, move |outcome| {
            // The receiver may already be gone; nobody wants the value then.
            let _ = tx.send(outcome);
        });
        Deferred::new(job, rx)
    }

    fn spawn_job<T, F, Fut, D>(
        &self,
        name: impl Into<Cow<'static, str>>,
        body: F,
        deliver: D,
    ) -> Job
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        D: FnOnce(Result<T, TaskError>) + Send + 'static,
    {
        let state = self.job.child(name);
        let fut = body(self.nested(Arc::clone(&state)));
        let guard = CompletionGuard::new(Arc::clone(&state), Arc::clone(&self.shared.live));
        let task_state = Arc::clone(&state);
        let deadline = self.deadline;

        self.job.children.spawn_on(
            async move {
                let _guard = guard;
                let outcome = fut.await;
                if let Err(err) = &outcome {
                    tracing::debug!(job = %task_state.name(), %err, "job body stopped");
                }
                deliver(settle(&task_state, deadline, outcome).await);
            },
            &self.shared.handle,
        );

        Job::new(state)
    }

    /// Structured scope: run `body` inline, then wait for every task launched
    /// inside it before returning. Tasks launched from an enclosing scope are
    /// not waited on here.
    pub async fn scope<T, F, Fut>(&self, body: F) -> Result<T, TaskError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        self.ensure_active()?;
        let state = self.job.child("scope");
        let outcome = body(self.nested(Arc::clone(&state))).await;
        settle(&state, self.deadline, outcome).await
    }

    /// Time-boxed operation.
    ///
    /// The deadline covers the whole subtree: every suspension point inside
    /// it, including those of launched children and the final join on them,
    /// fails with [`TaskError::Timeout`] once the deadline has passed. The
    /// operation also races a timer; when the timer wins, the subtree is
    /// cancelled and the result is a timeout. The timer can only win while
    /// the operation is suspended, so an operation that never suspends after
    /// the deadline returns normally. Polling loops still see
    /// [`Scope::is_active`] turn false once the deadline has passed.
    pub async fn with_timeout<T, F, Fut>(&self, budget: Duration, body: F) -> Result<T, TaskError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        self.ensure_active()?;
        let deadline = Deadline::after(budget).earliest(self.deadline);
        let state = self.job.child("with_timeout");
        let scope = Scope {
            job: Arc::clone(&state),
            deadline: Some(deadline),
            shared: Arc::clone(&self.shared),
        };

        let mut op = pin!(body(scope));
        let outcome = tokio::select! {
            biased;
            out = &mut op => out,
            () = tokio::time::sleep_until(deadline.at) => {
                tracing::debug!(?budget, "deadline elapsed, cancelling time-boxed operation");
                state.token.cancel();
                match op.await {
                    Ok(_) | Err(TaskError::Cancelled) if !self.job.token.is_cancelled() => {
                        Err(TaskError::Timeout(deadline.budget))
                    }
                    out => out,
                }
            }
        };

        settle(&state, Some(deadline), outcome).await
    }
}

/// Join every child registered with `state`, then mark it completed.
///
/// Joining is a suspension point: once `deadline` passes the children are
/// cancelled, and a join that ends after the deadline turns success into
/// [`TaskError::Timeout`].
async fn settle<T>(
    state: &JobState,
    deadline: Option<Deadline>,
    outcome: Result<T, TaskError>,
) -> Result<T, TaskError> {
    let joins_children = !state.children.is_empty();
    tokio::select! {
        biased;
        () = state.settle_children(outcome.is_err()) => {}
        () = deadline_elapsed(deadline) => {
            tracing::debug!(job = %state.name(), "deadline elapsed while joining children");
            state.settle_children(true).await;
        }
    }
    state.mark_completed();

    match (outcome, deadline) {
        (Ok(_), Some(deadline)) if joins_children && deadline.expired() => {
            Err(TaskError::Timeout(deadline.budget))
        }
        (outcome, _) => outcome,
    }
}

async fn deadline_elapsed(deadline: Option<Deadline>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.at).await,
        None => std::future::pending::<()>().await,
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("job", &self.job)
            .field("deadline", &self.deadline.map(|d| d.budget))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::Scheduler;

    type Markers = Arc<Mutex<Vec<&'static str>>>;

    fn markers() -> Markers {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn mark(markers: &Markers, marker: &'static str) {
        markers.lock().unwrap().push(marker);
    }

    #[tokio::test(start_paused = true)]
    async fn launched_job_completes_after_join() {
        let scheduler = Scheduler::current();
        let job = scheduler.launch("sleeper", |scope| async move {
            scope.delay(Duration::from_secs(1)).await
        });

        assert!(job.is_active());
        job.join().await;
        assert!(job.is_completed());
        assert!(!job.is_cancelled());
        assert!(!job.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_completes_only_after_children() {
        let scheduler = Scheduler::current();
        let (tx, rx) = oneshot::channel();
        let parent = scheduler.launch("parent", move |scope| async move {
            let child = scope.launch("child", |scope| async move {
                scope.delay(Duration::from_secs(5)).await
            });
            let _ = tx.send(child);
            Ok(())
        });

        let child = rx.await.unwrap();
        parent.join().await;
        assert!(child.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_join_stops_further_work() {
        let scheduler = Scheduler::current();
        let ticks = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&ticks);
        let job = scheduler.launch("ticker", move |scope| async move {
            while scope.is_active() {
                scope.delay(Duration::from_millis(10)).await?;
                counted.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(105)).await;
        job.cancel_and_join().await;
        assert!(job.is_completed());
        assert!(job.is_cancelled());

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 9, "ticker should have run before cancel, saw {seen}");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_completed_job_is_a_no_op() {
        let scheduler = Scheduler::current();
        let job = scheduler.launch("quick", |_| async { Ok(()) });
        job.join().await;
        job.cancel();
        assert!(job.is_completed());
        assert!(!job.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn busy_loop_ignores_cancellation_until_check_point() {
        let scheduler = Scheduler::current();
        let iterations = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&iterations);
        let (started_tx, started_rx) = oneshot::channel();
        let job = scheduler.launch("busy", move |scope| async move {
            let _ = started_tx.send(());
            for _ in 0..40 {
                std::thread::sleep(Duration::from_millis(2));
                counted.fetch_add(1, Ordering::SeqCst);
            }
            scope.yield_now().await?;
            counted.fetch_add(1000, Ordering::SeqCst);
            Ok(())
        });

        started_rx.await.unwrap();
        job.cancel_and_join().await;
        assert_eq!(iterations.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn timeout_without_suspension_never_fires() {
        let scheduler = Scheduler::current();
        let scope = scheduler.global();
        for _ in 0..3 {
            let result = scope
                .with_timeout(Duration::from_millis(20), |_| async {
                    std::thread::sleep(Duration::from_millis(40));
                    Ok(7)
                })
                .await;
            assert_eq!(result, Ok(7));
        }
    }

    #[tokio::test]
    async fn timeout_fires_at_suspension_after_deadline() {
        let scheduler = Scheduler::current();
        let scope = scheduler.global();
        for _ in 0..3 {
            let result = scope
                .with_timeout(Duration::from_millis(20), |inner| async move {
                    std::thread::sleep(Duration::from_millis(40));
                    inner.delay(Duration::from_millis(1)).await?;
                    Ok(7)
                })
                .await;
            assert_eq!(result, Err(TaskError::Timeout(Duration::from_millis(20))));
        }
    }

    #[tokio::test]
    async fn polling_loop_observes_deadline() {
        let scheduler = Scheduler::current();
        let scope = scheduler.global();
        let result = scope
            .with_timeout(Duration::from_millis(30), |inner| async move {
                let mut rounds = 0_u32;
                while rounds < 10_000 && inner.is_active() {
                    std::thread::sleep(Duration::from_millis(1));
                    rounds += 1;
                }
                inner.delay(Duration::from_millis(1)).await?;
                Ok(rounds)
            })
            .await;
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_wins_against_suspended_operation() {
        let scheduler = Scheduler::current();
        let start = Instant::now();
        let result = scheduler
            .global()
            .with_timeout(Duration::from_millis(100), |inner| async move {
                inner.delay(Duration::from_secs(5)).await?;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(TaskError::Timeout(Duration::from_millis(100))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_value_within_budget() {
        let scheduler = Scheduler::current();
        let result = scheduler
            .global()
            .with_timeout(Duration::from_secs(1), |inner| async move {
                inner.delay(Duration::from_millis(10)).await?;
                Ok("fast")
            })
            .await;
        assert_eq!(result, Ok("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn outer_cancel_inside_timeout_is_not_a_timeout() {
        let scheduler = Scheduler::current();
        let (tx, rx) = oneshot::channel();
        let job = scheduler.launch("outer", move |scope| async move {
            let result = scope
                .with_timeout(Duration::from_secs(10), |inner| async move {
                    inner.delay(Duration::from_secs(60)).await
                })
                .await;
            let _ = tx.send(result);
            Ok(())
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        job.cancel_and_join().await;
        assert_eq!(rx.await.unwrap(), Err(TaskError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_covers_launched_children() {
        let scheduler = Scheduler::current();
        let start = Instant::now();
        let result = scheduler
            .global()
            .with_timeout(Duration::from_millis(100), |inner| async move {
                inner.launch("child", |scope| async move {
                    scope.delay(Duration::from_secs(5)).await
                });
                Ok(())
            })
            .await;

        assert_eq!(result, Err(TaskError::Timeout(Duration::from_millis(100))));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_inside_nested_scope_is_reported() {
        let scheduler = Scheduler::current();
        let start = Instant::now();
        let result = scheduler
            .global()
            .with_timeout(Duration::from_millis(100), |inner| async move {
                inner
                    .scope(|nested| async move {
                        nested.launch("child", |scope| async move {
                            scope.delay(Duration::from_secs(5)).await
                        });
                        Ok(())
                    })
                    .await
            })
            .await;

        assert_eq!(result, Err(TaskError::Timeout(Duration::from_millis(100))));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_waits_for_children_that_finish_in_budget() {
        let scheduler = Scheduler::current();
        let finished = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&finished);
        let result = scheduler
            .global()
            .with_timeout(Duration::from_secs(1), move |inner| async move {
                inner.launch("child", move |scope| async move {
                    scope.delay(Duration::from_millis(10)).await?;
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok("joined")
            })
            .await;

        assert_eq!(result, Ok("joined"));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_win_is_a_timeout_even_if_operation_succeeds() {
        let scheduler = Scheduler::current();
        let result = scheduler
            .global()
            .with_timeout(Duration::from_millis(100), |_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(TaskError::Timeout(Duration::from_millis(100))));
    }

    #[tokio::test(start_paused = true)]
    async fn structured_scope_waits_for_its_children_only() {
        let scheduler = Scheduler::current();
        let seen = markers();
        let recorded = Arc::clone(&seen);
        let outer = scheduler.launch("outer", move |scope| async move {
            let loose = Arc::clone(&recorded);
            scope.launch("loose", move |scope| async move {
                scope.delay(Duration::from_millis(900)).await?;
                mark(&loose, "5");
                Ok(())
            });

            let inner_markers = Arc::clone(&recorded);
            scope
                .scope(move |scope| async move {
                    let child = Arc::clone(&inner_markers);
                    scope.launch("inner", move |scope| async move {
                        scope.delay(Duration::from_millis(500)).await?;
                        mark(&child, "3");
                        Ok(())
                    });
                    scope.delay(Duration::from_millis(100)).await?;
                    mark(&inner_markers, "2");
                    Ok(())
                })
                .await?;

            mark(&recorded, "4");
            Ok(())
        });
        mark(&seen, "1");

        outer.join().await;
        assert_eq!(*seen.lock().unwrap(), ["1", "2", "3", "4", "5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_scope_cancels_its_children() {
        let scheduler = Scheduler::current();
        let finished = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&finished);
        let result: Result<(), TaskError> = scheduler
            .global()
            .scope(move |scope| async move {
                scope.launch("child", move |scope| async move {
                    scope.delay(Duration::from_secs(10)).await?;
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                scope.delay(Duration::from_millis(1)).await?;
                Err(TaskError::Timeout(Duration::from_millis(1)))
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_delivers_value_once() {
        let scheduler = Scheduler::current();
        let scope = scheduler.global();
        let deferred = scope.spawn_async("double", |scope| async move {
            let mut i = 1_u64;
            for _ in 0..10 {
                i += i;
                scope.delay(Duration::from_millis(300)).await?;
            }
            Ok(i)
        });

        let job = deferred.job().clone();
        assert_eq!(scope.await_deferred(deferred).await, Ok(1024));
        assert!(job.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_deferred_reports_cancellation() {
        let scheduler = Scheduler::current();
        let deferred = scheduler
            .global()
            .spawn_async("forever", |scope| async move {
                scope.delay(Duration::from_secs(3600)).await?;
                Ok(1)
            });

        deferred.job().cancel();
        assert_eq!(deferred.await_result().await, Err(TaskError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn join_inside_cancelled_task_is_interrupted() {
        let scheduler = Scheduler::current();
        let sleeper = scheduler.launch("sleeper", |scope| async move {
            scope.delay(Duration::from_secs(3600)).await
        });
        let (tx, rx) = oneshot::channel();
        let waiter_target = sleeper.clone();
        let waiter = scheduler.launch("waiter", move |scope| async move {
            let _ = tx.send(scope.join(&waiter_target).await);
            Ok(())
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        waiter.cancel_and_join().await;
        assert_eq!(rx.await.unwrap(), Err(TaskError::Cancelled));
        assert!(sleeper.is_active());
        sleeper.cancel_and_join().await;
    }
}
