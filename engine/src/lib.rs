//! Demo orchestrator for tasklab.
//!
//! This crate contains the App state without TUI dependencies. The App owns
//! the UI-side state (counter, async-result field, transcript) and starts the
//! demo flows on the shared [`Scheduler`]. Flows never touch App state: they
//! report through a [`Console`], drained once per frame by
//! [`App::process_ui_events`].

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;

pub use tasklab_runtime::{Deferred, Job, Scheduler, Scope, TaskError};

pub use tasklab_config::{ConfigError, RuntimeSettings, TasklabConfig, UiMode};
pub use tasklab_types::{
    CancelOutcome, DemoTimings, LaunchOutcome, ThreadTag, Trigger, UnknownTrigger, ui::UiOptions,
};

mod console;
mod flows;
mod script;

pub use console::{Console, LineKind, TranscriptLine, UiEvent};
pub use flows::{BulkSummary, RacyCounter};
pub use script::{Script, ScriptError, Step};

/// Transcript lines kept for display; older lines are dropped.
const TRANSCRIPT_CAPACITY: usize = 2_000;

/// Upper bound on hand-off events applied per frame so a burst (the bulk demo
/// posts 200,000) cannot stall rendering.
const MAX_EVENTS_PER_FRAME: usize = 4_096;

const COUNTER_FIELD: &str = "counter";
const ASYNC_FIELD: &str = "async result";

pub struct App {
    scheduler: Scheduler,
    timings: DemoTimings,
    console: Console,
    events: mpsc::UnboundedReceiver<UiEvent>,
    /// Most recent Launch. Overwritten on every launch.
    launched: Option<Job>,
    counter: u64,
    async_result: String,
    transcript: VecDeque<TranscriptLine>,
    /// Lines not yet handed to a line-oriented front end.
    echo: Option<Vec<TranscriptLine>>,
    selected: usize,
    should_quit: bool,
    tick: usize,
    ui_options: UiOptions,
}

impl App {
    #[must_use]
    pub fn new(scheduler: Scheduler, timings: DemoTimings, ui_options: UiOptions) -> Self {
        let (console, events) = Console::new();
        Self {
            scheduler,
            timings,
            console,
            events,
            launched: None,
            counter: 0,
            async_result: String::new(),
            transcript: VecDeque::new(),
            echo: None,
            selected: 0,
            should_quit: false,
            tick: 0,
            ui_options,
        }
    }

    /// Keep every transcript line for [`App::take_echo`] as well.
    #[must_use]
    pub fn with_echo(mut self) -> Self {
        self.echo = Some(Vec::new());
        self
    }

    // ------------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------------

    pub fn trigger(&mut self, trigger: Trigger) {
        tracing::debug!(trigger = trigger.name(), "trigger");
        match trigger {
            Trigger::Launch => {
                self.launch();
            }
            Trigger::CancelLaunch => {
                self.cancel_launch();
            }
            Trigger::Async => self.start_async(),
            Trigger::AddOne => self.add_one(),
            Trigger::Join => {
                self.join_demo();
            }
            Trigger::CoroutineScope => {
                self.coroutine_scope_demo();
            }
            Trigger::ManyCoroutines => {
                self.many_coroutines();
            }
        }
    }

    /// Start the delayed-timeout maths job and track it as the current launch.
    pub fn launch(&mut self) -> Job {
        let console = self.console.clone();
        let timings = self.timings;
        let job = self.scheduler.launch("launch", move |scope| async move {
            flows::maths_job(scope, console, timings).await.map(drop)
        });
        self.launched = Some(job.clone());
        job
    }

    pub fn cancel_launch(&mut self) -> CancelOutcome {
        let outcome = match &self.launched {
            None => CancelOutcome::NoTask,
            Some(job) if job.is_completed() => CancelOutcome::AlreadyCompleted,
            Some(job) => {
                let console = self.console.clone();
                let target = job.clone();
                self.scheduler.launch("cancel-launch", move |scope| {
                    flows::cancel_job(scope, console, target)
                });
                CancelOutcome::Cancelling
            }
        };
        if outcome != CancelOutcome::Cancelling {
            self.console.log(flows::TAG, outcome.message());
        }
        outcome
    }

    /// Doubling compute job plus a waiter that forwards its result here.
    pub fn start_async(&mut self) {
        self.set_async_result("Started".to_string());
        self.console.log(flows::TAG, "About to start async math work");

        let global = self.scheduler.global();
        let compute_console = self.console.clone();
        let steps = self.timings.async_steps;
        let step = self.timings.async_step;
        let deferred = global.spawn_async("math-work", move |scope| {
            flows::doubling(scope, compute_console, steps, step)
        });

        let console = self.console.clone();
        self.scheduler.launch("math-waiter", move |scope| async move {
            console.log(flows::TAG, "waiting for the math work to finish");
            let value = scope.await_deferred(deferred).await?;
            flows::deliver_async_result(&console, value);
            Ok(())
        });
    }

    /// Runs on the UI side; never touches the scheduler.
    pub fn add_one(&mut self) {
        self.counter += 1;
        self.push_field(COUNTER_FIELD, &self.counter.to_string());
    }

    pub fn join_demo(&mut self) -> Job {
        let console = self.console.clone();
        let global = self.scheduler.global();
        let timings = self.timings;
        self.scheduler.launch("join", move |scope| {
            flows::join_demo(scope, global, console, timings)
        })
    }

    pub fn coroutine_scope_demo(&mut self) -> Job {
        let console = self.console.clone();
        let timings = self.timings;
        let job = self.scheduler.launch("coroutine-scope", move |scope| {
            flows::scope_demo(scope, console, timings)
        });
        self.console.print("1");
        job
    }

    pub fn many_coroutines(&mut self) -> Job {
        self.console.print("h");
        let console = self.console.clone();
        let timings = self.timings;
        self.scheduler.launch("many-coroutines", move |scope| async move {
            flows::many_coroutines(scope, console, timings)
                .await
                .map(drop)
        })
    }

    // ------------------------------------------------------------------------
    // UI hand-off
    // ------------------------------------------------------------------------

    /// Apply events posted by tasks since the last frame. Returns how many
    /// were applied.
    pub fn process_ui_events(&mut self) -> usize {
        let mut applied = 0;
        while applied < MAX_EVENTS_PER_FRAME {
            let Ok(event) = self.events.try_recv() else {
                break;
            };
            self.apply_event(event);
            applied += 1;
        }
        applied
    }

    fn apply_event(&mut self, event: UiEvent) {
        if let UiEvent::AsyncResult(value) = event {
            self.set_async_result(value.to_string());
            let line = UiEvent::log(flows::TAG, format!("Got result on UI thread = {value}"));
            self.apply_event(line);
            return;
        }
        if let Some(line) = TranscriptLine::from_event(&event) {
            self.push_line(line);
        }
    }

    /// Wait for every task started so far, applying their events on the way.
    pub async fn wait_idle(&mut self) {
        self.scheduler.wait_idle().await;
        while self.process_ui_events() > 0 {}
    }

    fn set_async_result(&mut self, value: String) {
        self.push_field(ASYNC_FIELD, &value);
        self.async_result = value;
    }

    fn push_field(&mut self, name: &str, value: &str) {
        self.push_line(TranscriptLine::field(name, value));
    }

    fn push_line(&mut self, line: TranscriptLine) {
        if let Some(echo) = &mut self.echo {
            echo.push(line.clone());
        }
        if self.transcript.len() == TRANSCRIPT_CAPACITY {
            self.transcript.pop_front();
        }
        self.transcript.push_back(line);
    }

    /// Lines recorded since the last call. Empty unless built
    /// [`with_echo`](App::with_echo).
    pub fn take_echo(&mut self) -> Vec<TranscriptLine> {
        self.echo.as_mut().map(std::mem::take).unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Read access for the front ends
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    #[must_use]
    pub fn async_result(&self) -> &str {
        &self.async_result
    }

    pub fn transcript(&self) -> impl DoubleEndedIterator<Item = &TranscriptLine> + ExactSizeIterator {
        self.transcript.iter()
    }

    #[must_use]
    pub fn launched(&self) -> Option<&Job> {
        self.launched.as_ref()
    }

    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.scheduler.active_tasks()
    }

    #[must_use]
    pub fn ui_options(&self) -> UiOptions {
        self.ui_options
    }

    #[must_use]
    pub fn tick_count(&self) -> usize {
        self.tick
    }

    pub fn tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    // ------------------------------------------------------------------------
    // Button row
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn selected(&self) -> Trigger {
        Trigger::ALL[self.selected]
    }

    pub fn select(&mut self, trigger: Trigger) {
        if let Some(index) = Trigger::ALL.iter().position(|t| *t == trigger) {
            self.selected = index;
        }
    }

    pub fn select_next(&mut self) {
        self.selected = (self.selected + 1) % Trigger::ALL.len();
    }

    pub fn select_prev(&mut self) {
        self.selected = self
            .selected
            .checked_sub(1)
            .unwrap_or(Trigger::ALL.len() - 1);
    }

    pub fn activate_selected(&mut self) {
        self.trigger(self.selected());
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn request_quit(&mut self) {
        self.should_quit = true;
    }

    /// Tear the scheduler down. Returns `false` when some task outlived
    /// `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.scheduler.clone().shutdown(grace).await
    }
}
