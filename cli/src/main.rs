//! tasklab CLI - Binary entry point and terminal session management.
//!
//! # Architecture
//!
//! The CLI bridges [`tasklab_engine`] (application state) and [`tasklab_tui`]
//! (rendering), providing RAII-based terminal management with guaranteed
//! cleanup.
//!
//! ```text
//! main() -> build runtime -> Scheduler -> App
//!                                          |
//!                    +---------------------+--------------------+
//!                    v                                          v
//!     TerminalSession + run_app_full()              run_headless(script)
//! ```
//!
//! # Event Loop
//!
//! The full-screen mode uses a fixed 8ms (~120 FPS) render cadence:
//!
//! 1. Wait for frame tick
//! 2. Drain input queue (non-blocking via [`tasklab_tui::InputPump`])
//! 3. Advance application state (`app.tick()`)
//! 4. Apply events posted by tasks (`app.process_ui_events()`)
//! 5. Render frame
//!
//! Both modes tear the scheduler down before the runtime is dropped.

use anyhow::{Context, Result, anyhow, bail};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use std::{
    env,
    fs::{self, OpenOptions},
    io::{Stdout, Write, stdout},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tasklab_engine::{
    App, LineKind, RuntimeSettings, Scheduler, Script, TasklabConfig, TranscriptLine, UiMode,
};
use tasklab_tui::{InputPump, draw, handle_events};

const USAGE: &str = "\
usage: tasklab                 full-screen demo
       tasklab run <step>...   run steps headless and print the transcript

steps:
  <trigger>     fire and wait until idle
  <trigger>&    fire and continue
  sleep:<ms>    let the clock run
  wait          wait until idle

triggers: launch, cancel-launch, async, add-one, join, coroutine-scope, many-coroutines";

fn init_tracing(mode: UiMode) {
    let default_level = match mode {
        UiMode::Full => "info",
        // Transcript lines already go to stdout.
        UiMode::Headless => "warn",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if mode == UiMode::Headless {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
        return;
    }

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // If we can't open a log file, prefer "no logs" over corrupting the TUI
    // by writing to stdout/stderr.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.tasklab/logs/tasklab.log
    if let Some(config_path) = TasklabConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("tasklab.log"));
    }

    // Fallback: ./.tasklab/logs/tasklab.log
    candidates.push(PathBuf::from(".tasklab").join("logs").join("tasklab.log"));

    candidates
}

/// What the command line asked for.
enum Command {
    Full,
    Run(Script),
    Help,
}

fn parse_args(args: &[String], configured: UiMode) -> Result<Command> {
    match args.split_first() {
        None if configured == UiMode::Headless => {
            bail!("headless mode needs steps to run\n\n{USAGE}")
        }
        None => Ok(Command::Full),
        Some((first, _)) if first == "-h" || first == "--help" || first == "help" => {
            Ok(Command::Help)
        }
        Some((first, steps)) if first == "run" => {
            let script = Script::parse(steps).map_err(|err| anyhow!("{err}\n\n{USAGE}"))?;
            Ok(Command::Run(script))
        }
        Some((first, _)) => bail!("unknown command `{first}`\n\n{USAGE}"),
    }
}

/// RAII wrapper for terminal state with guaranteed cleanup on drop.
///
/// Raw mode and the alternate screen are restored on drop, so the terminal
/// remains usable even after panics or early returns.
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn new() -> Result<Self> {
        enable_raw_mode()?;

        let mut out = stdout();
        if let Err(err) = execute!(out, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(err.into());
        }

        let terminal = match Terminal::new(CrosstermBackend::new(out)) {
            Ok(t) => t,
            Err(err) => {
                let _ = disable_raw_mode();
                let _ = execute!(stdout(), LeaveAlternateScreen);
                return Err(err.into());
            }
        };

        Ok(Self { terminal })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let (config, config_error) = match TasklabConfig::load() {
        Ok(loaded) => (loaded.unwrap_or_default(), None),
        Err(err) => (TasklabConfig::default(), Some(err)),
    };
    let command = parse_args(&args, config.resolved_ui_mode())?;

    let mode = match command {
        Command::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        Command::Full => UiMode::Full,
        Command::Run(_) => UiMode::Headless,
    };
    init_tracing(mode);
    if let Some(err) = config_error {
        tracing::warn!(path = %err.path().display(), "using default config: {err}");
    }

    let runtime = build_runtime(config.runtime)?;
    let result = runtime.block_on(async {
        let scheduler = Scheduler::current();
        let mut app = App::new(scheduler, config.timings, config.ui);
        let result = match command {
            Command::Run(script) => run_headless(&mut app, &script).await,
            _ => run_full(&mut app).await,
        };

        if !app.shutdown(config.runtime.shutdown_grace).await {
            eprintln!("Some tasks were still running at exit");
        }
        result
    });

    // Busy loops that ignore cancellation must not hold up exit.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

fn build_runtime(settings: RuntimeSettings) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.worker_threads)
        .thread_name("tasklab-worker")
        .enable_all()
        .build()
        .context("failed to build the task runtime")
}

async fn run_full(app: &mut App) -> Result<()> {
    let mut session = TerminalSession::new()?;
    run_app_full(&mut session.terminal, app).await
}

async fn run_headless(app: &mut App, script: &Script) -> Result<()> {
    let mut out = stdout().lock();
    let mut write_error = None;
    let run = script.run(app, |line| {
        if write_error.is_none()
            && let Err(err) = writeln!(out, "{}", render_plain(&line))
        {
            write_error = Some(err);
        }
    });

    tokio::select! {
        () = run => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, cancelling running tasks");
        }
    }

    match write_error {
        Some(err) => Err(err).context("failed to write transcript"),
        None => Ok(()),
    }
}

fn render_plain(line: &TranscriptLine) -> String {
    match line.kind {
        LineKind::Log | LineKind::Print => line.text.clone(),
        LineKind::Field => format!("[{}]", line.text),
    }
}

const FRAME_DURATION: Duration = Duration::from_millis(8);

async fn run_app_full<B>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()>
where
    B: Backend,
    B::Error: Send + Sync + 'static,
{
    let mut input = InputPump::new();
    let mut frames = tokio::time::interval(FRAME_DURATION);
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let result: Result<()> = loop {
        frames.tick().await;

        // Non-blocking input (drain queue only)
        let quit_now = match handle_events(app, &mut input) {
            Ok(q) => q,
            Err(e) => break Err(e),
        };
        if quit_now {
            break Ok(());
        }

        app.tick();
        app.process_ui_events();

        if let Err(e) = terminal.draw(|frame| draw(frame, app)) {
            break Err(e.into());
        }
    };

    input.shutdown().await;
    result
}
