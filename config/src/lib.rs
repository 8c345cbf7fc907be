//! Configuration loading for tasklab.
//!
//! Raw TOML structs (every field optional) stay private to this crate. The
//! loader resolves them into the validated types from `tasklab-types` at the
//! parse boundary, so the rest of the application never sees an `Option`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

use tasklab_types::DemoTimings;
use tasklab_types::ui::UiOptions;

const TUI_ENV: &str = "TASKLAB_TUI";
const DEFAULT_WORKER_THREADS: usize = 2;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

// ============================================================================
// Raw TOML
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    app: Option<RawAppConfig>,
    runtime: Option<RawRuntimeConfig>,
    demos: Option<RawDemoConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAppConfig {
    tui: Option<String>,
    #[serde(default)]
    ascii_only: bool,
    #[serde(default)]
    high_contrast: bool,
    #[serde(default)]
    reduced_motion: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawRuntimeConfig {
    worker_threads: Option<usize>,
    shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDemoConfig {
    launch_delay_ms: Option<u64>,
    math_iterations: Option<u32>,
    math_timeout_ms: Option<u64>,
    math_tail_delay_ms: Option<u64>,
    async_steps: Option<u32>,
    async_step_ms: Option<u64>,
    join_child_delay_ms: Option<u64>,
    scoped_child_delay_ms: Option<u64>,
    scope_loose_child_ms: Option<u64>,
    scope_inner_child_ms: Option<u64>,
    scope_body_delay_ms: Option<u64>,
    bulk_tasks: Option<u32>,
    bulk_max_delay_ms: Option<u64>,
}

fn millis_or(raw: Option<u64>, default: Duration) -> Duration {
    raw.map_or(default, Duration::from_millis)
}

impl RawDemoConfig {
    fn resolve(self) -> DemoTimings {
        let d = DemoTimings::default();
        DemoTimings {
            launch_delay: millis_or(self.launch_delay_ms, d.launch_delay),
            math_iterations: self.math_iterations.unwrap_or(d.math_iterations),
            math_timeout: millis_or(self.math_timeout_ms, d.math_timeout),
            math_tail_delay: millis_or(self.math_tail_delay_ms, d.math_tail_delay),
            // Doubling 1 more than 63 times overflows the u64 accumulator.
            async_steps: self.async_steps.unwrap_or(d.async_steps).min(63),
            async_step: millis_or(self.async_step_ms, d.async_step),
            join_child_delay: millis_or(self.join_child_delay_ms, d.join_child_delay),
            scoped_child_delay: millis_or(self.scoped_child_delay_ms, d.scoped_child_delay),
            scope_loose_child: millis_or(self.scope_loose_child_ms, d.scope_loose_child),
            scope_inner_child: millis_or(self.scope_inner_child_ms, d.scope_inner_child),
            scope_body_delay: millis_or(self.scope_body_delay_ms, d.scope_body_delay),
            bulk_tasks: self.bulk_tasks.unwrap_or(d.bulk_tasks),
            bulk_max_delay: millis_or(self.bulk_max_delay_ms, d.bulk_max_delay),
        }
    }
}

// ============================================================================
// Resolved config
// ============================================================================

/// Which front end to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Full-screen terminal UI.
    #[default]
    Full,
    /// Run triggers from the command line and print to stdout.
    Headless,
}

impl UiMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" | "fullscreen" => Some(UiMode::Full),
            "headless" | "plain" => Some(UiMode::Headless),
            _ => None,
        }
    }

    /// Mode requested through `TASKLAB_TUI`, if set to a known value.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        env::var(TUI_ENV).ok().and_then(|value| UiMode::parse(&value))
    }
}

/// Settings for the shared scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Size of the worker pool all tasks are multiplexed onto. At least 1.
    pub worker_threads: usize,
    /// How long teardown waits for cancelled tasks to unwind.
    pub shutdown_grace: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TasklabConfig {
    /// Mode from the config file; `None` leaves the choice to env/default.
    pub ui_mode: Option<UiMode>,
    pub ui: UiOptions,
    pub runtime: RuntimeSettings,
    pub timings: DemoTimings,
}

impl TasklabConfig {
    /// Parse config text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let raw: RawConfig = toml::from_str(content)?;
        Ok(Self::resolve(raw))
    }

    fn resolve(raw: RawConfig) -> Self {
        let app = raw.app.unwrap_or_default();
        let ui_mode = app.tui.as_deref().and_then(|value| {
            let mode = UiMode::parse(value);
            if mode.is_none() {
                tracing::warn!("Unknown tui mode in config: {}", value);
            }
            mode
        });

        let runtime = raw.runtime.unwrap_or_default();
        let defaults = RuntimeSettings::default();

        Self {
            ui_mode,
            ui: UiOptions {
                ascii_only: app.ascii_only,
                high_contrast: app.high_contrast,
                reduced_motion: app.reduced_motion,
            },
            runtime: RuntimeSettings {
                worker_threads: runtime
                    .worker_threads
                    .unwrap_or(defaults.worker_threads)
                    .max(1),
                shutdown_grace: millis_or(runtime.shutdown_grace_ms, defaults.shutdown_grace),
            },
            timings: raw.demos.unwrap_or_default().resolve(),
        }
    }

    /// Load from the default location. `Ok(None)` when there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match Self::from_toml(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Effective front end: config file first, then `TASKLAB_TUI`, then full screen.
    #[must_use]
    pub fn resolved_ui_mode(&self) -> UiMode {
        self.ui_mode.or_else(UiMode::from_env).unwrap_or_default()
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

/// `~/.tasklab/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tasklab").join("config.toml"))
}
