//! Core domain types for tasklab.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod timings;
pub mod ui;

pub use timings::DemoTimings;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// ============================================================================
// Triggers
// ============================================================================

/// A button on the demo surface. Each one starts an independent flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Launch,
    CancelLaunch,
    Async,
    AddOne,
    Join,
    CoroutineScope,
    ManyCoroutines,
}

impl Trigger {
    /// Buttons in the order they are laid out on screen.
    pub const ALL: [Trigger; 7] = [
        Trigger::Launch,
        Trigger::CancelLaunch,
        Trigger::Async,
        Trigger::AddOne,
        Trigger::Join,
        Trigger::CoroutineScope,
        Trigger::ManyCoroutines,
    ];

    /// Button caption.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Trigger::Launch => "Launch",
            Trigger::CancelLaunch => "Cancel Launch",
            Trigger::Async => "Async",
            Trigger::AddOne => "Add One",
            Trigger::Join => "Join",
            Trigger::CoroutineScope => "Coroutine Scope",
            Trigger::ManyCoroutines => "Many Coroutines",
        }
    }

    /// Name accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Trigger::Launch => "launch",
            Trigger::CancelLaunch => "cancel-launch",
            Trigger::Async => "async",
            Trigger::AddOne => "add-one",
            Trigger::Join => "join",
            Trigger::CoroutineScope => "coroutine-scope",
            Trigger::ManyCoroutines => "many-coroutines",
        }
    }

    /// Number key bound to this button (`1`..=`7`).
    #[must_use]
    pub fn hotkey(self) -> char {
        let index = Self::ALL
            .iter()
            .position(|t| *t == self)
            .unwrap_or_default();
        char::from(b'1' + index as u8)
    }

    #[must_use]
    pub fn from_hotkey(key: char) -> Option<Self> {
        let digit = key.to_digit(10)? as usize;
        digit.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown trigger `{0}` (expected one of: launch, cancel-launch, async, add-one, join, coroutine-scope, many-coroutines)")]
pub struct UnknownTrigger(pub String);

impl FromStr for Trigger {
    type Err = UnknownTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL
            .into_iter()
            .find(|t| t.name().replace('-', "") == normalized)
            .ok_or_else(|| UnknownTrigger(s.to_string()))
    }
}

// ============================================================================
// Flow outcomes
// ============================================================================

/// How the time-boxed maths job of the Launch flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Loop and trailing suspension finished inside the deadline.
    Done,
    /// The launched job was cancelled.
    Cancelled,
    /// The time-boxed operation raised its timeout.
    TimedOut,
}

impl LaunchOutcome {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            LaunchOutcome::Done => "maths done",
            LaunchOutcome::Cancelled => "maths job cancelled",
            LaunchOutcome::TimedOut => "maths job timed out",
        }
    }
}

/// Result of pressing Cancel Launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    NoTask,
    AlreadyCompleted,
    /// A cancel-and-join task was started against the tracked job.
    Cancelling,
}

impl CancelOutcome {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            CancelOutcome::NoTask => "no job launched yet",
            CancelOutcome::AlreadyCompleted => "job has been completed",
            CancelOutcome::Cancelling => "cancelling the job launched",
        }
    }
}

// ============================================================================
// Thread identity
// ============================================================================

/// Identity of the OS thread a log line was emitted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadTag {
    pub id: String,
    pub name: String,
}

impl ThreadTag {
    #[must_use]
    pub fn current() -> Self {
        let thread = std::thread::current();
        let id = format!("{:?}", thread.id())
            .trim_start_matches("ThreadId(")
            .trim_end_matches(')')
            .to_string();
        Self {
            id,
            name: thread.name().unwrap_or("unnamed").to_string(),
        }
    }
}

impl fmt::Display for ThreadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread = {}: {}", self.id, self.name)
    }
}
