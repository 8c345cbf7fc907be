//! Headless scripts: a list of steps driven against an [`App`] without a
//! terminal.
//!
//! Grammar, one step per argument:
//!
//! - `<trigger>`: fire the trigger, then wait until every task is idle
//! - `<trigger>&`: fire the trigger and move straight on
//! - `sleep:<ms>`: let the clock run
//! - `wait`: wait until every task is idle
//!
//! A script always ends by waiting until idle.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use tasklab_types::Trigger;

use crate::{App, TranscriptLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fire { trigger: Trigger, wait: bool },
    Sleep(Duration),
    WaitIdle,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("empty script: name at least one trigger")]
    Empty,
    #[error("unknown step `{0}`")]
    UnknownStep(String),
    #[error("invalid sleep `{0}`: expected sleep:<milliseconds>")]
    InvalidSleep(String),
}

impl FromStr for Step {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("wait") {
            return Ok(Step::WaitIdle);
        }
        if let Some(ms) = s.strip_prefix("sleep:") {
            return ms
                .parse::<u64>()
                .map(|ms| Step::Sleep(Duration::from_millis(ms)))
                .map_err(|_| ScriptError::InvalidSleep(s.to_string()));
        }
        let (name, wait) = match s.strip_suffix('&') {
            Some(name) => (name, false),
            None => (s, true),
        };
        let trigger = name
            .parse::<Trigger>()
            .map_err(|_| ScriptError::UnknownStep(s.to_string()))?;
        Ok(Step::Fire { trigger, wait })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn parse<I, S>(args: I) -> Result<Self, ScriptError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let steps = args
            .into_iter()
            .map(|arg| arg.as_ref().parse())
            .collect::<Result<Vec<Step>, _>>()?;
        if steps.is_empty() {
            return Err(ScriptError::Empty);
        }
        Ok(Self { steps })
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step against `app`, handing each transcript line to `sink`
    /// as soon as it is applied.
    pub async fn run(&self, app: &mut App, mut sink: impl FnMut(TranscriptLine)) {
        for step in &self.steps {
            tracing::debug!(?step, "script step");
            match *step {
                Step::Fire { trigger, wait } => {
                    app.trigger(trigger);
                    if wait {
                        app.wait_idle().await;
                    } else {
                        app.process_ui_events();
                    }
                }
                Step::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    app.process_ui_events();
                }
                Step::WaitIdle => app.wait_idle().await,
            }
            app.take_echo().into_iter().for_each(&mut sink);
        }
        app.wait_idle().await;
        app.take_echo().into_iter().for_each(&mut sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_step_kind() {
        let script = Script::parse(["launch&", "sleep:1000", "cancel-launch", "wait", "Join"])
            .unwrap();
        assert_eq!(
            script.steps(),
            [
                Step::Fire {
                    trigger: Trigger::Launch,
                    wait: false
                },
                Step::Sleep(Duration::from_secs(1)),
                Step::Fire {
                    trigger: Trigger::CancelLaunch,
                    wait: true
                },
                Step::WaitIdle,
                Step::Fire {
                    trigger: Trigger::Join,
                    wait: true
                },
            ]
        );
    }

    #[test]
    fn rejects_bad_steps() {
        assert_eq!(
            Script::parse(["launch", "explode"]),
            Err(ScriptError::UnknownStep("explode".to_string()))
        );
        assert_eq!(
            Script::parse(["sleep:soon"]),
            Err(ScriptError::InvalidSleep("sleep:soon".to_string()))
        );
        assert_eq!(Script::parse(Vec::<String>::new()), Err(ScriptError::Empty));
    }
}
