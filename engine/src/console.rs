//! The hand-off from worker tasks to the UI loop.
//!
//! Task bodies never touch UI state. They send [`UiEvent`]s through a
//! [`Console`]; the UI loop drains the receiving end once per frame, which is
//! the single hop that moves a value onto the UI thread.

use tokio::sync::mpsc;

use tasklab_types::ThreadTag;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Tagged diagnostic line.
    Log {
        tag: &'static str,
        thread: ThreadTag,
        message: String,
    },
    /// Plain console output, e.g. ordering markers.
    Print(String),
    /// Result of the async doubling job, destined for the async-result field.
    AsyncResult(u64),
}

impl UiEvent {
    /// Trace a tagged line on the calling thread and wrap it as an event.
    pub(crate) fn log(tag: &'static str, message: impl Into<String>) -> Self {
        let thread = ThreadTag::current();
        let message = message.into();
        tracing::info!(
            tag,
            thread_id = %thread.id,
            thread_name = %thread.name,
            "{message}"
        );
        UiEvent::Log {
            tag,
            thread,
            message,
        }
    }
}

/// Sending end of the UI hand-off, doubling as the logging collaborator.
#[derive(Debug, Clone)]
pub struct Console {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl Console {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit a tagged diagnostic line with the identity of the calling thread.
    /// Never fails: once the UI is gone the line only reaches the log file.
    pub fn log(&self, tag: &'static str, message: impl Into<String>) {
        self.post(UiEvent::log(tag, message));
    }

    pub fn print(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(%line, "print");
        self.post(UiEvent::Print(line));
    }

    pub fn post(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("UI hand-off closed, dropping event");
        }
    }
}

/// What kind of line the transcript holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Log,
    Print,
    /// A text field changed.
    Field,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub kind: LineKind,
    pub text: String,
}

impl TranscriptLine {
    pub(crate) fn from_event(event: &UiEvent) -> Option<Self> {
        match event {
            UiEvent::Log {
                tag,
                thread,
                message,
            } => Some(Self {
                kind: LineKind::Log,
                text: format!("#{tag} {thread}: {message}"),
            }),
            UiEvent::Print(line) => Some(Self {
                kind: LineKind::Print,
                text: line.clone(),
            }),
            UiEvent::AsyncResult(_) => None,
        }
    }

    pub(crate) fn field(name: &str, value: &str) -> Self {
        Self {
            kind: LineKind::Field,
            text: format!("{name} = {value}"),
        }
    }
}
