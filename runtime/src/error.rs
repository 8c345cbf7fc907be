use std::time::Duration;

use thiserror::Error;

/// Why a task body stopped at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task (or one of its ancestors) was cancelled.
    #[error("task was cancelled")]
    Cancelled,
    /// A suspension point was reached after the enclosing deadline.
    #[error("timed out waiting for {0:?}")]
    Timeout(Duration),
}

impl TaskError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout(_))
    }
}
