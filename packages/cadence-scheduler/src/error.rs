use crate::priority::Priority;
use thiserror::Error;

/// Error raised by a task callback.
pub type TaskError = Box<dyn std::error::Error + 'static>;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The work loop was entered while it was already running, usually because
    /// a task tried to flush the scheduler from inside its own callback.
    #[error("work loop re-entered while already running")]
    Reentrant,

    /// The host ran a callback the scheduler had already cancelled or replaced,
    /// so two callbacks were live at once.
    #[error("host ran a cancelled or superseded callback")]
    DoubleScheduledCallback,

    #[error("task #{seq} ({priority}) failed: {source}")]
    TaskFailed {
        seq: u64,
        priority: Priority,
        #[source]
        source: TaskError,
    },

    #[error("frame rate {0} is out of range, expected 0..=125")]
    InvalidFrameRate(u32),

    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error("failed to parse scheduler config: {0}")]
    Config(#[from] serde_json::Error),
}

impl SchedulerError {
    /// True for defects in how the scheduler is driven, as opposed to failures
    /// of the work it runs.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::Reentrant | Self::DoubleScheduledCallback)
    }
}

/// Build a [`TaskError`] from a plain message.
pub fn task_error(msg: impl Into<String>) -> TaskError {
    let msg: String = msg.into();
    msg.into()
}
