use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use crate::runtime::task::TaskId;

/// Errors surfaced by the task engine to its immediate caller.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task already registered: {0}")]
    DuplicateTask(TaskId),

    #[error("Task {0} was already started")]
    AlreadyStarted(TaskId),

    #[error("Task {0} has already settled")]
    AlreadySettled(TaskId),

    #[error("Task {0} is not paused")]
    NotPaused(TaskId),

    /// Pause or unpause requested from inside a call to the same task's runner.
    #[error("Task {0} is busy")]
    Busy(TaskId),

    #[error("{operation} is not supported by task {task}")]
    NotSupported { task: TaskId, operation: Operation },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Engine is not running")]
    EngineStopped,

    /// Domain error raised by a runner; opaque to the engine.
    #[error("{0}")]
    Failed(RunnerFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Pause,
    Unpause,
    Cancel,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Pause => "pause",
            Operation::Unpause => "unpause",
            Operation::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Shareable wrapper around a runner's `anyhow::Error`, so that the failure can
/// be read by every observer and by late status queries.
#[derive(Debug, Clone)]
pub struct RunnerFailure(Arc<anyhow::Error>);

impl RunnerFailure {
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Display for RunnerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        // Runners may bubble an engine error through anyhow; keep its identity.
        match err.downcast::<TaskError>() {
            Ok(task_err) => task_err,
            Err(err) => TaskError::Failed(RunnerFailure(Arc::new(err))),
        }
    }
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}
