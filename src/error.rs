use std::any::Any;
use std::io;
use thiserror::Error;

/// Error type for dispatch queue operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The OS refused to spawn a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    /// A task failed; lets `handle.get()?` propagate through this type.
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Result type alias for dispatch queue operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failure delivered through a task handle instead of a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task body panicked; carries the panic message.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The task was discarded before it ran, by `clear` or `shutdown`.
    #[error("Task was cancelled before it started")]
    Cancelled,
}

impl TaskError {
    /// Builds a `Panicked` error from a payload caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Renders a panic payload for logs and errors.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
