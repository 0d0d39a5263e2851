#![deny(missing_docs)]

//! A dispatch queue for running closures synchronously, on a serial
//! background thread, or on a fixed pool of concurrent worker threads.
//!
//! All three modes share one API: submit a closure with
//! [`DispatchQueue::dispatch`] to get a [`TaskHandle`] for its result, or
//! with [`DispatchQueue::dispatch_forget`] when the result is not needed.

/// One-shot result channels between a task and its submitter.
pub mod channel;
mod dispatch;
mod error;
mod pool;
mod task;

pub use channel::{Resolver, SharedTaskHandle, TaskHandle, WaitStatus};
pub use dispatch::{Builder, DispatchQueue};
pub use error::{DispatchError, Result, TaskError};
pub use task::{Runnable, Task};
