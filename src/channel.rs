use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::TaskError;

/// Why a timed wait on a handle returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The outcome is available.
    Ready,
    /// The timeout elapsed first.
    Timeout,
}

/// Values sit behind an `Arc` so shared readers clone them after the lock
/// is released; `T::clone` never runs under the mutex.
enum Outcome<T> {
    Pending,
    Resolved(Arc<T>),
    Failed(TaskError),
}

impl<T> Outcome<T> {
    fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

/// State shared by the writing and the reading side of a channel.
struct Shared<T> {
    outcome: Mutex<Outcome<T>>,
    resolved: Condvar,
}

impl<T> Shared<T> {
    fn complete(&self, outcome: Outcome<T>) {
        *self.outcome.lock().unwrap() = outcome;
        self.resolved.notify_all();
    }

    fn is_ready(&self) -> bool {
        !self.outcome.lock().unwrap().is_pending()
    }

    fn wait(&self) -> MutexGuard<'_, Outcome<T>> {
        let guard = self.outcome.lock().unwrap();
        self.resolved
            .wait_while(guard, |outcome| outcome.is_pending())
            .unwrap()
    }

    fn wait_timeout(&self, timeout: Duration) -> WaitStatus {
        let guard = self.outcome.lock().unwrap();
        let (guard, _) = self
            .resolved
            .wait_timeout_while(guard, timeout, |outcome| outcome.is_pending())
            .unwrap();
        if guard.is_pending() {
            WaitStatus::Timeout
        } else {
            WaitStatus::Ready
        }
    }

    fn wait_deadline(&self, deadline: Instant) -> WaitStatus {
        self.wait_timeout(deadline.saturating_duration_since(Instant::now()))
    }
}

/// Creates a one-shot result channel.
///
/// The `Resolver` is moved into the task that produces the value; the
/// `TaskHandle` stays with whoever wants to read it.
pub fn channel<T>() -> (Resolver<T>, TaskHandle<T>) {
    let shared = Arc::new(Shared {
        outcome: Mutex::new(Outcome::Pending),
        resolved: Condvar::new(),
    });
    (
        Resolver {
            shared: Some(shared.clone()),
        },
        TaskHandle { shared },
    )
}

/// The writing side of a result channel.
///
/// Resolving consumes the resolver, so the channel is written at most once.
/// A resolver dropped without being resolved (its task was discarded from
/// the queue) fails the channel with [`TaskError::Cancelled`].
pub struct Resolver<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Resolver<T> {
    /// Delivers a value to every reader.
    pub fn resolve(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Outcome::Resolved(Arc::new(value)));
        }
    }

    /// Delivers a failure to every reader.
    pub fn fail(mut self, error: TaskError) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Outcome::Failed(error));
        }
    }

    /// Runs `f`, resolving with its return value or failing with its panic.
    pub(crate) fn resolve_with<F>(self, f: F)
    where
        F: FnOnce() -> T,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => self.resolve(value),
            Err(payload) => self.fail(TaskError::from_panic(payload)),
        }
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Outcome::Failed(TaskError::Cancelled));
        }
    }
}

/// The reading side of a result channel, returned by `dispatch`.
///
/// Use [`TaskHandle::share`] when more than one reader needs the outcome.
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> TaskHandle<T> {
    /// Returns `true` once the task has produced a value or failed.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Blocks until the outcome is available.
    pub fn wait(&self) {
        drop(self.shared.wait());
    }

    /// Blocks until the outcome is available or `timeout` has elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitStatus {
        self.shared.wait_timeout(timeout)
    }

    /// Blocks until the outcome is available or `deadline` is reached.
    pub fn wait_deadline(&self, deadline: Instant) -> WaitStatus {
        self.shared.wait_deadline(deadline)
    }

    /// Blocks until the outcome is available and returns it.
    ///
    /// A panic in the task body comes back as [`TaskError::Panicked`] on
    /// the calling thread.
    pub fn get(self) -> Result<T, TaskError> {
        let outcome = std::mem::replace(&mut *self.shared.wait(), Outcome::Pending);
        match outcome {
            Outcome::Resolved(value) => match Arc::try_unwrap(value) {
                Ok(value) => Ok(value),
                Err(_) => unreachable!("a unique handle's value has no other owner"),
            },
            Outcome::Failed(err) => Err(err),
            Outcome::Pending => unreachable!("wait returned on a pending outcome"),
        }
    }

    /// Converts this handle into one that can be cloned and read many times.
    pub fn share(self) -> SharedTaskHandle<T> {
        SharedTaskHandle {
            shared: self.shared,
        }
    }
}

/// A clonable reading side; every clone observes the same outcome.
pub struct SharedTaskHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for SharedTaskHandle<T> {
    fn clone(&self) -> Self {
        SharedTaskHandle {
            shared: self.shared.clone(),
        }
    }
}

impl<T> SharedTaskHandle<T> {
    /// Returns `true` once the task has produced a value or failed.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Blocks until the outcome is available.
    pub fn wait(&self) {
        drop(self.shared.wait());
    }

    /// Blocks until the outcome is available or `timeout` has elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitStatus {
        self.shared.wait_timeout(timeout)
    }

    /// Blocks until the outcome is available or `deadline` is reached.
    pub fn wait_deadline(&self, deadline: Instant) -> WaitStatus {
        self.shared.wait_deadline(deadline)
    }
}

impl<T: Clone> SharedTaskHandle<T> {
    /// Blocks until the outcome is available and returns a copy of it.
    pub fn get(&self) -> Result<T, TaskError> {
        let value = match &*self.shared.wait() {
            Outcome::Resolved(value) => Arc::clone(value),
            Outcome::Failed(err) => return Err(err.clone()),
            Outcome::Pending => unreachable!("wait returned on a pending outcome"),
        };
        Ok(T::clone(&value))
    }
}
