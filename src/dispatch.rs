use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::channel::{channel, TaskHandle, WaitStatus};
use crate::error::panic_message;
use crate::pool::{PoolConfig, WorkerPool, WorkerStartHook};
use crate::task::{Runnable, Task};
use crate::Result;

const DEFAULT_THREAD_NAME: &str = "dispatch-worker";

/// A queue that runs submitted closures in one of three modes.
///
/// The mode is chosen by the thread count given at construction:
///
/// - `0`: synchronous. No threads; every task runs on the calling thread
///   before `dispatch` returns.
/// - `1`: serial. One background thread; tasks run one at a time in
///   submission order.
/// - `n > 1`: concurrent. `n` background threads take tasks in submission
///   order and run them in parallel.
/// - negative: concurrent with one thread per logical CPU.
///
/// [`shutdown`](DispatchQueue::shutdown) permanently turns a threaded queue
/// into a synchronous one. Dropping the queue shuts it down.
///
/// All methods take `&self`, so the queue can be shared behind an `Arc`.
pub struct DispatchQueue {
    pool: RwLock<Option<WorkerPool>>,
}

impl DispatchQueue {
    /// Creates a queue with the given thread count.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(thread_count: i32) -> Result<Self> {
        Builder::new().thread_count(thread_count).build()
    }

    /// Creates a queue in synchronous mode.
    pub fn synchronous() -> Self {
        DispatchQueue {
            pool: RwLock::new(None),
        }
    }

    /// Returns a builder for configuring thread names and start hooks.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Submits `f` and returns a handle to its eventual result.
    ///
    /// In synchronous mode `f` has already run when this returns and the
    /// handle is ready. A panic in `f` is captured and delivered through
    /// the handle as [`TaskError::Panicked`](crate::TaskError::Panicked).
    pub fn dispatch<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (resolver, handle) = channel();
        if let Some(task) = self.submit(Box::new(move || resolver.resolve_with(f))) {
            task.run();
        }
        handle
    }

    /// Submits `f` without a way to observe its completion.
    ///
    /// A panic in `f` is caught and logged at error level; it does not take
    /// down the worker thread, nor the caller in synchronous mode.
    pub fn dispatch_forget<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(task) = self.submit(Box::new(f)) {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
                error!(
                    "Fire-and-forget task panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Enqueues `task` if there is a pool, otherwise hands it back to be
    /// run inline.
    fn submit(&self, task: Task) -> Option<Task> {
        match self.pool.read().unwrap().as_ref() {
            Some(pool) => {
                pool.enqueue(task);
                None
            }
            None => Some(task),
        }
    }

    /// Whether tasks run on background threads.
    pub fn is_threaded(&self) -> bool {
        self.pool.read().unwrap().is_some()
    }

    /// Number of background threads; 0 in synchronous mode.
    pub fn thread_count(&self) -> usize {
        self.pool
            .read()
            .unwrap()
            .as_ref()
            .map_or(0, WorkerPool::thread_count)
    }

    /// Number of tasks waiting to start.
    pub fn len(&self) -> usize {
        self.pool.read().unwrap().as_ref().map_or(0, WorkerPool::len)
    }

    /// Whether no task is waiting to start.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Alias of [`len`](DispatchQueue::len).
    pub fn size(&self) -> usize {
        self.len()
    }

    /// Alias of [`is_empty`](DispatchQueue::is_empty).
    pub fn empty(&self) -> bool {
        self.is_empty()
    }

    /// Cancels every task that has not started yet.
    ///
    /// Running tasks are not interrupted. Handles of cancelled tasks
    /// resolve to [`TaskError::Cancelled`](crate::TaskError::Cancelled).
    pub fn clear(&self) {
        let discarded = self.pool.read().unwrap().as_ref().map(WorkerPool::clear);
        // Dropped with the lock released: a discarded closure's captures may
        // re-enter this queue.
        drop(discarded);
    }

    /// Blocks until every task submitted before this call has finished or
    /// been cancelled.
    ///
    /// Calling this from inside one of the queue's own tasks deadlocks,
    /// since the calling task is one of those being waited on.
    pub fn wait(&self) {
        self.wait_inner(None);
    }

    /// Like [`wait`](DispatchQueue::wait), giving up after `timeout`.
    ///
    /// A timeout too large to form a deadline, such as `Duration::MAX`,
    /// waits without limit.
    pub fn wait_for(&self, timeout: Duration) -> WaitStatus {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => self.wait_inner(None),
        }
    }

    /// Like [`wait`](DispatchQueue::wait), giving up at `deadline`.
    pub fn wait_until(&self, deadline: Instant) -> WaitStatus {
        self.wait_inner(Some(deadline))
    }

    fn wait_inner(&self, deadline: Option<Instant>) -> WaitStatus {
        // Take the drain point under the read lock but block without it,
        // so a concurrent shutdown is never held up by a waiter.
        let drain = self
            .pool
            .read()
            .unwrap()
            .as_ref()
            .map(WorkerPool::drain_point);
        match drain {
            Some(drain) => drain.wait(deadline),
            None => WaitStatus::Ready,
        }
    }

    /// Cancels pending tasks, waits for running ones and joins the threads.
    ///
    /// The queue then runs in synchronous mode. Calling this more than once
    /// is harmless.
    pub fn shutdown(&self) {
        self.clear();
        let pool = self.pool.write().unwrap().take();
        if let Some(mut pool) = pool {
            pool.shutdown();
            debug!("Dispatch queue switched to synchronous mode");
        }
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        DispatchQueue::synchronous()
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Configures a [`DispatchQueue`] before any thread is started.
pub struct Builder {
    thread_count: i32,
    thread_name: String,
    on_worker_start: Option<WorkerStartHook>,
}

impl Builder {
    /// Creates a builder for a synchronous queue.
    pub fn new() -> Self {
        Builder {
            thread_count: 0,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            on_worker_start: None,
        }
    }

    /// Sets the thread count; see [`DispatchQueue`] for its meaning.
    pub fn thread_count(mut self, thread_count: i32) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Sets the prefix of worker thread names; workers are named
    /// `"{prefix}-{index}"`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Sets a hook that each worker runs with its index before taking tasks.
    pub fn on_worker_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_worker_start = Some(Arc::new(hook));
        self
    }

    /// Builds the queue, spawning its worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned. Workers that
    /// did start are joined first.
    pub fn build(self) -> Result<DispatchQueue> {
        let threads = resolve_thread_count(self.thread_count);
        if threads == 0 {
            return Ok(DispatchQueue::synchronous());
        }

        let pool = WorkerPool::spawn(&PoolConfig {
            threads,
            thread_name: self.thread_name,
            on_worker_start: self.on_worker_start,
        })?;
        Ok(DispatchQueue {
            pool: RwLock::new(Some(pool)),
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

/// Maps a requested thread count to the number of threads to spawn.
fn resolve_thread_count(requested: i32) -> usize {
    if requested < 0 {
        num_cpus::get()
    } else {
        requested as usize
    }
}
