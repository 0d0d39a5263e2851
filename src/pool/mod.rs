use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, trace, warn};

use crate::channel::WaitStatus;
use crate::error::panic_message;
use crate::task::{Runnable, Task};
use crate::Result;

mod queue;

use self::queue::{QueuedTask, TaskQueue};

/// Hook run on each worker thread before it starts taking tasks.
pub(crate) type WorkerStartHook = Arc<dyn Fn(usize) + Send + Sync + 'static>;

/// Settings for spawning a [`WorkerPool`].
#[derive(Clone)]
pub(crate) struct PoolConfig {
    pub(crate) threads: usize,
    pub(crate) thread_name: String,
    pub(crate) on_worker_start: Option<WorkerStartHook>,
}

/// Everything guarded by the pool mutex.
#[derive(Default)]
struct PoolState {
    queue: TaskQueue,
    /// Submission numbers of the tasks currently executing.
    running: BTreeSet<u64>,
    next_seq: u64,
    shutting_down: bool,
}

impl PoolState {
    /// Whether any task submitted before `target` is still queued or running.
    fn has_pending_before(&self, target: u64) -> bool {
        self.queue.front_seq().is_some_and(|seq| seq < target)
            || self.running.first().is_some_and(|&seq| seq < target)
    }
}

struct Inner {
    state: Mutex<PoolState>,
    /// Signalled when a task is queued or shutdown begins.
    available: Condvar,
    /// Signalled when a task finishes or queued tasks are discarded.
    retired: Condvar,
}

/// A fixed set of threads executing queued tasks in FIFO order.
///
/// The pool is one-shot: once shut down it never runs another task.
pub(crate) struct WorkerPool {
    inner: Arc<Inner>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.threads` workers.
    ///
    /// If any spawn fails, the workers already started are shut down and
    /// joined before the error is returned.
    pub(crate) fn spawn(config: &PoolConfig) -> Result<Self> {
        let mut pool = WorkerPool {
            inner: Arc::new(Inner {
                state: Mutex::new(PoolState::default()),
                available: Condvar::new(),
                retired: Condvar::new(),
            }),
            workers: Vec::with_capacity(config.threads),
        };

        for id in 0..config.threads {
            let inner = pool.inner.clone();
            let on_start = config.on_worker_start.clone();
            let worker = thread::Builder::new()
                .name(format!("{}-{id}", config.thread_name))
                .spawn(move || {
                    if let Some(hook) = on_start {
                        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(id))) {
                            error!(
                                "Worker {id} start hook panicked: {}",
                                panic_message(payload.as_ref())
                            );
                        }
                    }
                    run_task_loop(id, &inner);
                })
                .map_err(|e| {
                    error!("Failed to spawn worker {id}: {e}");
                    e
                })?;
            pool.workers.push(worker);
        }

        debug!("Spawned worker pool with {} threads", config.threads);
        Ok(pool)
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Appends a task and wakes one idle worker.
    pub(crate) fn enqueue(&self, task: Task) {
        {
            let mut state = self.inner.state.lock().unwrap();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push_back(seq, task);
        }
        self.inner.available.notify_one();
    }

    /// Removes every task that has not started yet and hands them back.
    ///
    /// The caller decides when to drop them, so that their captures are
    /// released outside of any lock it holds.
    pub(crate) fn clear(&self) -> Vec<Task> {
        let discarded = self.inner.state.lock().unwrap().queue.take_all();
        self.inner.retired.notify_all();
        if !discarded.is_empty() {
            debug!("Discarded {} pending tasks", discarded.len());
        }
        discarded.into_iter().map(|queued| queued.task).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    /// Marks the current end of the queue.
    ///
    /// The returned point becomes ready once every task submitted so far
    /// has finished or been discarded; later submissions don't delay it.
    pub(crate) fn drain_point(&self) -> DrainPoint {
        DrainPoint {
            inner: self.inner.clone(),
            target: self.inner.state.lock().unwrap().next_seq,
        }
    }

    /// Stops every worker and joins it.
    ///
    /// Workers finish the task they are running but take no new ones;
    /// whatever is still queued is discarded. Calling this again is a no-op.
    pub(crate) fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.inner.state.lock().unwrap().shutting_down = true;
        self.inner.available.notify_all();

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                warn!("Worker pool shut down from one of its own workers, detaching it");
                continue;
            }
            if worker.join().is_err() {
                error!("Worker thread terminated by a panic");
            }
        }

        self.clear();
        debug!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A snapshot of the queue tail that can be waited on.
///
/// Holds the pool state alive on its own, so waiting never keeps the
/// owning queue borrowed.
pub(crate) struct DrainPoint {
    inner: Arc<Inner>,
    target: u64,
}

impl DrainPoint {
    /// Blocks until every task before this point is done, or until
    /// `deadline` if one is given.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> WaitStatus {
        let target = self.target;
        let state = self.inner.state.lock().unwrap();
        match deadline {
            None => {
                drop(
                    self.inner
                        .retired
                        .wait_while(state, |s| s.has_pending_before(target))
                        .unwrap(),
                );
                WaitStatus::Ready
            }
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                let (state, _) = self
                    .inner
                    .retired
                    .wait_timeout_while(state, timeout, |s| s.has_pending_before(target))
                    .unwrap();
                if state.has_pending_before(target) {
                    WaitStatus::Timeout
                } else {
                    WaitStatus::Ready
                }
            }
        }
    }
}

/// Body of every worker thread.
///
/// The shutdown flag is checked before the queue, and the task is popped
/// while the lock is still held, so no task is popped twice and tasks
/// leave the queue in submission order. Tasks run with the lock released.
fn run_task_loop(id: usize, inner: &Inner) {
    debug!("Worker {id} started");
    loop {
        let QueuedTask { seq, task } = {
            let state = inner.state.lock().unwrap();
            let mut state = inner
                .available
                .wait_while(state, |s| !s.shutting_down && s.queue.is_empty())
                .unwrap();
            if state.shutting_down {
                break;
            }
            match state.queue.pop_front() {
                Some(queued) => {
                    state.running.insert(queued.seq);
                    queued
                }
                None => continue,
            }
        };

        trace!("Worker {id} executing task {seq}");
        // Only fire-and-forget tasks can get here with a panic; dispatched
        // tasks capture theirs into the result channel.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            error!(
                "Worker {id} task panicked, continuing: {}",
                panic_message(payload.as_ref())
            );
        }

        inner.state.lock().unwrap().running.remove(&seq);
        inner.retired.notify_all();
    }
    debug!("Worker {id} exiting");
}
