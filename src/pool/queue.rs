use std::collections::VecDeque;

use crate::task::Task;

/// A queued task tagged with its submission number.
pub(crate) struct QueuedTask {
    pub(crate) seq: u64,
    pub(crate) task: Task,
}

/// FIFO buffer of pending tasks.
///
/// Has no locking of its own: it only ever lives inside the pool's mutex.
#[derive(Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<QueuedTask>,
}

impl TaskQueue {
    pub(crate) fn push_back(&mut self, seq: u64, task: Task) {
        debug_assert!(self.tasks.back().map_or(true, |last| last.seq < seq));
        self.tasks.push_back(QueuedTask { seq, task });
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueuedTask> {
        self.tasks.pop_front()
    }

    /// Submission number of the oldest pending task.
    pub(crate) fn front_seq(&self) -> Option<u64> {
        self.tasks.front().map(|queued| queued.seq)
    }

    /// Removes every pending task and hands them back to the caller, so
    /// they can be dropped after the lock is released.
    pub(crate) fn take_all(&mut self) -> VecDeque<QueuedTask> {
        std::mem::take(&mut self.tasks)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::task::Runnable;

    fn recording_task(log: &Arc<Mutex<Vec<u32>>>, id: u32) -> Task {
        let log = log.clone();
        Box::new(move || log.lock().unwrap().push(id))
    }

    #[test]
    fn pops_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TaskQueue::default();
        for id in 0..5 {
            queue.push_back(u64::from(id), recording_task(&log, id));
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.front_seq(), Some(0));

        while let Some(queued) = queue.pop_front() {
            queued.task.run();
        }
        assert_eq!(queue.front_seq(), None);
        assert!(queue.is_empty());
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn take_all_empties_the_queue_without_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TaskQueue::default();
        queue.push_back(1, recording_task(&log, 1));
        queue.push_back(2, recording_task(&log, 2));

        let discarded = queue.take_all();
        assert_eq!(discarded.len(), 2);
        assert!(queue.is_empty());
        drop(discarded);
        assert!(log.lock().unwrap().is_empty());
    }
}
