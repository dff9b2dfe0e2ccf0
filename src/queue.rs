//! The thread-safe FIFO tasks travel through.
//!
//! One instance serves as the pool-wide global queue; each worker owns a
//! local instance of the same type. Both back-pressure edges are
//! signalled: producers wait on not-full, consumers on not-empty, and both
//! waits are bounded so the pool's shutdown flag is observed within a
//! small, configuration-independent latency.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::task::Task;

pub(crate) struct TaskQueue {
    limit: Option<usize>,
    locked: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl TaskQueue {
    /// How long a bounded enqueue waits for space before reporting FULL.
    pub(crate) const FULL_WAIT: Duration = Duration::from_millis(100);
    /// How long a dequeue waits for work before reporting empty.
    pub(crate) const EMPTY_WAIT: Duration = Duration::from_millis(10);

    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            locked: Mutex::new(match limit {
                Some(limit) => VecDeque::with_capacity(limit),
                None => VecDeque::new(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Appends `task`, waiting up to [`Self::FULL_WAIT`] for space when a
    /// capacity is configured. On refusal the task is handed back.
    pub fn enqueue(&self, task: Task) -> Result<(), Task> {
        let mut queue = self.locked.lock();
        if let Some(limit) = self.limit {
            if queue.len() >= limit {
                let deadline = Instant::now() + Self::FULL_WAIT;
                while queue.len() >= limit {
                    if self.not_full.wait_until(&mut queue, deadline).timed_out() {
                        if queue.len() >= limit {
                            return Err(task);
                        }
                        break;
                    }
                }
            }
        }
        queue.push_back(task);
        drop(queue);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the front task, waiting up to [`Self::EMPTY_WAIT`] for one
    /// to arrive.
    pub fn dequeue(&self) -> Option<Task> {
        let mut queue = self.locked.lock();
        if queue.is_empty() {
            let deadline = Instant::now() + Self::EMPTY_WAIT;
            while queue.is_empty() {
                if self.not_empty.wait_until(&mut queue, deadline).timed_out() {
                    break;
                }
            }
        }
        self.finish_pop(queue)
    }

    /// Removes the front task without waiting.
    pub fn try_dequeue(&self) -> Option<Task> {
        self.finish_pop(self.locked.lock())
    }

    /// Steals the front task without ever blocking the owner: the lock is
    /// only tried, and one task is always left behind to keep the victim's
    /// pipeline warm.
    pub fn try_steal(&self) -> Option<Task> {
        let queue = self.locked.try_lock()?;
        if queue.len() <= 1 {
            return None;
        }
        self.finish_pop(queue)
    }

    pub fn len(&self) -> usize {
        self.locked.lock().len()
    }

    fn finish_pop(&self, mut queue: MutexGuard<'_, VecDeque<Task>>) -> Option<Task> {
        let task = queue.pop_front()?;
        let below_cap = self.limit.is_some_and(|limit| queue.len() < limit);
        drop(queue);
        if below_cap {
            self.not_full.notify_one();
        }
        Some(task)
    }
}
