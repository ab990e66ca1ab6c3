//! Bounded FIFO feeding the pool's workers.
//!
//! A full queue refuses the push instead of blocking; the pool turns that
//! refusal into caller-runs execution. `drain` hands the unstarted backlog
//! to failover or shutdown without letting a worker grab entries mid-sweep.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::task::BatchTask;

pub(crate) enum PopOutcome {
    Task(Arc<BatchTask>),
    Idle,
    Stopped,
}

pub(crate) struct TaskQueue {
    inner: Mutex<VecDeque<Arc<BatchTask>>>,
    not_empty: Condvar,
    stopped: AtomicBool,
    capacity: usize,
}

impl TaskQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            stopped: AtomicBool::new(false),
            capacity: capacity.max(1),
        }
    }

    /// Appends the task unless the queue is stopped or at capacity; the
    /// task is handed back on refusal.
    pub(crate) fn try_push(&self, task: Arc<BatchTask>) -> Result<(), Arc<BatchTask>> {
        let mut queue = self.inner.lock();
        if self.stopped.load(Ordering::Acquire) || queue.len() >= self.capacity {
            return Err(task);
        }
        queue.push_back(task);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pops the next task, waiting up to `idle` for one to arrive. Remaining
    /// tasks are served even after a stop so running work can finish first.
    pub(crate) fn pop_or_idle(&self, idle: Duration) -> PopOutcome {
        let mut queue = self.inner.lock();
        loop {
            if let Some(task) = queue.pop_front() {
                return PopOutcome::Task(task);
            }
            if self.stopped.load(Ordering::Acquire) {
                return PopOutcome::Stopped;
            }
            if self.not_empty.wait_for(&mut queue, idle).timed_out() && queue.is_empty() {
                return PopOutcome::Idle;
            }
        }
    }

    pub(crate) fn drain(&self) -> Vec<Arc<BatchTask>> {
        let mut queue = self.inner.lock();
        queue.drain(..).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }
}
