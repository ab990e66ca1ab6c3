//! Unbounded multi-producer queue of pending write operations.
//!
//! Producers append without blocking, batch assembly pops single items, and
//! `flush` takes the whole backlog in one atomic drain. Ordering is FIFO per
//! producer; concurrent producers may interleave.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::types::WriteOp;

#[derive(Default)]
pub(crate) struct PendingQueue {
    inner: Mutex<VecDeque<WriteOp>>,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, op: WriteOp) {
        self.inner.lock().push_back(op);
    }

    pub(crate) fn poll(&self) -> Option<WriteOp> {
        self.inner.lock().pop_front()
    }

    /// Empties the queue and returns its contents. Appends racing with the
    /// drain land in the queue afterwards and are not lost.
    pub(crate) fn drain(&self) -> Vec<WriteOp> {
        let mut queue = self.inner.lock();
        queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BytesHandle;

    fn op(uri: &str) -> WriteOp {
        WriteOp::document(uri, BytesHandle::new(b"{}".to_vec()))
    }

    #[test]
    fn poll_is_fifo() {
        let queue = PendingQueue::new();
        queue.push(op("/a"));
        queue.push(op("/b"));

        assert_eq!(queue.poll().unwrap().uri(), Some("/a"));
        assert_eq!(queue.poll().unwrap().uri(), Some("/b"));
        assert!(queue.poll().is_none());
    }

    #[test]
    fn drain_empties_the_queue() {
        let queue = PendingQueue::new();
        for i in 0..5 {
            queue.push(op(&format!("/doc/{i}")));
        }

        let drained = queue.drain();
        assert_eq!(drained.len(), 5);
        assert!(queue.poll().is_none());
        assert!(queue.drain().is_empty());
    }
}
