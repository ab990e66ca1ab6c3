//! Worker pool that knows which batches are still in flight.
//!
//! Beyond executing tasks, the pool keeps a registry of every task that is
//! queued or running so `await_completion` can wait on a point-in-time
//! snapshot: everything submitted up to the call is waited for, anything
//! submitted later is ignored. `replace_task` keeps those snapshots honest
//! when failover swaps a task's identity, and caller-runs execution under
//! saturation is the intended backpressure on producers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::queue::{PopOutcome, TaskQueue};
use super::task::BatchTask;

/// Workers retire after a minute without work and are respawned on demand.
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Queue capacity per worker; past this, submission runs on the caller.
const QUEUE_SLOTS_PER_WORKER: usize = 3;

pub(crate) struct CompletionPool {
    thread_count: usize,
    queue: TaskQueue,
    active: Mutex<HashMap<u64, Arc<BatchTask>>>,
    snapshots: Mutex<HashMap<u64, VecDeque<Arc<BatchTask>>>>,
    next_waiter: AtomicU64,
    live_workers: AtomicUsize,
    stopped: AtomicBool,
}

impl CompletionPool {
    pub(crate) fn new(thread_count: usize) -> Arc<Self> {
        let thread_count = thread_count.max(1);
        Arc::new(Self {
            thread_count,
            queue: TaskQueue::new(thread_count * QUEUE_SLOTS_PER_WORKER),
            active: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(0),
            live_workers: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    /// Registers and enqueues a task. When the queue is saturated the task
    /// runs to completion on the submitting thread instead.
    pub(crate) fn submit(self: &Arc<Self>, task: Arc<BatchTask>) {
        self.active.lock().insert(task.id(), Arc::clone(&task));

        if self.stopped.load(Ordering::Acquire) {
            task.mark_cancelled();
            self.task_complete(&task);
            return;
        }

        match self.queue.try_push(task) {
            Ok(()) => self.ensure_worker(),
            Err(task) => {
                // Refusal means saturation, unless a concurrent shutdown
                // closed the queue first.
                if self.stopped.load(Ordering::Acquire) {
                    task.mark_cancelled();
                    self.task_complete(&task);
                    return;
                }
                tracing::debug!(
                    batch = task.batch_number(),
                    "task queue saturated; writing batch on the submitting thread"
                );
                task.run();
                self.task_complete(&task);
            }
        }
    }

    fn ensure_worker(self: &Arc<Self>) {
        loop {
            let live = self.live_workers.load(Ordering::Acquire);
            if live >= self.thread_count {
                return;
            }
            if self
                .live_workers
                .compare_exchange(live, live + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let pool = Arc::clone(self);
                let spawned = thread::Builder::new()
                    .name("docmover-writer".to_string())
                    .spawn(move || pool.run_worker());
                if let Err(err) = spawned {
                    self.live_workers.fetch_sub(1, Ordering::AcqRel);
                    tracing::error!(error = %err, "failed to spawn batch writer thread");
                }
                return;
            }
        }
    }

    fn run_worker(self: Arc<Self>) {
        loop {
            match self.queue.pop_or_idle(WORKER_IDLE_TIMEOUT) {
                PopOutcome::Task(task) => {
                    task.run();
                    self.task_complete(&task);
                }
                PopOutcome::Idle | PopOutcome::Stopped => break,
            }
        }
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
        // A push may have raced with this retirement.
        if !self.queue.is_empty() && !self.stopped.load(Ordering::Acquire) {
            self.ensure_worker();
        }
    }

    /// Removes a terminal task from the registry and every snapshot, then
    /// wakes its waiters.
    pub(crate) fn task_complete(&self, task: &Arc<BatchTask>) {
        self.active.lock().remove(&task.id());
        {
            let mut snapshots = self.snapshots.lock();
            for snapshot in snapshots.values_mut() {
                snapshot.retain(|entry| entry.id() != task.id());
            }
        }
        task.mark_done();
    }

    /// Swaps a task identity during failover so active waits carry over to
    /// the replacement.
    pub(crate) fn replace_task(&self, old: &Arc<BatchTask>, new: &Arc<BatchTask>) {
        {
            let mut active = self.active.lock();
            if active.remove(&old.id()).is_some() {
                active.insert(new.id(), Arc::clone(new));
            }
        }
        let mut swapped = false;
        {
            let mut snapshots = self.snapshots.lock();
            for snapshot in snapshots.values_mut() {
                for entry in snapshot.iter_mut() {
                    if entry.id() == old.id() {
                        *entry = Arc::clone(new);
                        swapped = true;
                    }
                }
            }
        }
        if swapped {
            old.notify_waiters();
        }
    }

    /// Removes the unstarted backlog for failover re-targeting. Drained
    /// tasks stay in the registry until replaced or resubmitted.
    pub(crate) fn drain_queued(&self) -> Vec<Arc<BatchTask>> {
        self.queue.drain()
    }

    /// Cancels all unstarted tasks and lets running ones finish. Returns the
    /// cancelled tasks.
    pub(crate) fn shutdown_now(&self) -> Vec<Arc<BatchTask>> {
        self.stopped.store(true, Ordering::Release);
        let cancelled = self.queue.drain();
        self.queue.stop();
        for task in &cancelled {
            task.mark_cancelled();
            self.task_complete(task);
        }
        cancelled
    }

    /// Waits until every task that was queued or running at the moment of
    /// this call has reached a terminal outcome.
    ///
    /// Returns false if the timeout expires first; remaining work is not
    /// cancelled. `Some(Duration::ZERO)` only succeeds on an already-empty
    /// snapshot.
    pub(crate) fn await_completion(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed) + 1;

        let snapshot: VecDeque<Arc<BatchTask>> =
            self.active.lock().values().cloned().collect();
        self.snapshots.lock().insert(waiter, snapshot);

        // Tasks may have completed between the copy and the registration;
        // reconcile so the snapshot only holds live tasks.
        let live: HashSet<u64> = self.active.lock().keys().copied().collect();
        if let Some(snapshot) = self.snapshots.lock().get_mut(&waiter) {
            snapshot.retain(|task| live.contains(&task.id()));
        }

        let drained = loop {
            let next = self
                .snapshots
                .lock()
                .get(&waiter)
                .and_then(|snapshot| snapshot.front().cloned());
            let Some(task) = next else {
                break true;
            };
            let finished = task.wait_while_pending(deadline, || {
                self.snapshot_contains(waiter, task.id()) && self.is_active(task.id())
            });
            if !finished {
                tracing::debug!("await_completion timed out");
                break false;
            }
        };

        self.snapshots.lock().remove(&waiter);
        drained
    }

    fn snapshot_contains(&self, waiter: u64, task_id: u64) -> bool {
        self.snapshots
            .lock()
            .get(&waiter)
            .is_some_and(|snapshot| snapshot.iter().any(|task| task.id() == task_id))
    }

    fn is_active(&self, task_id: u64) -> bool {
        self.active.lock().contains_key(&task_id)
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HostClient;
    use crate::error::MoverResult;
    use crate::listener::ListenerHub;
    use crate::roster::HostEntry;
    use crate::runtime::dispatch::task::FailureMode;
    use crate::types::{BytesHandle, Transform, WriteOp};
    use parking_lot::{Condvar as GateCondvar, Mutex as GateMutex};
    use std::sync::atomic::AtomicUsize;

    /// Client whose writes block until the gate opens.
    struct GatedClient {
        open: GateMutex<bool>,
        opened: GateCondvar,
        writes: AtomicUsize,
    }

    impl GatedClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: GateMutex::new(false),
                opened: GateCondvar::new(),
                writes: AtomicUsize::new(0),
            })
        }

        fn release(&self) {
            let mut open = self.open.lock();
            *open = true;
            self.opened.notify_all();
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl HostClient for GatedClient {
        fn host(&self) -> &str {
            "h1"
        }

        fn write(&self, _ops: &[WriteOp], _transform: Option<&Transform>) -> MoverResult<()> {
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn write_temporal(
            &self,
            _ops: &[WriteOp],
            _transform: Option<&Transform>,
            _temporal_collection: &str,
        ) -> MoverResult<()> {
            self.write(&[], None)
        }
    }

    fn gated_task(batch_number: u64, client: &Arc<GatedClient>) -> Arc<BatchTask> {
        let host = HostEntry {
            host_name: "h1".to_string(),
            client: Arc::clone(client) as Arc<dyn HostClient>,
        };
        BatchTask::new(
            batch_number,
            host,
            vec![WriteOp::document(
                format!("/doc/{batch_number}"),
                BytesHandle::new(b"{}".to_vec()),
            )],
            None,
            None,
            None,
            FailureMode::Listeners,
            Arc::new(ListenerHub::new()),
        )
        .unwrap()
    }

    #[test]
    fn await_on_empty_pool_returns_immediately() {
        let pool = CompletionPool::new(2);
        assert!(pool.await_completion(Some(Duration::ZERO)));
        assert!(pool.await_completion(None));
    }

    #[test]
    fn zero_timeout_fails_when_work_is_pending() {
        let pool = CompletionPool::new(1);
        let client = GatedClient::new();
        pool.submit(gated_task(1, &client));

        assert!(!pool.await_completion(Some(Duration::ZERO)));

        client.release();
        assert!(pool.await_completion(Some(Duration::from_secs(2))));
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn await_ignores_tasks_submitted_after_the_snapshot() {
        let pool = CompletionPool::new(2);
        let client = GatedClient::new();
        pool.submit(gated_task(1, &client));

        let waiter_pool = Arc::clone(&pool);
        let waiter = thread::spawn(move || waiter_pool.await_completion(Some(Duration::from_secs(2))));

        // Give the waiter a moment to take its snapshot, then pile on work
        // that stays gated forever from the waiter's point of view.
        thread::sleep(Duration::from_millis(50));
        let late_client = GatedClient::new();
        pool.submit(gated_task(2, &late_client));

        client.release();
        assert!(waiter.join().unwrap());
        assert_eq!(pool.active_count(), 1);

        late_client.release();
        assert!(pool.await_completion(Some(Duration::from_secs(2))));
    }

    #[test]
    fn saturation_runs_the_task_on_the_caller() {
        // One worker, three queue slots: the fifth concurrent submission
        // cannot be queued and must execute inline.
        let pool = CompletionPool::new(1);
        let client = GatedClient::new();

        pool.submit(gated_task(1, &client));
        // Wait for the worker to pick up the first task so the queue is
        // empty before we fill it.
        let deadline = Instant::now() + Duration::from_secs(2);
        while !pool.queue.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        for n in 2..=4 {
            pool.submit(gated_task(n, &client));
        }
        assert_eq!(pool.active_count(), 4);

        let overflow_pool = Arc::clone(&pool);
        let overflow_client = Arc::clone(&client);
        let submitter = thread::spawn(move || {
            overflow_pool.submit(gated_task(5, &overflow_client));
        });

        // The inline execution blocks on the gate; release it and everything
        // drains, including the caller-run batch.
        thread::sleep(Duration::from_millis(50));
        client.release();
        submitter.join().unwrap();

        assert!(pool.await_completion(Some(Duration::from_secs(2))));
        assert_eq!(client.writes(), 5);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn replace_task_carries_the_wait_to_the_replacement() {
        let pool = CompletionPool::new(1);
        let running = GatedClient::new();
        pool.submit(gated_task(1, &running));

        // Queued behind the running task.
        let queued_client = GatedClient::new();
        let queued = gated_task(2, &queued_client);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !pool.queue.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        pool.submit(Arc::clone(&queued));

        let waiter_pool = Arc::clone(&pool);
        let waiter = thread::spawn(move || waiter_pool.await_completion(Some(Duration::from_secs(4))));
        thread::sleep(Duration::from_millis(50));

        // Swap the queued task for a replacement targeting an open gate.
        let drained = pool.drain_queued();
        assert_eq!(drained.len(), 1);
        let replacement_client = GatedClient::new();
        replacement_client.release();
        let replacement = gated_task(2, &replacement_client);
        pool.replace_task(&drained[0], &replacement);
        pool.submit(Arc::clone(&replacement));

        running.release();
        assert!(waiter.join().unwrap());
        assert_eq!(replacement_client.writes(), 1);
        // The old task never ran.
        assert_eq!(queued_client.writes(), 0);
    }

    #[test]
    fn shutdown_now_cancels_unstarted_tasks() {
        let pool = CompletionPool::new(1);
        let client = GatedClient::new();
        pool.submit(gated_task(1, &client));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !pool.queue.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        pool.submit(gated_task(2, &client));
        pool.submit(gated_task(3, &client));

        let cancelled = pool.shutdown_now();
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.iter().all(|task| task.is_cancelled()));

        // The running task still finishes and the pool drains fully.
        client.release();
        assert!(pool.await_completion(Some(Duration::from_secs(2))));
        assert_eq!(client.writes(), 1);
        assert_eq!(pool.active_count(), 0);
    }
}
