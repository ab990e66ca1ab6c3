use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::client::{ClusterGateway, ForestConfiguration};
use crate::error::{DocMoverError, MoverResult};
use crate::listener::ListenerHub;
use crate::roster::HostRoster;
use crate::runtime::dispatch::{BatchTask, BeforeWriteHook, CompletionPool, FailureMode};
use crate::runtime::pending::PendingQueue;
use crate::types::{
    DocumentHandle, JobTicket, JsonHandle, SharedHandle, Transform, WriteBatch, WriteOp,
};

pub(crate) const DEFAULT_BATCH_SIZE: usize = 100;

/// Batched, cluster-aware write coordinator.
///
/// Many threads call [`add`] concurrently; the batcher queues documents
/// without blocking, carves off a batch every `batch_size` submissions, and
/// dispatches each batch to the next host in the rotation on an internal
/// worker pool. Success and failure listeners observe every batch exactly
/// once, [`flush_and_wait`] forces out a short final batch, and
/// [`await_completion`] blocks until everything submitted so far is done.
///
/// The design is deliberately non-blocking on the producer side: batch
/// formation is triggered by an atomic record counter (exactly one producer
/// observes each `batch_size` boundary), so no lock coordinates the hot
/// path. Producers only slow down when the worker pool saturates, at which
/// point the submitting thread writes the batch itself.
///
/// Cloning is cheap and shares the same job.
///
/// [`add`]: WriteBatcher::add
/// [`flush_and_wait`]: WriteBatcher::flush_and_wait
/// [`await_completion`]: WriteBatcher::await_completion
pub struct WriteBatcher {
    inner: Arc<BatcherInner>,
}

impl Clone for WriteBatcher {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for WriteBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatcher")
            .field("batch_size", &self.inner.batch_size.load(Ordering::Acquire))
            .field("thread_count", &self.inner.thread_count.load(Ordering::Acquire))
            .field("started", &self.inner.started.load(Ordering::Acquire))
            .field("stopped", &self.inner.stopped.load(Ordering::Acquire))
            .finish()
    }
}

pub(crate) struct BatcherInner {
    pub(crate) gateway: Arc<dyn ClusterGateway>,
    pub(crate) forest_config: RwLock<Arc<dyn ForestConfiguration>>,
    pub(crate) roster: RwLock<Arc<HostRoster>>,
    pub(crate) queue: PendingQueue,
    pub(crate) hub: Arc<ListenerHub>,
    pub(crate) settings: Mutex<JobSettings>,
    pub(crate) batch_size: AtomicUsize,
    pub(crate) thread_count: AtomicUsize,
    batch_number: AtomicU64,
    batch_counter: AtomicU64,
    pub(crate) started: AtomicBool,
    pub(crate) stopped: AtomicBool,
    /// Serializes `initialize`, `with_forest_config`, and `stop`.
    lifecycle: Mutex<()>,
    pool: RwLock<Option<Arc<CompletionPool>>>,
    pub(crate) job_ticket: Mutex<Option<JobTicket>>,
    pub(crate) job_start_time: Mutex<Option<SystemTime>>,
    pub(crate) job_end_time: Mutex<Option<SystemTime>>,
}

#[derive(Default)]
pub(crate) struct JobSettings {
    pub(crate) job_name: Option<String>,
    pub(crate) job_id: Option<String>,
    pub(crate) transform: Option<Transform>,
    pub(crate) temporal_collection: Option<String>,
    pub(crate) default_metadata: Option<SharedHandle>,
    pub(crate) before_write: Option<BeforeWriteHook>,
}

impl WriteBatcher {
    /// Creates a batcher over the given gateway and topology, building the
    /// initial host roster.
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        forest_config: Arc<dyn ForestConfiguration>,
    ) -> MoverResult<Self> {
        let batcher = Self {
            inner: Arc::new(BatcherInner {
                gateway,
                forest_config: RwLock::new(Arc::clone(&forest_config)),
                roster: RwLock::new(Arc::new(HostRoster::empty())),
                queue: PendingQueue::new(),
                hub: Arc::new(ListenerHub::new()),
                settings: Mutex::new(JobSettings::default()),
                batch_size: AtomicUsize::new(DEFAULT_BATCH_SIZE),
                // Zero means "one thread per host", resolved at initialize.
                thread_count: AtomicUsize::new(0),
                batch_number: AtomicU64::new(0),
                batch_counter: AtomicU64::new(0),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                lifecycle: Mutex::new(()),
                pool: RwLock::new(None),
                job_ticket: Mutex::new(None),
                job_start_time: Mutex::new(None),
                job_end_time: Mutex::new(None),
            }),
        };
        batcher.with_forest_config(forest_config)?;
        Ok(batcher)
    }

    /// Starts the job under the given ticket. Equivalent to the implicit
    /// start performed by the first `add` or `flush`, plus ticket bookkeeping.
    pub fn start(&self, ticket: JobTicket) -> MoverResult<()> {
        *self.inner.job_ticket.lock() = Some(ticket);
        self.initialize()
    }

    /// Lazily brings the job into the running state: resolves defaulted
    /// configuration and builds the worker pool. Idempotent and thread-safe.
    pub(crate) fn initialize(&self) -> MoverResult<()> {
        if self.inner.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.inner.lifecycle.lock();
        if self.inner.started.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(DocMoverError::Stopped);
        }

        if self.inner.batch_size.load(Ordering::Acquire) == 0 {
            self.inner.batch_size.store(1, Ordering::Release);
            tracing::warn!("batch size should be 1 or greater; raising it to 1");
        }
        if self.inner.thread_count.load(Ordering::Acquire) == 0 {
            let host_count = self.inner.roster.read().len();
            self.inner.thread_count.store(host_count, Ordering::Release);
            tracing::warn!(
                thread_count = host_count,
                "thread count should be 1 or greater; defaulting to one thread per host"
            );
        }

        let thread_count = self.inner.thread_count.load(Ordering::Acquire);
        *self.inner.pool.write() = Some(CompletionPool::new(thread_count));

        tracing::debug!(
            thread_count,
            batch_size = self.inner.batch_size.load(Ordering::Acquire),
            "write job initialized"
        );
        *self.inner.job_start_time.lock() = Some(SystemTime::now());
        self.inner.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Queues one document with content only.
    pub fn add(
        &self,
        uri: impl Into<String>,
        content: impl DocumentHandle + 'static,
    ) -> MoverResult<()> {
        self.add_op(WriteOp::document(uri, content))
    }

    /// Queues one document with metadata and content.
    pub fn add_with_metadata(
        &self,
        uri: impl Into<String>,
        metadata: impl DocumentHandle + 'static,
        content: impl DocumentHandle + 'static,
    ) -> MoverResult<()> {
        self.add_op(WriteOp::with_metadata(uri, metadata, content))
    }

    /// Queues a value serialized to JSON content.
    pub fn add_serialized<T: Serialize>(&self, uri: impl Into<String>, value: &T) -> MoverResult<()> {
        let content = JsonHandle::new(serde_json::to_value(value)?);
        self.add_op(WriteOp::document(uri, content))
    }

    /// Queues every operation of the iterator, in order. Equivalent to
    /// calling [`add_op`](WriteBatcher::add_op) for each element.
    pub fn add_all(&self, ops: impl IntoIterator<Item = WriteOp>) -> MoverResult<()> {
        for op in ops {
            self.add_op(op)?;
        }
        Ok(())
    }

    /// Queues one write operation without blocking.
    ///
    /// Exactly one producer observes each `batch_size` boundary of the
    /// shared record counter and assembles the batch inline; everyone else
    /// returns immediately after the queue append.
    pub fn add_op(&self, op: WriteOp) -> MoverResult<()> {
        match op.uri() {
            Some(uri) if !uri.is_empty() => {}
            Some(_) => return Err(DocMoverError::config("uri must not be empty")),
            None => {
                return Err(DocMoverError::config(
                    "only document operations can be submitted",
                ))
            }
        }
        self.initialize()?;
        self.require_not_stopped()?;

        tracing::trace!(uri = op.uri().unwrap_or_default(), "queued document");
        self.inner.queue.push(op);

        let record_num = self.inner.batch_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let batch_size = self.inner.batch_size.load(Ordering::Acquire) as u64;
        if record_num % batch_size == 0 {
            self.assemble_and_submit(batch_size as usize)?;
        }
        Ok(())
    }

    /// Builds one batch from the head of the pending queue and hands it to
    /// the pool. Fewer than `batch_size` documents is tolerated: a
    /// concurrent producer may not have finished its append yet.
    fn assemble_and_submit(&self, batch_size: usize) -> MoverResult<()> {
        let batch_number = self.next_batch_number();
        let (mut ops, reserved) = self.batch_seed();
        for _ in 0..batch_size {
            match self.inner.queue.poll() {
                Some(doc) => ops.push(doc),
                None => break,
            }
        }
        if ops.len() > reserved {
            let task = self.new_task(batch_number, ops, FailureMode::Listeners)?;
            self.pool()?.submit(task);
        }
        Ok(())
    }

    /// Submits all queued documents immediately, in batches of up to
    /// `batch_size`, and returns without waiting.
    pub fn flush_async(&self) -> MoverResult<()> {
        self.flush(false)
    }

    /// Like [`flush_async`](WriteBatcher::flush_async), then blocks until
    /// every previously submitted batch has finished.
    pub fn flush_and_wait(&self) -> MoverResult<()> {
        self.flush(true)
    }

    fn flush(&self, wait_for_completion: bool) -> MoverResult<()> {
        self.require_started()?;
        self.require_not_stopped()?;

        // Reset the record counter so the next natural batch starts clean.
        self.inner.batch_counter.store(0, Ordering::Release);
        let docs = self.inner.queue.drain();
        tracing::trace!(count = docs.len(), "flushing queued documents");

        let batch_size = self.inner.batch_size.load(Ordering::Acquire).max(1);
        let total = docs.len();
        let mut docs = docs.into_iter();
        let mut flushed = 0usize;
        while flushed < total {
            if self.is_stopped() {
                tracing::warn!(
                    abandoned = total - flushed,
                    "job is now stopped, preventing the flush of queued documents"
                );
                if wait_for_completion {
                    self.await_completion()?;
                }
                return Ok(());
            }
            let batch_number = self.next_batch_number();
            let (mut ops, _reserved) = self.batch_seed();
            for _ in 0..batch_size {
                match docs.next() {
                    Some(doc) => {
                        ops.push(doc);
                        flushed += 1;
                    }
                    None => break,
                }
            }
            let task = self.new_task(batch_number, ops, FailureMode::Listeners)?;
            self.pool()?.submit(task);
        }

        if wait_for_completion {
            self.await_completion()?;
        }
        Ok(())
    }

    /// Blocks until every batch submitted before this call has reached a
    /// terminal outcome. Returns `Ok(true)` once drained.
    pub fn await_completion(&self) -> MoverResult<bool> {
        self.require_started()?;
        Ok(self.pool()?.await_completion(None))
    }

    /// Bounded-wait variant of [`await_completion`]. Returns `Ok(false)` if
    /// the timeout expires first; remaining work is not cancelled. A zero
    /// timeout succeeds only when nothing is in flight.
    ///
    /// [`await_completion`]: WriteBatcher::await_completion
    pub fn await_completion_for(&self, timeout: Duration) -> MoverResult<bool> {
        self.require_started()?;
        Ok(self.pool()?.await_completion(Some(timeout)))
    }

    /// Rewrites a batch synchronously on the calling thread. Failure
    /// listeners are suppressed; any write error is returned to the caller.
    pub fn retry(&self, batch: &WriteBatch) -> MoverResult<()> {
        self.retry_batch(batch, false)
    }

    /// Like [`retry`](WriteBatcher::retry), but failure listeners observe
    /// the error before it is returned.
    pub fn retry_with_failure_listeners(&self, batch: &WriteBatch) -> MoverResult<()> {
        self.retry_batch(batch, true)
    }

    fn retry_batch(&self, batch: &WriteBatch, call_failure_listeners: bool) -> MoverResult<()> {
        if self.is_stopped() {
            tracing::warn!(batch = batch.batch_number(), "job is now stopped, aborting the retry");
            return Ok(());
        }
        let task = self.new_task(
            batch.batch_number(),
            batch.items().to_vec(),
            FailureMode::Listeners,
        )?;
        match task.execute() {
            Ok(()) => {
                self.inner.hub.dispatch_success(
                    task.batch_number(),
                    task.host_name(),
                    task.document_items(),
                );
                Ok(())
            }
            Err(err) => {
                if call_failure_listeners {
                    self.inner.hub.dispatch_failure(
                        task.batch_number(),
                        task.host_name(),
                        task.document_items(),
                        &err,
                    );
                }
                Err(err)
            }
        }
    }

    /// Stops the job: aborts unstarted batches, records the end time, and
    /// closes every listener that holds resources. Running batches finish
    /// and still notify their listeners.
    pub fn stop(&self) {
        let _guard = self.inner.lifecycle.lock();
        if self
            .inner
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self.inner.job_end_time.lock() = Some(SystemTime::now());
        if let Some(pool) = self.inner.pool.read().clone() {
            let cancelled = pool.shutdown_now();
            if !cancelled.is_empty() {
                tracing::debug!(count = cancelled.len(), "cancelled unstarted batches");
            }
        }
        self.inner.hub.close_all();
    }

    /// Applies a new forest configuration, rebuilding the host roster.
    ///
    /// The only reconfiguration allowed while the job runs. When hosts drop
    /// out of the rotation, queued batches targeting them are re-targeted
    /// onto the new roster and swapped into any in-progress
    /// `await_completion` snapshots, and a primary client pointing at a
    /// removed host is reassigned to a random surviving one.
    pub fn with_forest_config(
        &self,
        forest_config: Arc<dyn ForestConfiguration>,
    ) -> MoverResult<&Self> {
        let _guard = self.inner.lifecycle.lock();

        let previous = self.inner.roster.read().clone();
        let (roster, removed) = HostRoster::rebuild(
            &previous,
            forest_config.as_ref(),
            self.inner.gateway.as_ref(),
        )?;
        let roster = Arc::new(roster);
        *self.inner.roster.write() = Arc::clone(&roster);
        *self.inner.forest_config.write() = forest_config;

        if removed.is_empty() {
            return Ok(self);
        }
        let removed_hosts: HashSet<&str> =
            removed.iter().map(|entry| entry.host_name.as_str()).collect();
        tracing::info!(removed = ?removed_hosts, "hosts left the rotation");

        // Before the job starts there is no pool and nothing in flight.
        let Some(pool) = self.inner.pool.read().clone() else {
            return Ok(self);
        };

        if removed_hosts.contains(self.inner.gateway.primary_host().as_str()) {
            let index = (rand::random::<u32>() as usize) % roster.len();
            let entry = &roster.entries()[index];
            self.inner.gateway.set_primary(Arc::clone(&entry.client));
            tracing::info!(host = %entry.host_name, "reassigned primary client after failover");
        }

        // Re-target queued work. Batches aimed at a removed host get a fresh
        // task on the new roster under the same batch number; the rest
        // re-enter the queue in their original order.
        for task in pool.drain_queued() {
            if removed_hosts.contains(task.host_name()) {
                let replacement = self.new_task(
                    task.batch_number(),
                    task.ops().to_vec(),
                    FailureMode::FailoverRetry,
                )?;
                pool.replace_task(&task, &replacement);
                pool.submit(replacement);
            } else {
                pool.submit(task);
            }
        }
        Ok(self)
    }

    fn new_task(
        &self,
        batch_number: u64,
        ops: Vec<WriteOp>,
        failure_mode: FailureMode,
    ) -> MoverResult<Arc<BatchTask>> {
        let roster = self.inner.roster.read().clone();
        let host = roster.entry_for_batch(batch_number).clone();
        let settings = self.inner.settings.lock();
        BatchTask::new(
            batch_number,
            host,
            ops,
            settings.transform.clone(),
            settings.temporal_collection.clone(),
            settings.before_write.clone(),
            failure_mode,
            Arc::clone(&self.inner.hub),
        )
    }

    fn next_batch_number(&self) -> u64 {
        self.inner.batch_number.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Seed ops for a new batch: the default-metadata marker when one is
    /// configured, and the number of slots it reserves.
    fn batch_seed(&self) -> (Vec<WriteOp>, usize) {
        match self.inner.settings.lock().default_metadata.clone() {
            Some(metadata) => (vec![WriteOp::default_metadata(metadata)], 1),
            None => (Vec::new(), 0),
        }
    }

    fn pool(&self) -> MoverResult<Arc<CompletionPool>> {
        self.inner
            .pool
            .read()
            .clone()
            .ok_or(DocMoverError::NotStarted)
    }

    pub(crate) fn inner(&self) -> &BatcherInner {
        &self.inner
    }

    pub(crate) fn require_started(&self) -> MoverResult<()> {
        if self.inner.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DocMoverError::NotStarted)
        }
    }

    pub(crate) fn require_not_stopped(&self) -> MoverResult<()> {
        if self.is_stopped() {
            Err(DocMoverError::Stopped)
        } else {
            Ok(())
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl Drop for BatcherInner {
    fn drop(&mut self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if let Some(pool) = self.pool.get_mut().take() {
            let cancelled = pool.shutdown_now();
            tracing::warn!(
                cancelled = cancelled.len(),
                "write batcher dropped without stop; aborting queued batches"
            );
        }
    }
}
