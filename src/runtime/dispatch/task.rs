//! The unit of work executed by the completion pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{DocMoverError, MoverResult};
use crate::listener::ListenerHub;
use crate::roster::HostEntry;
use crate::types::{Transform, WriteBatch, WriteOp};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// Hook invoked just before a batch goes over the wire.
pub(crate) type BeforeWriteHook = Arc<dyn Fn(&WriteBatch) + Send + Sync>;

/// What a worker does with a write failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureMode {
    /// Route the error to the registered failure listeners.
    Listeners,
    /// Failover resubmission: failure listeners are suppressed and the
    /// error is wrapped and logged as a failed retry.
    FailoverRetry,
}

/// Writes one batch through a host client, then runs the success or failure
/// callbacks and closes every closeable handle.
///
/// Identity (`id`) is what the pool's registry and snapshots key on; the
/// `completed` mutex + condvar pair is the per-task primitive that
/// `await_completion` waiters block on.
pub(crate) struct BatchTask {
    id: u64,
    batch_number: u64,
    host: HostEntry,
    ops: Vec<WriteOp>,
    transform: Option<Transform>,
    temporal_collection: Option<String>,
    before_write: Option<BeforeWriteHook>,
    failure_mode: FailureMode,
    hub: Arc<ListenerHub>,
    cancelled: AtomicBool,
    completed: Mutex<bool>,
    completed_cv: Condvar,
}

impl std::fmt::Debug for BatchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTask")
            .field("id", &self.id)
            .field("batch_number", &self.batch_number)
            .field("host", &self.host)
            .field("failure_mode", &self.failure_mode)
            .finish()
    }
}

impl BatchTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        batch_number: u64,
        host: HostEntry,
        ops: Vec<WriteOp>,
        transform: Option<Transform>,
        temporal_collection: Option<String>,
        before_write: Option<BeforeWriteHook>,
        failure_mode: FailureMode,
        hub: Arc<ListenerHub>,
    ) -> MoverResult<Arc<Self>> {
        if !ops.iter().any(WriteOp::is_document) {
            return Err(DocMoverError::config("attempt to write an empty batch"));
        }
        Ok(Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed) + 1,
            batch_number,
            host,
            ops,
            transform,
            temporal_collection,
            before_write,
            failure_mode,
            hub,
            cancelled: AtomicBool::new(false),
            completed: Mutex::new(false),
            completed_cv: Condvar::new(),
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn batch_number(&self) -> u64 {
        self.batch_number
    }

    pub(crate) fn host_name(&self) -> &str {
        &self.host.host_name
    }

    pub(crate) fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Document operations only; the default-metadata marker stays internal.
    pub(crate) fn document_items(&self) -> Vec<WriteOp> {
        self.ops
            .iter()
            .filter(|op| op.is_document())
            .cloned()
            .collect()
    }

    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Performs the write and closes the handles, without dispatching any
    /// listeners. Used directly by the inline retry paths.
    pub(crate) fn execute(&self) -> MoverResult<()> {
        if let Some(hook) = &self.before_write {
            let batch = WriteBatch::new(
                self.batch_number,
                self.host.host_name.clone(),
                self.document_items(),
                self.hub.items_so_far(),
            );
            hook(&batch);
        }

        tracing::trace!(
            batch = self.batch_number,
            host = %self.host.host_name,
            "begin write batch"
        );

        match &self.temporal_collection {
            None => self.host.client.write(&self.ops, self.transform.as_ref())?,
            Some(collection) => {
                self.host
                    .client
                    .write_temporal(&self.ops, self.transform.as_ref(), collection)?
            }
        }

        self.close_all_handles()
    }

    /// Worker-side entry point: execute, then dispatch the outcome.
    pub(crate) fn run(&self) {
        if self.is_cancelled() {
            return;
        }
        match self.execute() {
            Ok(()) => self.hub.dispatch_success(
                self.batch_number,
                &self.host.host_name,
                self.document_items(),
            ),
            Err(err) => match self.failure_mode {
                FailureMode::Listeners => {
                    tracing::trace!(
                        batch = self.batch_number,
                        host = %self.host.host_name,
                        "failed batch sent to host"
                    );
                    self.hub.dispatch_failure(
                        self.batch_number,
                        &self.host.host_name,
                        self.document_items(),
                        &err,
                    );
                }
                FailureMode::FailoverRetry => {
                    let wrapped = DocMoverError::RetryFailed {
                        batch_number: self.batch_number,
                        source: Box::new(err),
                    };
                    tracing::error!(
                        batch = self.batch_number,
                        host = %self.host.host_name,
                        error = %wrapped,
                        "failover resubmission failed"
                    );
                }
            },
        }
    }

    /// Closes every op's content and metadata handle. All handles are
    /// attempted; the last error wins and is returned after the sweep.
    fn close_all_handles(&self) -> MoverResult<()> {
        let mut last_error = None;
        for op in &self.ops {
            for handle in [op.content(), op.metadata()].into_iter().flatten() {
                if let Err(err) = handle.close() {
                    tracing::error!(
                        batch = self.batch_number,
                        error = %err,
                        "error closing document handle"
                    );
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Marks the task terminal and wakes every waiter parked on it.
    pub(crate) fn mark_done(&self) {
        let mut completed = self.completed.lock();
        *completed = true;
        self.completed_cv.notify_all();
    }

    /// Wakes waiters without completing the task; used when the task's
    /// identity is swapped out of a snapshot during failover.
    pub(crate) fn notify_waiters(&self) {
        let _completed = self.completed.lock();
        self.completed_cv.notify_all();
    }

    /// Blocks until `still_pending` turns false or the deadline passes.
    ///
    /// The predicate is evaluated under this task's completion lock, and
    /// completion/replacement both update their bookkeeping before taking
    /// that lock to notify, so a wakeup can never be missed.
    pub(crate) fn wait_while_pending(
        &self,
        deadline: Option<Instant>,
        still_pending: impl Fn() -> bool,
    ) -> bool {
        let mut completed = self.completed.lock();
        while still_pending() {
            match deadline {
                Some(deadline) => {
                    let timed_out = self
                        .completed_cv
                        .wait_until(&mut completed, deadline)
                        .timed_out();
                    if timed_out && still_pending() {
                        return false;
                    }
                }
                None => self.completed_cv.wait(&mut completed),
            }
        }
        true
    }
}
