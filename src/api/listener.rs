//! Batch outcome listeners and their dispatch.
//!
//! Listener failures are contained at the dispatch site: a panicking
//! listener is logged and the remaining listeners still run, so one faulty
//! callback cannot fail the batch or starve its peers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DocMoverError, MoverResult};
use crate::runtime::metrics::JobMetrics;
use crate::types::WriteBatch;

/// Invoked once for every batch whose write succeeded.
pub trait BatchSuccessListener: Send + Sync {
    fn on_batch(&self, batch: &WriteBatch);

    /// Called by `stop` so listeners holding resources can release them.
    fn close(&self) -> MoverResult<()> {
        Ok(())
    }
}

/// Invoked once for every batch whose write failed.
pub trait BatchFailureListener: Send + Sync {
    fn on_failure(&self, batch: &WriteBatch, error: &DocMoverError);

    fn close(&self) -> MoverResult<()> {
        Ok(())
    }
}

impl<F> BatchSuccessListener for F
where
    F: Fn(&WriteBatch) + Send + Sync,
{
    fn on_batch(&self, batch: &WriteBatch) {
        self(batch)
    }
}

impl<F> BatchFailureListener for F
where
    F: Fn(&WriteBatch, &DocMoverError) + Send + Sync,
{
    fn on_failure(&self, batch: &WriteBatch, error: &DocMoverError) {
        self(batch, error)
    }
}

/// Shared dispatch state: the registered listeners plus the job counters
/// that success and failure hooks maintain.
pub(crate) struct ListenerHub {
    success: RwLock<Vec<Arc<dyn BatchSuccessListener>>>,
    failure: RwLock<Vec<Arc<dyn BatchFailureListener>>>,
    metrics: JobMetrics,
}

impl ListenerHub {
    pub(crate) fn new() -> Self {
        Self {
            success: RwLock::new(Vec::new()),
            failure: RwLock::new(Vec::new()),
            metrics: JobMetrics::new(),
        }
    }

    pub(crate) fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }

    pub(crate) fn items_so_far(&self) -> u64 {
        self.metrics.items_so_far()
    }

    pub(crate) fn add_success(&self, listener: Arc<dyn BatchSuccessListener>) {
        self.success.write().push(listener);
    }

    pub(crate) fn add_failure(&self, listener: Arc<dyn BatchFailureListener>) {
        self.failure.write().push(listener);
    }

    pub(crate) fn replace_success(&self, listeners: Vec<Arc<dyn BatchSuccessListener>>) {
        *self.success.write() = listeners;
    }

    pub(crate) fn replace_failure(&self, listeners: Vec<Arc<dyn BatchFailureListener>>) {
        *self.failure.write() = listeners;
    }

    /// Advances the item counter and fans the batch out to success listeners.
    pub(crate) fn dispatch_success(&self, batch_number: u64, host: &str, items: Vec<crate::types::WriteOp>) {
        let items_so_far = self.metrics.record_success(items.len() as u64);
        let batch = WriteBatch::new(batch_number, host.to_string(), items, items_so_far);
        let listeners = self.success.read().clone();
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_batch(&batch))) {
                tracing::error!(
                    batch = batch_number,
                    panic = ?panic_message(&panic),
                    "batch success listener panicked"
                );
            }
        }
    }

    /// Fans the failure out without advancing the item counter.
    pub(crate) fn dispatch_failure(
        &self,
        batch_number: u64,
        host: &str,
        items: Vec<crate::types::WriteOp>,
        error: &DocMoverError,
    ) {
        self.metrics.record_failure(items.len() as u64);
        let batch = WriteBatch::new(batch_number, host.to_string(), items, self.items_so_far());
        let listeners = self.failure.read().clone();
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_failure(&batch, error))) {
                tracing::error!(
                    batch = batch_number,
                    panic = ?panic_message(&panic),
                    "batch failure listener panicked"
                );
            }
        }
    }

    /// Closes every registered listener, logging close failures.
    pub(crate) fn close_all(&self) {
        for listener in self.success.read().iter() {
            if let Err(err) = listener.close() {
                tracing::error!(error = %err, "batch success listener cannot be closed");
            }
        }
        for listener in self.failure.read().iter() {
            if let Err(err) = listener.close() {
                tracing::error!(error = %err, "batch failure listener cannot be closed");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
