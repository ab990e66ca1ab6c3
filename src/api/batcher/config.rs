//! Fluent configuration, listener registration, and introspection.
//!
//! Configuration is immutable once the job leaves the configurable state:
//! every setter fails after `start` or the first `add`. Additive listener
//! registration stays open for the whole job lifetime; wholesale listener
//! replacement does not.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use crate::client::ForestConfiguration;
use crate::error::{DocMoverError, MoverResult};
use crate::listener::{BatchFailureListener, BatchSuccessListener};
use crate::runtime::metrics::JobReport;
use crate::types::{DocumentHandle, JobTicket, SharedHandle, Transform, WriteBatch};

use super::core::WriteBatcher;

impl WriteBatcher {
    fn require_not_started(&self) -> MoverResult<()> {
        if self.is_started() {
            return Err(DocMoverError::config(
                "configuration cannot be changed after starting this job or adding documents",
            ));
        }
        Ok(())
    }

    /// Number of documents per batch. Values below 1 are raised to 1 when
    /// the job starts.
    pub fn with_batch_size(&self, batch_size: usize) -> MoverResult<&Self> {
        self.require_not_started()?;
        self.inner().batch_size.store(batch_size, Ordering::Release);
        Ok(self)
    }

    /// Number of worker threads. Zero means one thread per host, resolved
    /// when the job starts.
    pub fn with_thread_count(&self, thread_count: usize) -> MoverResult<&Self> {
        self.require_not_started()?;
        self.inner()
            .thread_count
            .store(thread_count, Ordering::Release);
        Ok(self)
    }

    pub fn with_job_name(&self, job_name: impl Into<String>) -> MoverResult<&Self> {
        self.require_not_started()?;
        self.inner().settings.lock().job_name = Some(job_name.into());
        Ok(self)
    }

    pub fn with_job_id(&self, job_id: impl Into<String>) -> MoverResult<&Self> {
        self.require_not_started()?;
        self.inner().settings.lock().job_id = Some(job_id.into());
        Ok(self)
    }

    /// Server-side transform applied to every batch.
    pub fn with_transform(&self, transform: Transform) -> MoverResult<&Self> {
        self.require_not_started()?;
        self.inner().settings.lock().transform = Some(transform);
        Ok(self)
    }

    /// Routes every batch through the temporal write path of the given
    /// collection.
    pub fn with_temporal_collection(&self, collection: impl Into<String>) -> MoverResult<&Self> {
        self.require_not_started()?;
        self.inner().settings.lock().temporal_collection = Some(collection.into());
        Ok(self)
    }

    /// Metadata applied to documents that carry none of their own; sent as
    /// a synthetic leading operation of every batch.
    pub fn with_default_metadata(
        &self,
        metadata: impl DocumentHandle + 'static,
    ) -> MoverResult<&Self> {
        self.require_not_started()?;
        self.inner().settings.lock().default_metadata = Some(Arc::new(metadata));
        Ok(self)
    }

    /// Hook invoked on the writing thread just before each batch goes over
    /// the wire.
    pub fn with_before_write(
        &self,
        hook: impl Fn(&WriteBatch) + Send + Sync + 'static,
    ) -> MoverResult<&Self> {
        self.require_not_started()?;
        self.inner().settings.lock().before_write = Some(Arc::new(hook));
        Ok(self)
    }

    /// Registers a success listener. Permitted at any point of the job.
    pub fn on_batch_success(&self, listener: impl BatchSuccessListener + 'static) -> &Self {
        self.inner().hub.add_success(Arc::new(listener));
        self
    }

    /// Registers a failure listener. Permitted at any point of the job.
    pub fn on_batch_failure(&self, listener: impl BatchFailureListener + 'static) -> &Self {
        self.inner().hub.add_failure(Arc::new(listener));
        self
    }

    /// Replaces the whole success-listener list; only allowed before start.
    pub fn set_batch_success_listeners(
        &self,
        listeners: Vec<Arc<dyn BatchSuccessListener>>,
    ) -> MoverResult<()> {
        self.require_not_started()?;
        self.inner().hub.replace_success(listeners);
        Ok(())
    }

    /// Replaces the whole failure-listener list; only allowed before start.
    pub fn set_batch_failure_listeners(
        &self,
        listeners: Vec<Arc<dyn BatchFailureListener>>,
    ) -> MoverResult<()> {
        self.require_not_started()?;
        self.inner().hub.replace_failure(listeners);
        Ok(())
    }

    pub fn batch_size(&self) -> usize {
        self.inner().batch_size.load(Ordering::Acquire)
    }

    pub fn thread_count(&self) -> usize {
        self.inner().thread_count.load(Ordering::Acquire)
    }

    pub fn job_name(&self) -> Option<String> {
        self.inner().settings.lock().job_name.clone()
    }

    pub fn job_id(&self) -> Option<String> {
        self.inner().settings.lock().job_id.clone()
    }

    pub fn transform(&self) -> Option<Transform> {
        self.inner().settings.lock().transform.clone()
    }

    pub fn temporal_collection(&self) -> Option<String> {
        self.inner().settings.lock().temporal_collection.clone()
    }

    /// The configured default metadata, if any.
    pub fn document_metadata(&self) -> Option<SharedHandle> {
        self.inner().settings.lock().default_metadata.clone()
    }

    pub fn forest_config(&self) -> Arc<dyn ForestConfiguration> {
        self.inner().forest_config.read().clone()
    }

    /// The ticket the job was started under. Fails before start; `None`
    /// when the job was started implicitly by an `add` or `flush`.
    pub fn job_ticket(&self) -> MoverResult<Option<JobTicket>> {
        self.require_started()?;
        Ok(self.inner().job_ticket.lock().clone())
    }

    /// Wall-clock start of the job; `None` until the job starts.
    pub fn job_start_time(&self) -> Option<SystemTime> {
        if !self.is_started() {
            return None;
        }
        *self.inner().job_start_time.lock()
    }

    /// Wall-clock end of the job; `None` until the job stops.
    pub fn job_end_time(&self) -> Option<SystemTime> {
        if !self.is_stopped() {
            return None;
        }
        *self.inner().job_end_time.lock()
    }

    /// Cumulative success/failure counters for this job.
    pub fn job_report(&self) -> JobReport {
        self.inner().hub.metrics().snapshot()
    }

    /// Cumulative count of successfully written documents.
    pub fn items_so_far(&self) -> u64 {
        self.inner().hub.items_so_far()
    }
}
