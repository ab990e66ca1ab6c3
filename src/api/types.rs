use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::MoverResult;

/// Opaque payload attached to a write operation, either document content or
/// a metadata fragment.
///
/// The coordinator never inspects payload bytes; it forwards them to the
/// host client and releases the handle once the batch reaches a terminal
/// outcome. Handles backed by streams or files should implement [`close`]
/// to free the underlying resource.
///
/// [`close`]: DocumentHandle::close
pub trait DocumentHandle: Send + Sync {
    /// Serialized form handed to the host client.
    fn payload(&self) -> MoverResult<Vec<u8>>;

    /// Releases any resource backing this handle.
    fn close(&self) -> MoverResult<()> {
        Ok(())
    }
}

impl<H: DocumentHandle + ?Sized> DocumentHandle for Arc<H> {
    fn payload(&self) -> MoverResult<Vec<u8>> {
        (**self).payload()
    }

    fn close(&self) -> MoverResult<()> {
        (**self).close()
    }
}

pub type SharedHandle = Arc<dyn DocumentHandle>;

/// In-memory byte payload.
pub struct BytesHandle(Vec<u8>);

impl BytesHandle {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

impl DocumentHandle for BytesHandle {
    fn payload(&self) -> MoverResult<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// JSON payload, serialized lazily when the client asks for bytes.
pub struct JsonHandle(serde_json::Value);

impl JsonHandle {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl DocumentHandle for JsonHandle {
    fn payload(&self) -> MoverResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }
}

/// A single queued write.
///
/// The default-metadata marker that can lead a batch is a dedicated variant
/// rather than a document with an empty uri, so downstream code can never
/// confuse the two.
#[derive(Clone)]
pub enum WriteOp {
    Document {
        uri: String,
        metadata: Option<SharedHandle>,
        content: Option<SharedHandle>,
    },
    DefaultMetadata { metadata: SharedHandle },
}

impl WriteOp {
    pub fn document(uri: impl Into<String>, content: impl DocumentHandle + 'static) -> Self {
        WriteOp::Document {
            uri: uri.into(),
            metadata: None,
            content: Some(Arc::new(content)),
        }
    }

    pub fn with_metadata(
        uri: impl Into<String>,
        metadata: impl DocumentHandle + 'static,
        content: impl DocumentHandle + 'static,
    ) -> Self {
        WriteOp::Document {
            uri: uri.into(),
            metadata: Some(Arc::new(metadata)),
            content: Some(Arc::new(content)),
        }
    }

    /// A naked metadata write: permitted, the content side stays empty.
    pub fn metadata_only(uri: impl Into<String>, metadata: impl DocumentHandle + 'static) -> Self {
        WriteOp::Document {
            uri: uri.into(),
            metadata: Some(Arc::new(metadata)),
            content: None,
        }
    }

    pub(crate) fn default_metadata(metadata: SharedHandle) -> Self {
        WriteOp::DefaultMetadata { metadata }
    }

    pub fn uri(&self) -> Option<&str> {
        match self {
            WriteOp::Document { uri, .. } => Some(uri),
            WriteOp::DefaultMetadata { .. } => None,
        }
    }

    pub fn content(&self) -> Option<&SharedHandle> {
        match self {
            WriteOp::Document { content, .. } => content.as_ref(),
            WriteOp::DefaultMetadata { .. } => None,
        }
    }

    pub fn metadata(&self) -> Option<&SharedHandle> {
        match self {
            WriteOp::Document { metadata, .. } => metadata.as_ref(),
            WriteOp::DefaultMetadata { metadata } => Some(metadata),
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, WriteOp::Document { .. })
    }
}

impl fmt::Debug for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Document {
                uri,
                metadata,
                content,
            } => f
                .debug_struct("Document")
                .field("uri", uri)
                .field("metadata", &metadata.as_ref().map(|_| "<handle>"))
                .field("content", &content.as_ref().map(|_| "<handle>"))
                .finish(),
            WriteOp::DefaultMetadata { .. } => f
                .debug_struct("DefaultMetadata")
                .field("metadata", &"<handle>")
                .finish(),
        }
    }
}

/// One dispatched batch, as observed by listeners and retry callers.
///
/// `items` holds the document operations only; the synthetic default-metadata
/// marker is an implementation detail of the wire write and never surfaces
/// here.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    batch_number: u64,
    host: String,
    items: Vec<WriteOp>,
    items_so_far: u64,
}

impl WriteBatch {
    pub(crate) fn new(batch_number: u64, host: String, items: Vec<WriteOp>, items_so_far: u64) -> Self {
        Self {
            batch_number,
            host,
            items,
            items_so_far,
        }
    }

    /// Job-wide batch sequence number, also the round-robin key.
    pub fn batch_number(&self) -> u64 {
        self.batch_number
    }

    /// Host this batch was dispatched to.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn items(&self) -> &[WriteOp] {
        &self.items
    }

    /// Cumulative count of successfully written documents at dispatch time.
    pub fn items_so_far(&self) -> u64 {
        self.items_so_far
    }
}

/// One writable shard of the cluster, as reported by the topology oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forest {
    pub database_name: String,
    pub forest_name: String,
    pub host: String,
}

impl Forest {
    pub fn new(
        database_name: impl Into<String>,
        forest_name: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            database_name: database_name.into(),
            forest_name: forest_name.into(),
            host: host.into(),
        }
    }
}

/// Server-side transform applied to every document of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    pub name: String,
    pub parameters: Vec<(String, String)>,
}

impl Transform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }
}

/// Identifies one run of a write job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
}

impl JobTicket {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }
}
