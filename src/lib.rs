//! # docmover
//!
//! A batched, cluster-aware write coordinator for document stores.
//!
//! ## Features
//!
//! - **Non-blocking submission**: many threads call `add` concurrently with
//!   no lock on the hot path
//! - **Round-robin dispatch**: each batch hits the next host with writable
//!   forests
//! - **Bounded worker pool**: saturation pushes back by writing the batch on
//!   the submitting thread
//! - **Quiesce on demand**: `await_completion` blocks until everything
//!   submitted so far has finished, ignoring later work
//! - **Failover**: when hosts leave the rotation, queued batches are
//!   re-targeted onto the surviving hosts
//!
//! ## Quick Start
//!
//! ```ignore
//! use docmover::{BytesHandle, JobTicket, WriteBatcher};
//! use std::sync::Arc;
//!
//! // `gateway` mints per-host clients; `forests` reports the writable shards.
//! let batcher = WriteBatcher::new(gateway, forests)?;
//! batcher
//!     .with_batch_size(100)?
//!     .with_thread_count(4)?;
//! batcher.on_batch_success(|batch: &docmover::WriteBatch| {
//!     println!("wrote {} docs to {}", batch.items().len(), batch.host());
//! });
//!
//! batcher.start(JobTicket::new("ingest-2024"))?;
//! for i in 0..10_000 {
//!     batcher.add(format!("/doc/{i}.json"), BytesHandle::new(b"{}".to_vec()))?;
//! }
//! batcher.flush_and_wait()?;
//! batcher.stop();
//! # Ok::<(), docmover::DocMoverError>(())
//! ```

pub mod api;
pub mod cluster;
pub mod runtime;

pub use crate::api::{error, listener, types};
pub use crate::cluster::{client, roster};
pub use crate::runtime::metrics;

pub use api::batcher::WriteBatcher;
pub use api::error::{DocMoverError, MoverResult};
pub use api::listener::{BatchFailureListener, BatchSuccessListener};
pub use api::types::{
    BytesHandle, DocumentHandle, Forest, JobTicket, JsonHandle, SharedHandle, Transform,
    WriteBatch, WriteOp,
};
pub use cluster::client::{ClusterGateway, ForestConfiguration, HostClient};
pub use cluster::roster::{HostEntry, HostRoster};
pub use runtime::metrics::{JobMetrics, JobReport};
