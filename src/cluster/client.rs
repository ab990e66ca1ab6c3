//! Interfaces consumed from the surrounding cluster client.
//!
//! The coordinator never talks to the network itself; it drives these seams.

use std::sync::Arc;

use crate::error::MoverResult;
use crate::types::{Forest, Transform, WriteOp};

/// Connection to a single host of the cluster, wrapping that host's
/// connection pool.
pub trait HostClient: Send + Sync {
    /// Host identity used for round-robin equality.
    fn host(&self) -> &str;

    /// Bulk-writes a batch. Synchronous; returns a transport error on any
    /// connection or server failure.
    fn write(&self, ops: &[WriteOp], transform: Option<&Transform>) -> MoverResult<()>;

    /// Bulk-writes a batch under temporal-collection semantics. The content
    /// format of the documents is treated as unknown.
    fn write_temporal(
        &self,
        ops: &[WriteOp],
        transform: Option<&Transform>,
        temporal_collection: &str,
    ) -> MoverResult<()>;
}

/// Topology oracle reporting the writable shards of the target database.
pub trait ForestConfiguration: Send + Sync {
    fn forests(&self) -> Vec<Forest>;
}

/// Factory for per-host clients, plus the notion of a primary client that
/// failover may reassign.
pub trait ClusterGateway: Send + Sync {
    fn host_client(&self, host: &str) -> MoverResult<Arc<dyn HostClient>>;

    fn primary_host(&self) -> String;

    fn set_primary(&self, client: Arc<dyn HostClient>);
}
