//! In-memory cluster doubles and helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::time::{Duration, Instant};

use docmover::{
    BytesHandle, ClusterGateway, DocMoverError, Forest, ForestConfiguration, HostClient,
    MoverResult, Transform, WriteBatch, WriteBatcher, WriteOp,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// One bulk write observed by the simulated cluster.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub host: String,
    pub uris: Vec<String>,
    pub had_default_metadata: bool,
    pub transform: Option<String>,
    pub temporal_collection: Option<String>,
    pub thread_name: Option<String>,
}

#[derive(Default)]
struct ClusterInner {
    records: Vec<WriteRecord>,
    gated: HashSet<String>,
    failing: HashSet<String>,
    writes_started: HashMap<String, usize>,
}

/// Simulated cluster: records successful writes, can gate a host (writes
/// block until released) and fail a host (writes raise transport errors).
#[derive(Default)]
pub struct MemoryCluster {
    inner: Mutex<ClusterInner>,
    changed: Condvar,
}

impl MemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gate_host(&self, host: &str) {
        self.inner.lock().unwrap().gated.insert(host.to_string());
    }

    pub fn release_host(&self, host: &str) {
        self.inner.lock().unwrap().gated.remove(host);
        self.changed.notify_all();
    }

    pub fn fail_host(&self, host: &str) {
        self.inner.lock().unwrap().failing.insert(host.to_string());
    }

    pub fn heal_host(&self, host: &str) {
        self.inner.lock().unwrap().failing.remove(host);
    }

    /// Waits until at least `count` writes have begun against `host`.
    pub fn wait_for_write_start(&self, host: &str, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.writes_started.get(host).copied().unwrap_or(0) >= count {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _timeout) = self.changed.wait_timeout(inner, remaining).unwrap();
            inner = guard;
        }
    }

    pub fn records(&self) -> Vec<WriteRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    pub fn batches_to(&self, host: &str) -> Vec<Vec<String>> {
        self.records()
            .into_iter()
            .filter(|record| record.host == host)
            .map(|record| record.uris)
            .collect()
    }

    pub fn total_written(&self) -> usize {
        self.records().iter().map(|record| record.uris.len()).sum()
    }

    fn perform_write(
        &self,
        host: &str,
        ops: &[WriteOp],
        transform: Option<&Transform>,
        temporal_collection: Option<&str>,
    ) -> MoverResult<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner.writes_started.entry(host.to_string()).or_default() += 1;
        self.changed.notify_all();

        while inner.gated.contains(host) {
            inner = self.changed.wait(inner).unwrap();
        }
        if inner.failing.contains(host) {
            return Err(DocMoverError::Transport {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        inner.records.push(WriteRecord {
            host: host.to_string(),
            uris: ops.iter().filter_map(|op| op.uri().map(str::to_string)).collect(),
            had_default_metadata: matches!(ops.first(), Some(WriteOp::DefaultMetadata { .. })),
            transform: transform.map(|t| t.name.clone()),
            temporal_collection: temporal_collection.map(str::to_string),
            thread_name: std::thread::current().name().map(str::to_string),
        });
        Ok(())
    }
}

pub struct SimClient {
    host: String,
    cluster: Arc<MemoryCluster>,
}

impl HostClient for SimClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn write(&self, ops: &[WriteOp], transform: Option<&Transform>) -> MoverResult<()> {
        self.cluster.perform_write(&self.host, ops, transform, None)
    }

    fn write_temporal(
        &self,
        ops: &[WriteOp],
        transform: Option<&Transform>,
        temporal_collection: &str,
    ) -> MoverResult<()> {
        self.cluster
            .perform_write(&self.host, ops, transform, Some(temporal_collection))
    }
}

pub struct SimGateway {
    cluster: Arc<MemoryCluster>,
    primary: Mutex<String>,
}

impl SimGateway {
    pub fn new(cluster: Arc<MemoryCluster>, primary: &str) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            primary: Mutex::new(primary.to_string()),
        })
    }

    pub fn primary(&self) -> String {
        self.primary.lock().unwrap().clone()
    }
}

impl ClusterGateway for SimGateway {
    fn host_client(&self, host: &str) -> MoverResult<Arc<dyn HostClient>> {
        Ok(Arc::new(SimClient {
            host: host.to_string(),
            cluster: Arc::clone(&self.cluster),
        }))
    }

    fn primary_host(&self) -> String {
        self.primary()
    }

    fn set_primary(&self, client: Arc<dyn HostClient>) {
        *self.primary.lock().unwrap() = client.host().to_string();
    }
}

pub struct StaticForests(pub Vec<Forest>);

impl ForestConfiguration for StaticForests {
    fn forests(&self) -> Vec<Forest> {
        self.0.clone()
    }
}

pub fn forests_on(hosts: &[&str]) -> Arc<dyn ForestConfiguration> {
    Arc::new(StaticForests(
        hosts
            .iter()
            .enumerate()
            .map(|(i, host)| Forest::new("docs", format!("docs-{i}"), *host))
            .collect(),
    ))
}

pub struct Harness {
    pub batcher: WriteBatcher,
    pub cluster: Arc<MemoryCluster>,
    pub gateway: Arc<SimGateway>,
}

pub fn harness(hosts: &[&str]) -> Harness {
    init_tracing();
    let cluster = MemoryCluster::new();
    let gateway = SimGateway::new(Arc::clone(&cluster), hosts[0]);
    let batcher = WriteBatcher::new(
        Arc::clone(&gateway) as Arc<dyn ClusterGateway>,
        forests_on(hosts),
    )
    .expect("failed to build batcher");
    Harness {
        batcher,
        cluster,
        gateway,
    }
}

pub fn content() -> BytesHandle {
    BytesHandle::new(b"{\"v\":1}".to_vec())
}

/// Listener-observed batch outcome.
#[derive(Debug, Clone)]
pub struct ObservedBatch {
    pub batch_number: u64,
    pub host: String,
    pub uris: Vec<String>,
    pub items_so_far: u64,
}

fn observe(batch: &WriteBatch) -> ObservedBatch {
    ObservedBatch {
        batch_number: batch.batch_number(),
        host: batch.host().to_string(),
        uris: batch
            .items()
            .iter()
            .filter_map(|op| op.uri().map(str::to_string))
            .collect(),
        items_so_far: batch.items_so_far(),
    }
}

pub type Observed = Arc<Mutex<Vec<ObservedBatch>>>;

/// Registers a collecting success listener and returns its sink.
pub fn collect_successes(batcher: &WriteBatcher) -> Observed {
    let sink: Observed = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&sink);
    batcher.on_batch_success(move |batch: &WriteBatch| {
        writer.lock().unwrap().push(observe(batch));
    });
    sink
}

/// Registers a collecting failure listener and returns its sink.
pub fn collect_failures(batcher: &WriteBatcher) -> Observed {
    let sink: Observed = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&sink);
    batcher.on_batch_failure(move |batch: &WriteBatch, _error: &DocMoverError| {
        writer.lock().unwrap().push(observe(batch));
    });
    sink
}

/// Polls until the predicate holds or the deadline passes.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
