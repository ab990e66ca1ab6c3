//! Basic usage example: batch writes against a three-host in-memory cluster
//!
//! Run with: cargo run --example basic_usage

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use docmover::{
    BytesHandle, ClusterGateway, Forest, ForestConfiguration, HostClient, JobTicket, MoverResult,
    Transform, WriteBatch, WriteBatcher, WriteOp,
};

/// Pretend host: counts the documents it receives.
struct DemoHost {
    name: String,
    docs_received: AtomicUsize,
}

impl HostClient for DemoHost {
    fn host(&self) -> &str {
        &self.name
    }

    fn write(&self, ops: &[WriteOp], _transform: Option<&Transform>) -> MoverResult<()> {
        let docs = ops.iter().filter(|op| op.is_document()).count();
        self.docs_received.fetch_add(docs, Ordering::Relaxed);
        Ok(())
    }

    fn write_temporal(
        &self,
        ops: &[WriteOp],
        transform: Option<&Transform>,
        _temporal_collection: &str,
    ) -> MoverResult<()> {
        self.write(ops, transform)
    }
}

struct DemoGateway {
    hosts: Mutex<Vec<Arc<DemoHost>>>,
    primary: Mutex<String>,
}

impl DemoGateway {
    fn host_counts(&self) -> Vec<(String, usize)> {
        self.hosts
            .lock()
            .unwrap()
            .iter()
            .map(|host| (host.name.clone(), host.docs_received.load(Ordering::Relaxed)))
            .collect()
    }
}

impl ClusterGateway for DemoGateway {
    fn host_client(&self, host: &str) -> MoverResult<Arc<dyn HostClient>> {
        let client = Arc::new(DemoHost {
            name: host.to_string(),
            docs_received: AtomicUsize::new(0),
        });
        self.hosts.lock().unwrap().push(Arc::clone(&client));
        Ok(client)
    }

    fn primary_host(&self) -> String {
        self.primary.lock().unwrap().clone()
    }

    fn set_primary(&self, client: Arc<dyn HostClient>) {
        *self.primary.lock().unwrap() = client.host().to_string();
    }
}

struct DemoForests(Vec<Forest>);

impl ForestConfiguration for DemoForests {
    fn forests(&self) -> Vec<Forest> {
        self.0.clone()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("docmover basic usage\n");

    let gateway = Arc::new(DemoGateway {
        hosts: Mutex::new(Vec::new()),
        primary: Mutex::new("alpha".to_string()),
    });
    let forests = Arc::new(DemoForests(vec![
        Forest::new("docs", "docs-1", "alpha"),
        Forest::new("docs", "docs-2", "beta"),
        Forest::new("docs", "docs-3", "gamma"),
    ]));

    let batcher = WriteBatcher::new(
        Arc::clone(&gateway) as Arc<dyn ClusterGateway>,
        forests,
    )?;
    batcher.with_batch_size(25)?.with_thread_count(3)?;

    let written = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&written);
    batcher.on_batch_success(move |batch: &WriteBatch| {
        counter.fetch_add(batch.items().len(), Ordering::Relaxed);
    });

    batcher.start(JobTicket::new("demo-ingest"))?;
    println!("submitting 1000 documents in batches of 25 across 3 hosts...");
    for i in 0..1000 {
        batcher.add(
            format!("/demo/doc-{i}.json"),
            BytesHandle::new(format!("{{\"n\":{i}}}").into_bytes()),
        )?;
    }

    batcher.flush_and_wait()?;

    println!("\nper-host document counts:");
    for (host, count) in gateway.host_counts() {
        println!("   {host}: {count}");
    }

    let report = batcher.job_report();
    println!("\njob report:");
    println!("   batches written: {}", report.success_batches);
    println!("   documents written: {}", report.success_events);
    println!("   listener-observed documents: {}", written.load(Ordering::Relaxed));

    batcher.stop();
    println!("\ndone");
    Ok(())
}
