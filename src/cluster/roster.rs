//! The ordered set of hosts currently accepting writes.
//!
//! The roster is rebuilt whenever the forest configuration changes and is
//! never mutated in place: batch assembly takes a reference to one roster
//! and uses it consistently, while concurrent rebuilds publish a fresh one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::client::{ClusterGateway, ForestConfiguration, HostClient};
use crate::error::{DocMoverError, MoverResult};

/// One host in the rotation with its attached client.
#[derive(Clone)]
pub struct HostEntry {
    pub host_name: String,
    pub client: Arc<dyn HostClient>,
}

impl fmt::Debug for HostEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostEntry")
            .field("host_name", &self.host_name)
            .finish()
    }
}

/// Ordered array of host entries; the index is the round-robin key.
#[derive(Debug)]
pub struct HostRoster {
    entries: Vec<HostEntry>,
}

impl HostRoster {
    pub(crate) fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuilds the roster from the forest configuration.
    ///
    /// Entries for hosts present in both the previous and the new host set
    /// are reused (keeping their clients warm); new hosts acquire a fresh
    /// client from the gateway. Returns the new roster together with the
    /// entries that dropped out of the rotation.
    pub(crate) fn rebuild(
        previous: &HostRoster,
        config: &dyn ForestConfiguration,
        gateway: &dyn ClusterGateway,
    ) -> MoverResult<(HostRoster, Vec<HostEntry>)> {
        let forests = config.forests();
        if forests.is_empty() {
            return Err(DocMoverError::config(
                "forest configuration reports no writable forests",
            ));
        }

        let mut hosts: Vec<String> = Vec::new();
        for forest in &forests {
            if !hosts.iter().any(|h| h == &forest.host) {
                hosts.push(forest.host.clone());
            }
        }

        tracing::info!(
            hosts = ?hosts,
            database = %forests[0].database_name,
            "using forests on {} hosts",
            hosts.len()
        );

        let mut existing: HashMap<&str, &HostEntry> = HashMap::new();
        for entry in &previous.entries {
            existing.insert(entry.host_name.as_str(), entry);
        }

        let mut entries = Vec::with_capacity(hosts.len());
        for host in &hosts {
            match existing.remove(host.as_str()) {
                Some(entry) => entries.push(entry.clone()),
                None => {
                    let client = gateway.host_client(host)?;
                    tracing::info!(host = %host, "adding host client to the rotation");
                    entries.push(HostEntry {
                        host_name: host.clone(),
                        client,
                    });
                }
            }
        }

        let removed: Vec<HostEntry> = existing.into_values().cloned().collect();
        Ok((HostRoster { entries }, removed))
    }

    /// Round-robin selection: consecutive batch numbers hit consecutive
    /// roster indices. Batch numbers start at 1, which maps to index 0.
    pub fn entry_for_batch(&self, batch_number: u64) -> &HostEntry {
        let index = (batch_number.saturating_sub(1) % self.entries.len() as u64) as usize;
        &self.entries[index]
    }

    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
