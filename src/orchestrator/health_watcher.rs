//! Long-poll watch over cluster-wide health state.
//!
//! Each cycle issues a bounded-wait read of all health checks using
//! the version index returned by the previous read, enriches
//! service-bound entries with catalog tags, and hands the batch to the
//! orchestrator over an unbuffered channel. The watch terminates
//! permanently on any error or on an abort signal; the caller must
//! spawn a new watch to resume.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::store::{CatalogClient, HealthClient, HealthEntry};

/// Health state filter covering every check regardless of status.
const ALL_STATES: &str = "any";

/// Factory for health-results watch tasks.
pub struct HealthWatcher {
    health: Arc<dyn HealthClient>,
    catalog: Arc<dyn CatalogClient>,
    wait_time: Duration,
}

/// Handle to a running watch: batch receiver plus abort sender.
pub struct HealthWatchHandle {
    results_rx: mpsc::Receiver<Vec<HealthEntry>>,
    abort_tx: mpsc::Sender<()>,
}

impl HealthWatchHandle {
    /// Receive the next batch.
    ///
    /// `None` means the watch terminated (error upstream), distinctly
    /// from "no new data yet" which simply keeps the future pending.
    pub async fn next_batch(&mut self) -> Option<Vec<HealthEntry>> {
        self.results_rx.recv().await
    }

    /// Tell the watch to stop.
    ///
    /// The abort channel always has capacity for the signal, so this
    /// completes promptly even while the watch is mid-poll; the watch
    /// observes the signal at its next emit point and stops without
    /// emitting.
    pub async fn abort(&self) {
        let _ = self.abort_tx.send(()).await;
    }
}

impl HealthWatcher {
    /// Create a watcher factory polling with `wait_time` bounds.
    #[must_use]
    pub fn new(
        health: Arc<dyn HealthClient>,
        catalog: Arc<dyn CatalogClient>,
        wait_time: Duration,
    ) -> Self {
        Self {
            health,
            catalog,
            wait_time,
        }
    }

    /// Spawn a new watch task and return its handle.
    #[must_use]
    pub fn spawn(&self) -> HealthWatchHandle {
        let health = Arc::clone(&self.health);
        let catalog = Arc::clone(&self.catalog);
        let wait_time = self.wait_time;
        let (results_tx, results_rx) = mpsc::channel(1);
        let (abort_tx, abort_rx) = mpsc::channel(1);

        tokio::spawn(watch(health, catalog, wait_time, results_tx, abort_rx));

        HealthWatchHandle {
            results_rx,
            abort_tx,
        }
    }
}

/// Core watch loop. Dropping `results_tx` on exit closes the output
/// channel, which is how the caller detects termination.
async fn watch(
    health: Arc<dyn HealthClient>,
    catalog: Arc<dyn CatalogClient>,
    wait_time: Duration,
    results_tx: mpsc::Sender<Vec<HealthEntry>>,
    mut abort_rx: mpsc::Receiver<()>,
) {
    let mut wait_index = 0_u64;

    'watch: loop {
        debug!(wait_index, "retrieving health results");

        let (entries, next_index) = match health
            .list_health(ALL_STATES.to_owned(), wait_index, wait_time)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                error!(%err, "error retrieving health results");
                break;
            }
        };
        wait_index = next_index;

        // Catalog lookups cached for this cycle only, one per distinct
        // service name, indexed by (node, service id) to disambiguate
        // multiple instances of a service on different nodes.
        let mut tag_cache: HashMap<String, HashMap<(String, String), Vec<String>>> = HashMap::new();

        let mut batch = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if !entry.service_id.is_empty() {
                if !tag_cache.contains_key(&entry.service_name) {
                    let instances = match catalog
                        .list_service_instances(entry.service_name.clone())
                        .await
                    {
                        Ok(instances) => instances,
                        Err(err) => {
                            error!(%err, service = %entry.service_name, "error retrieving service instances");
                            break 'watch;
                        }
                    };
                    let by_instance = instances
                        .into_iter()
                        .map(|inst| ((inst.node, inst.service_id), inst.tags))
                        .collect();
                    tag_cache.insert(entry.service_name.clone(), by_instance);
                }

                if let Some(tags) = tag_cache
                    .get(&entry.service_name)
                    .and_then(|by_instance| {
                        by_instance.get(&(entry.node.clone(), entry.service_id.clone()))
                    })
                {
                    entry.tags = tags.clone();
                } else {
                    warn!(node = %entry.node, service_id = %entry.service_id, "no catalog instance for check");
                }
            }
            batch.push(entry);
        }

        debug!(checks = batch.len(), "sending health results");
        tokio::select! {
            sent = results_tx.send(batch) => {
                if sent.is_err() {
                    // Receiver dropped; nobody is listening any more.
                    break;
                }
            }
            _ = abort_rx.recv() => break,
        }
    }

    info!("health results watch stopped");
}
