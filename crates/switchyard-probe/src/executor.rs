//! Probe executor — one background probe loop per instance.
//!
//! Each loop sleeps for the configured interval, issues a single probe,
//! awaits it, and sends the report before sleeping again. Because the probe
//! is awaited inside the loop, two probes for the same instance can never be
//! in flight at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use switchyard_state::{InstanceId, ProbeConfig};

use crate::prober::{http_probe, parse_duration, ProbeOutcome};

/// Timestamped probe outcome for one instance.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub instance: InstanceId,
    pub outcome: ProbeOutcome,
    /// Unix timestamp (seconds) when the probe completed.
    pub at: u64,
}

/// Per-instance probe loop state.
struct ProbeSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Manages probe loops for all tracked instances.
pub struct ProbeExecutor {
    /// Sink for probe reports, consumed by the health tracker.
    reports: mpsc::Sender<ProbeReport>,
    /// Active loops: instance id → slot.
    slots: Arc<RwLock<HashMap<InstanceId, ProbeSlot>>>,
}

impl ProbeExecutor {
    /// Create an executor that emits reports on the given channel.
    pub fn new(reports: mpsc::Sender<ProbeReport>) -> Self {
        Self {
            reports,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start probing an instance at `address` (ip:port).
    ///
    /// Starting an instance that is already probed replaces its loop.
    pub async fn start_probe(&self, instance: &str, address: &str, config: &ProbeConfig) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let instance_owned = instance.to_string();
        let address = address.to_string();
        let path = config.path.clone();
        let config = config.clone();
        let reports = self.reports.clone();

        let handle = tokio::spawn(async move {
            run_probe_loop(&instance_owned, &address, &config, reports, shutdown_rx).await;
        });

        let mut slots = self.slots.write().await;
        if let Some(old) = slots.insert(
            instance.to_string(),
            ProbeSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(%instance, %path, "probe loop started");
    }

    /// Stop probing an instance.
    pub async fn stop_probe(&self, instance: &str) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.remove(instance) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(%instance, "probe loop stopped");
        }
    }

    /// Stop all probe loops (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut slots = self.slots.write().await;
        for (instance, slot) in slots.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(%instance, "probe loop stopped");
        }
        info!("all probe loops stopped");
    }

    /// List instance ids with active probe loops.
    pub async fn active_probes(&self) -> Vec<InstanceId> {
        let slots = self.slots.read().await;
        slots.keys().cloned().collect()
    }

    /// Check if an instance has an active probe loop.
    pub async fn is_probing(&self, instance: &str) -> bool {
        let slots = self.slots.read().await;
        slots.contains_key(instance)
    }
}

/// The probe loop for a single instance.
///
/// Strictly serial: the probe is awaited before the next sleep begins.
async fn run_probe_loop(
    instance: &str,
    address: &str,
    config: &ProbeConfig,
    reports: mpsc::Sender<ProbeReport>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = parse_duration(&config.interval).unwrap_or(Duration::from_secs(5));
    let timeout = parse_duration(&config.timeout).unwrap_or(Duration::from_secs(2));

    debug!(%instance, %address, "probe loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let outcome = http_probe(address, &config.path, timeout).await;
                let report = ProbeReport {
                    instance: instance.to_string(),
                    outcome,
                    at: epoch_secs(),
                };
                if reports.send(report).await.is_err() {
                    // Tracker is gone; nothing left to report to.
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(%instance, "probe loop shutting down");
                break;
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
