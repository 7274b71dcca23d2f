//! Health tracker — single writer of per-instance Ready/Alive state.
//!
//! One probe report feeds both hysteresis policies. Because an instance's
//! probes are strictly serial (see `switchyard-probe`) and this tracker is
//! the only consumer of the report channel, health mutations for a given
//! instance are naturally serialized.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use switchyard_probe::ProbeReport;
use switchyard_state::{
    InstanceId, InstanceRecord, ServiceId, StateResult, StateStore, ThresholdConfig,
};

use crate::hysteresis::Hysteresis;

/// Emitted when a tracked instance's derived health changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// Ready flipped; drives admission set recomputation.
    ReadyChanged {
        service: ServiceId,
        instance: InstanceId,
        ready: bool,
    },
    /// Alive flipped; false means the instance must be replaced.
    AliveChanged {
        service: ServiceId,
        instance: InstanceId,
        alive: bool,
    },
}

impl HealthEvent {
    /// Service the event belongs to.
    pub fn service(&self) -> &str {
        match self {
            HealthEvent::ReadyChanged { service, .. } => service,
            HealthEvent::AliveChanged { service, .. } => service,
        }
    }
}

/// Per-instance tracking state.
struct Tracked {
    service: ServiceId,
    readiness: Hysteresis,
    liveness: Hysteresis,
}

/// Derives Ready/Alive per instance from probe reports.
pub struct HealthTracker {
    state: StateStore,
    tracked: HashMap<InstanceId, Tracked>,
    /// Sink for health change events.
    events: mpsc::Sender<HealthEvent>,
}

impl HealthTracker {
    pub fn new(state: StateStore, events: mpsc::Sender<HealthEvent>) -> Self {
        Self {
            state,
            tracked: HashMap::new(),
            events,
        }
    }

    /// Begin tracking an instance with the given policies.
    ///
    /// Both flags start false; the instance earns Ready/Alive through
    /// consecutive successes.
    pub fn track(
        &mut self,
        service: &str,
        instance: &str,
        readiness: ThresholdConfig,
        liveness: ThresholdConfig,
    ) {
        self.tracked.insert(
            instance.to_string(),
            Tracked {
                service: service.to_string(),
                readiness: Hysteresis::new(readiness),
                liveness: Hysteresis::new(liveness),
            },
        );
        debug!(%service, %instance, "instance tracked");
    }

    /// Stop tracking an instance (terminated or replaced).
    pub fn untrack(&mut self, instance: &str) {
        if self.tracked.remove(instance).is_some() {
            debug!(%instance, "instance untracked");
        }
    }

    /// Number of tracked instances.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Apply one probe report: advance both policies, persist flag changes,
    /// and emit events for every transition.
    pub async fn apply(&mut self, report: &ProbeReport) -> StateResult<()> {
        let Some(tracked) = self.tracked.get_mut(&report.instance) else {
            // Probe loop outlived tracking; ignore.
            debug!(instance = %report.instance, "report for untracked instance dropped");
            return Ok(());
        };

        let pass = report.outcome.is_pass();
        let was_ready = tracked.readiness.state();
        let was_alive = tracked.liveness.state();

        let mut ready = tracked.readiness.observe(pass);
        let alive = tracked.liveness.observe(pass);

        // A liveness failure is fatal for the instance: pull it from traffic
        // immediately rather than waiting out the readiness thresholds.
        if was_alive && !alive {
            tracked.readiness.force_down();
            ready = false;
        }

        let service = tracked.service.clone();

        if ready != was_ready || alive != was_alive {
            self.persist_flags(&service, &report.instance, ready, alive)?;
        }

        if ready != was_ready {
            if ready {
                info!(%service, instance = %report.instance, "instance ready");
            } else {
                warn!(%service, instance = %report.instance, "instance no longer ready");
            }
            self.emit(HealthEvent::ReadyChanged {
                service: service.clone(),
                instance: report.instance.clone(),
                ready,
            })
            .await;
        }

        if alive != was_alive {
            if alive {
                info!(%service, instance = %report.instance, "instance alive");
            } else {
                warn!(
                    %service,
                    instance = %report.instance,
                    "instance failed liveness, replacement required"
                );
            }
            self.emit(HealthEvent::AliveChanged {
                service,
                instance: report.instance.clone(),
                alive,
            })
            .await;
        }

        Ok(())
    }

    fn persist_flags(
        &self,
        service: &str,
        instance: &str,
        ready: bool,
        alive: bool,
    ) -> StateResult<()> {
        let key = format!("{service}:{instance}");
        if let Some(mut record) = self.state.get_instance(&key)? {
            record.ready = ready;
            record.alive = alive;
            record.updated_at = epoch_secs();
            self.state.put_instance(&record)?;
        }
        Ok(())
    }

    async fn emit(&self, event: HealthEvent) {
        if self.events.send(event).await.is_err() {
            debug!("health event receiver dropped");
        }
    }
}

/// Read a snapshot of an instance's persisted record (test helper and
/// status queries).
pub fn instance_snapshot(
    state: &StateStore,
    service: &str,
    instance: &str,
) -> StateResult<Option<InstanceRecord>> {
    state.get_instance(&format!("{service}:{instance}"))
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
