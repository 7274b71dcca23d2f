//! The control loop: probe reports in, lifecycle commands out.
//!
//! A single task owns the health tracker and the probe executor. It applies
//! every probe report, then drains the resulting health events: ready flips
//! resync the admission set and tick the rollout engine; a liveness failure
//! additionally triggers terminate+recreate of the dead instance. A periodic
//! reconcile pass starts probe loops for newly created instances (their
//! addresses come from the instance manager) and retires Terminating ones.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use switchyard_health::{HealthEvent, HealthTracker};
use switchyard_probe::{ProbeExecutor, ProbeReport};
use switchyard_rollout::RolloutEngine;
use switchyard_state::{InstanceId, InstancePhase, InstanceRecord, ServiceId, StateStore};
use switchyard_traffic::TrafficController;

use crate::config::DaemonConfig;

/// Where the controller learns addresses of instances the manager created.
pub trait AddressSource: Send + Sync {
    fn address_of(&self, instance: &str) -> Option<String>;
}

pub struct Controller {
    state: StateStore,
    executor: ProbeExecutor,
    tracker: HealthTracker,
    traffic: TrafficController,
    engine: Arc<RolloutEngine>,
    addresses: Arc<dyn AddressSource>,
    events_rx: mpsc::Receiver<HealthEvent>,
    reconcile_interval: Duration,
    /// Dead instances whose replacement failed; retried on reconcile.
    pending_replacements: HashSet<(ServiceId, InstanceId)>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateStore,
        reports_tx: mpsc::Sender<ProbeReport>,
        events: (mpsc::Sender<HealthEvent>, mpsc::Receiver<HealthEvent>),
        traffic: TrafficController,
        engine: Arc<RolloutEngine>,
        addresses: Arc<dyn AddressSource>,
        reconcile_interval: Duration,
    ) -> Self {
        let (events_tx, events_rx) = events;
        Self {
            state: state.clone(),
            executor: ProbeExecutor::new(reports_tx),
            tracker: HealthTracker::new(state, events_tx),
            traffic,
            engine,
            addresses,
            events_rx,
            reconcile_interval,
            pending_replacements: HashSet::new(),
        }
    }

    /// Seed the store from config and start probing the instances it lists.
    pub async fn bootstrap(&mut self, config: &DaemonConfig) -> anyhow::Result<()> {
        for service in &config.services {
            let spec = service.to_spec();
            self.state.put_service(&spec)?;

            for instance in &service.instances {
                let now = epoch_secs();
                let record = InstanceRecord {
                    id: instance.id.clone(),
                    service: service.name.clone(),
                    version: instance.version.clone(),
                    group: instance
                        .group
                        .clone()
                        .unwrap_or_else(|| spec.active_group.clone()),
                    phase: InstancePhase::Running,
                    // Health starts unproven; probes earn these flags.
                    ready: false,
                    alive: false,
                    address: instance.address.clone(),
                    created_at: now,
                    updated_at: now,
                };
                self.state.put_instance(&record)?;
                self.watch_instance(&record, &spec.name).await;
            }

            self.traffic.resync(&service.name)?;
            info!(
                service = %service.name,
                replicas = service.replicas,
                instances = service.instances.len(),
                "service registered"
            );
        }
        Ok(())
    }

    /// Main loop. Owns the tracker; exits when the report channel closes or
    /// shutdown fires, stopping all probe loops on the way out.
    pub async fn run(
        mut self,
        mut reports: mpsc::Receiver<ProbeReport>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut reconcile = tokio::time::interval(self.reconcile_interval);
        loop {
            tokio::select! {
                report = reports.recv() => {
                    match report {
                        Some(report) => {
                            if let Err(e) = self.tracker.apply(&report).await {
                                warn!(error = %e, "failed to persist health change");
                            }
                            self.drain_events().await;
                        }
                        None => break,
                    }
                }
                _ = reconcile.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "reconcile pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("controller shutting down");
                    break;
                }
            }
        }
        self.executor.stop_all().await;
    }

    /// Handle every health event produced by the report just applied.
    async fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }

    pub(crate) async fn handle_event(&mut self, event: HealthEvent) {
        let service = event.service().to_string();

        // Admission tracks health synchronously with each flip.
        if let Err(e) = self.traffic.resync(&service) {
            warn!(%service, error = %e, "admission resync failed");
        }

        if let HealthEvent::AliveChanged {
            instance,
            alive: false,
            ..
        } = &event
        {
            // Dead instance: stop probing and replace it.
            self.tracker.untrack(instance);
            self.executor.stop_probe(instance).await;
            match self.engine.replace(&service, instance).await {
                Ok(new_id) => {
                    info!(%service, old = %instance, new = %new_id, "dead instance replaced")
                }
                Err(e) => {
                    warn!(%service, %instance, error = %e, "replacement failed, will retry");
                    self.pending_replacements
                        .insert((service.clone(), instance.clone()));
                }
            }
        }

        match self.engine.tick(&service).await {
            Ok(outcome) => debug!(%service, ?outcome, "rollout tick"),
            Err(e) => warn!(%service, error = %e, "rollout tick failed"),
        }

        // A tick or replacement may have changed lifecycle phases; the
        // admission set must never lag behind a Terminating instance.
        if let Err(e) = self.traffic.resync(&service) {
            warn!(%service, error = %e, "admission resync failed");
        }
    }

    /// Periodic pass: learn addresses for freshly created instances, start
    /// their probe loops, retire Terminating records, and nudge plans that
    /// are waiting on a non-health transition.
    pub(crate) async fn reconcile(&mut self) -> anyhow::Result<()> {
        self.retry_replacements().await?;

        for spec in self.state.list_services()? {
            for mut record in self.state.list_instances_for_service(&spec.name)? {
                match record.phase {
                    InstancePhase::Pending | InstancePhase::Running => {
                        if record.address.is_empty() {
                            let Some(address) = self.addresses.address_of(&record.id) else {
                                continue;
                            };
                            record.address = address;
                            record.updated_at = epoch_secs();
                            self.state.put_instance(&record)?;
                        }
                        if !self.executor.is_probing(&record.id).await {
                            self.watch_instance(&record, &spec.name).await;
                        }
                    }
                    InstancePhase::Terminating => {
                        self.tracker.untrack(&record.id);
                        self.executor.stop_probe(&record.id).await;
                        record.phase = InstancePhase::Terminated;
                        record.updated_at = epoch_secs();
                        self.state.put_instance(&record)?;
                        debug!(service = %spec.name, instance = %record.id, "instance retired");
                    }
                    InstancePhase::Terminated => {}
                }
            }

            self.traffic.resync(&spec.name)?;
            if let Err(e) = self.engine.tick(&spec.name).await {
                warn!(service = %spec.name, error = %e, "rollout tick failed");
            }
        }
        Ok(())
    }

    /// Retry replacements that failed when the manager was unavailable. An
    /// entry is dropped once its instance is no longer a dead Running record
    /// (already replaced, or gone).
    async fn retry_replacements(&mut self) -> anyhow::Result<()> {
        let pending: Vec<_> = self.pending_replacements.drain().collect();
        for (service, instance) in pending {
            let key = format!("{service}:{instance}");
            let still_dead = matches!(
                self.state.get_instance(&key)?,
                Some(record) if record.phase == InstancePhase::Running && !record.alive
            );
            if !still_dead {
                continue;
            }
            match self.engine.replace(&service, &instance).await {
                Ok(new_id) => {
                    info!(%service, old = %instance, new = %new_id, "dead instance replaced")
                }
                Err(e) => {
                    warn!(%service, %instance, error = %e, "replacement failed, will retry");
                    self.pending_replacements.insert((service, instance));
                }
            }
        }
        Ok(())
    }

    async fn watch_instance(&mut self, record: &InstanceRecord, service: &str) {
        let spec = match self.state.get_service(service) {
            Ok(Some(spec)) => spec,
            _ => return,
        };
        self.tracker
            .track(service, &record.id, spec.readiness, spec.liveness);
        self.executor
            .start_probe(&record.id, &record.address, &spec.probe)
            .await;
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use switchyard_rollout::{InstanceManager, ManagerError, RetryPolicy};
    use switchyard_state::InstanceId;
    use switchyard_traffic::AdmissionIndex;

    use crate::config::DaemonConfig;

    /// Fake manager that also serves as the address source.
    struct FakeManager {
        next_id: AtomicU64,
        addresses: Mutex<HashMap<String, String>>,
        terminated: Mutex<Vec<String>>,
        fail_next: Mutex<u32>,
    }

    impl FakeManager {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_id: AtomicU64::new(1),
                addresses: Mutex::new(HashMap::new()),
                terminated: Mutex::new(Vec::new()),
                fail_next: Mutex::new(0),
            })
        }

        fn fail_next(&self, count: u32) {
            *self.fail_next.lock().unwrap() = count;
        }

        fn take_failure(&self) -> bool {
            let mut remaining = self.fail_next.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    #[async_trait]
    impl InstanceManager for FakeManager {
        async fn create(
            &self,
            _service: &str,
            _version: &str,
            _group: &str,
        ) -> Result<InstanceId, ManagerError> {
            if self.take_failure() {
                return Err(ManagerError::Unavailable("fake outage".to_string()));
            }
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            let id = format!("i-{n}");
            self.addresses
                .lock()
                .unwrap()
                .insert(id.clone(), format!("10.0.0.{n}:8080"));
            Ok(id)
        }

        async fn terminate(&self, _service: &str, instance: &str) -> Result<(), ManagerError> {
            if self.take_failure() {
                return Err(ManagerError::Unavailable("fake outage".to_string()));
            }
            self.terminated.lock().unwrap().push(instance.to_string());
            Ok(())
        }
    }

    impl AddressSource for FakeManager {
        fn address_of(&self, instance: &str) -> Option<String> {
            self.addresses.lock().unwrap().get(instance).cloned()
        }
    }

    fn sample_config() -> DaemonConfig {
        toml::from_str(
            r#"
[manager]
url = "http://127.0.0.1:9000"

[[service]]
name = "api"
replicas = 2
active_group = "blue"

[[service.instance]]
id = "api-1"
version = "v1"
address = "127.0.0.1:1"

[[service.instance]]
id = "api-2"
version = "v1"
address = "127.0.0.1:1"
"#,
        )
        .unwrap()
    }

    fn controller_with(manager: Arc<FakeManager>) -> (Controller, StateStore) {
        let state = StateStore::open_in_memory().unwrap();
        let (reports_tx, _reports_rx) = mpsc::channel(64);
        let events = mpsc::channel(64);
        let traffic = TrafficController::new(state.clone(), AdmissionIndex::new());
        let engine = Arc::new(RolloutEngine::new(
            state.clone(),
            manager.clone(),
            RetryPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_retries: 1,
            },
        ));
        let controller = Controller::new(
            state.clone(),
            reports_tx,
            events,
            traffic,
            engine,
            manager,
            Duration::from_millis(20),
        );
        (controller, state)
    }

    #[tokio::test]
    async fn bootstrap_seeds_store_and_starts_probes() {
        let manager = FakeManager::new();
        let (mut controller, state) = controller_with(manager);

        controller.bootstrap(&sample_config()).await.unwrap();

        assert!(state.get_service("api").unwrap().is_some());
        let records = state.list_instances_for_service("api").unwrap();
        assert_eq!(records.len(), 2);
        // Unproven until probes pass.
        assert!(records.iter().all(|r| !r.ready && !r.alive));

        assert!(controller.executor.is_probing("api-1").await);
        assert!(controller.executor.is_probing("api-2").await);
        controller.executor.stop_all().await;
    }

    #[tokio::test]
    async fn liveness_failure_replaces_the_instance() {
        let manager = FakeManager::new();
        let (mut controller, state) = controller_with(manager.clone());
        controller.bootstrap(&sample_config()).await.unwrap();

        controller
            .handle_event(HealthEvent::AliveChanged {
                service: "api".to_string(),
                instance: "api-1".to_string(),
                alive: false,
            })
            .await;

        assert_eq!(*manager.terminated.lock().unwrap(), vec!["api-1"]);
        assert!(!controller.executor.is_probing("api-1").await);

        // Replacement exists, same version, address not yet learned.
        let records = state.list_instances_for_service("api").unwrap();
        let replacement = records.iter().find(|r| r.id == "i-1").unwrap();
        assert_eq!(replacement.version, "v1");
        assert_eq!(replacement.phase, InstancePhase::Pending);
        assert!(replacement.address.is_empty());
        controller.executor.stop_all().await;
    }

    #[tokio::test]
    async fn reconcile_learns_addresses_and_retires_terminating() {
        let manager = FakeManager::new();
        let (mut controller, state) = controller_with(manager.clone());
        controller.bootstrap(&sample_config()).await.unwrap();

        // Kill api-1; the replacement starts with no address.
        controller
            .handle_event(HealthEvent::AliveChanged {
                service: "api".to_string(),
                instance: "api-1".to_string(),
                alive: false,
            })
            .await;

        controller.reconcile().await.unwrap();

        let replacement = state.get_instance("api:i-1").unwrap().unwrap();
        assert_eq!(replacement.address, "10.0.0.1:8080");
        assert!(controller.executor.is_probing("i-1").await);

        // The dead instance was marked Terminating by the engine; reconcile
        // retires it.
        let old = state.get_instance("api:api-1").unwrap().unwrap();
        assert_eq!(old.phase, InstancePhase::Terminated);
        controller.executor.stop_all().await;
    }

    #[tokio::test]
    async fn tick_terminations_leave_admission_immediately() {
        let manager = FakeManager::new();
        let (mut controller, state) = controller_with(manager);
        controller.bootstrap(&sample_config()).await.unwrap();

        // Both instances healthy and admitted.
        for id in ["api-1", "api-2"] {
            let mut record = state.get_instance(&format!("api:{id}")).unwrap().unwrap();
            record.ready = true;
            record.alive = true;
            state.put_instance(&record).unwrap();
        }
        controller.traffic.resync("api").unwrap();
        assert_eq!(controller.traffic.admitted("api").len(), 2);

        // Budget allows terminating one instance before any replacement.
        controller
            .engine
            .start_rollout("api", "v2", 1, 0)
            .await
            .unwrap();

        controller
            .handle_event(HealthEvent::ReadyChanged {
                service: "api".to_string(),
                instance: "api-1".to_string(),
                ready: true,
            })
            .await;

        // The tick terminated api-1; the admission set must not lag.
        let old = state.get_instance("api:api-1").unwrap().unwrap();
        assert_eq!(old.phase, InstancePhase::Terminating);
        assert!(!controller.traffic.admitted("api").contains("api-1"));
        controller.executor.stop_all().await;
    }

    #[tokio::test]
    async fn failed_replacement_is_retried_on_reconcile() {
        let manager = FakeManager::new();
        let (mut controller, state) = controller_with(manager.clone());
        controller.bootstrap(&sample_config()).await.unwrap();

        // api-1 is wedged: Running but no longer alive.
        let mut record = state.get_instance("api:api-1").unwrap().unwrap();
        record.alive = false;
        state.put_instance(&record).unwrap();

        // Manager is down for the whole first attempt (initial + retry).
        manager.fail_next(2);
        controller
            .handle_event(HealthEvent::AliveChanged {
                service: "api".to_string(),
                instance: "api-1".to_string(),
                alive: false,
            })
            .await;

        // Nothing happened yet; the instance is still dead in the store.
        assert!(manager.terminated.lock().unwrap().is_empty());
        let record = state.get_instance("api:api-1").unwrap().unwrap();
        assert_eq!(record.phase, InstancePhase::Running);

        // Manager recovers; the next reconcile completes the replacement.
        controller.reconcile().await.unwrap();
        assert_eq!(*manager.terminated.lock().unwrap(), vec!["api-1"]);
        let replacement = state.get_instance("api:i-1").unwrap().unwrap();
        assert_eq!(replacement.version, "v1");
        assert!(controller.pending_replacements.is_empty());
        controller.executor.stop_all().await;
    }

    #[tokio::test]
    async fn ready_flip_updates_admission() {
        let manager = FakeManager::new();
        let (mut controller, state) = controller_with(manager);
        controller.bootstrap(&sample_config()).await.unwrap();

        // Mark api-1 healthy in the store (as the tracker would) and deliver
        // the event.
        let mut record = state.get_instance("api:api-1").unwrap().unwrap();
        record.ready = true;
        record.alive = true;
        state.put_instance(&record).unwrap();

        controller
            .handle_event(HealthEvent::ReadyChanged {
                service: "api".to_string(),
                instance: "api-1".to_string(),
                ready: true,
            })
            .await;

        let admitted = controller.traffic.admitted("api");
        assert!(admitted.contains("api-1"));
        assert!(!admitted.contains("api-2"));
        controller.executor.stop_all().await;
    }
}
