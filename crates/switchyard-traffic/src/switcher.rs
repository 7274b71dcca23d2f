//! Traffic switch controller — instantaneous blue/green cutover.
//!
//! `switch_to` changes which traffic group a service's admission set is
//! derived from. It refuses to cut over to a group with no healthy target
//! (leaving the current selector untouched) and is idempotent when the
//! target is already selected. It never issues lifecycle commands and never
//! reads or writes rollout state.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{info, warn};

use switchyard_state::{StateError, StateStore};

use crate::admission::{AdmissionIndex, AdmissionSnapshot};

/// Errors from traffic switch operations.
#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("no healthy target in group '{group}' of service '{service}'")]
    NoHealthyTarget { service: String, group: String },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

/// How a `switch_to` call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchOutcome {
    /// The selector changed and the admission set was recomputed.
    Switched,
    /// The target group was already selected; nothing changed.
    AlreadyActive,
}

/// Owns the per-service selector and the admission index.
#[derive(Clone)]
pub struct TrafficController {
    state: StateStore,
    admission: AdmissionIndex,
}

impl TrafficController {
    pub fn new(state: StateStore, admission: AdmissionIndex) -> Self {
        Self { state, admission }
    }

    /// Recompute a service's admission set from live store state.
    ///
    /// Called on every ready flip; also used after lifecycle changes.
    pub fn resync(&self, service: &str) -> Result<Arc<AdmissionSnapshot>, TrafficError> {
        let spec = self
            .state
            .get_service(service)?
            .ok_or_else(|| TrafficError::ServiceNotFound(service.to_string()))?;
        let records = self.state.list_instances_for_service(service)?;
        Ok(self.admission.recompute(service, &spec.active_group, &records))
    }

    /// Current admission snapshot for a service.
    pub fn admitted(&self, service: &str) -> Arc<AdmissionSnapshot> {
        self.admission.admitted(service)
    }

    /// Atomically select `group` as the service's active traffic group.
    ///
    /// Fails with `NoHealthyTarget` unless the group has at least one Ready,
    /// Running instance; the current selector is left untouched on failure.
    pub fn switch_to(&self, service: &str, group: &str) -> Result<SwitchOutcome, TrafficError> {
        let spec = self
            .state
            .get_service(service)?
            .ok_or_else(|| TrafficError::ServiceNotFound(service.to_string()))?;

        if spec.active_group == group {
            info!(%service, %group, "traffic group already active");
            return Ok(SwitchOutcome::AlreadyActive);
        }

        let records = self.state.list_instances_for_service(service)?;
        let healthy_targets = records
            .iter()
            .filter(|r| r.group == group && r.is_available())
            .count();
        if healthy_targets == 0 {
            warn!(%service, %group, "refusing cutover to group with no healthy target");
            return Err(TrafficError::NoHealthyTarget {
                service: service.to_string(),
                group: group.to_string(),
            });
        }

        self.state.set_active_group(service, group, epoch_secs())?;
        let snapshot = self.admission.recompute(service, group, &records);
        info!(
            %service,
            from = %spec.active_group,
            to = %group,
            admitted = snapshot.len(),
            "traffic switched"
        );
        Ok(SwitchOutcome::Switched)
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
    use switchyard_state::{
        InstancePhase, InstanceRecord, ProbeConfig, ServiceSpec, ThresholdConfig,
    };

    fn seed_service(state: &StateStore, name: &str, active_group: &str) {
        state
            .put_service(&ServiceSpec {
                name: name.to_string(),
                replicas: 3,
                active_group: active_group.to_string(),
                probe: ProbeConfig::default(),
                readiness: ThresholdConfig::readiness_default(),
                liveness: ThresholdConfig::liveness_default(),
                created_at: 1000,
                updated_at: 1000,
            })
            .unwrap();
    }

    fn seed_instance(state: &StateStore, service: &str, id: &str, group: &str, ready: bool) {
        state
            .put_instance(&InstanceRecord {
                id: id.to_string(),
                service: service.to_string(),
                version: "v1".to_string(),
                group: group.to_string(),
                phase: InstancePhase::Running,
                ready,
                alive: true,
                address: "10.0.0.1:8080".to_string(),
                created_at: 1000,
                updated_at: 1000,
            })
            .unwrap();
    }

    fn controller() -> (TrafficController, StateStore) {
        let state = StateStore::open_in_memory().unwrap();
        let controller = TrafficController::new(state.clone(), AdmissionIndex::new());
        (controller, state)
    }

    #[test]
    fn switch_to_healthy_group_succeeds() {
        let (controller, state) = controller();
        seed_service(&state, "api", "blue");
        for i in 0..3 {
            seed_instance(&state, "api", &format!("b-{i}"), "blue", true);
            seed_instance(&state, "api", &format!("g-{i}"), "green", true);
        }
        controller.resync("api").unwrap();
        assert_eq!(controller.admitted("api").len(), 3);
        assert!(controller.admitted("api").contains("b-0"));

        let outcome = controller.switch_to("api", "green").unwrap();
        assert_eq!(outcome, SwitchOutcome::Switched);

        // All three green ids admitted in a single recomputation.
        let snap = controller.admitted("api");
        assert_eq!(snap.len(), 3);
        assert!(snap.contains("g-0") && snap.contains("g-1") && snap.contains("g-2"));
        assert_eq!(state.get_service("api").unwrap().unwrap().active_group, "green");
    }

    #[test]
    fn switch_never_touches_instance_lifecycle() {
        let (controller, state) = controller();
        seed_service(&state, "api", "blue");
        seed_instance(&state, "api", "b-0", "blue", true);
        seed_instance(&state, "api", "g-0", "green", true);

        controller.switch_to("api", "green").unwrap();

        let records = state.list_instances_for_service("api").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.phase == InstancePhase::Running));
    }

    #[test]
    fn switch_to_unhealthy_group_is_refused() {
        let (controller, state) = controller();
        seed_service(&state, "api", "blue");
        seed_instance(&state, "api", "b-0", "blue", true);
        seed_instance(&state, "api", "g-0", "green", false); // not ready
        controller.resync("api").unwrap();

        let err = controller.switch_to("api", "green").unwrap_err();
        assert!(matches!(err, TrafficError::NoHealthyTarget { .. }));

        // Selector and admission set untouched.
        assert_eq!(state.get_service("api").unwrap().unwrap().active_group, "blue");
        assert!(controller.admitted("api").contains("b-0"));
    }

    #[test]
    fn switch_to_empty_group_is_refused() {
        let (controller, state) = controller();
        seed_service(&state, "api", "blue");
        seed_instance(&state, "api", "b-0", "blue", true);

        let err = controller.switch_to("api", "green").unwrap_err();
        assert!(matches!(err, TrafficError::NoHealthyTarget { .. }));
    }

    #[test]
    fn switch_to_active_group_is_idempotent() {
        let (controller, state) = controller();
        seed_service(&state, "api", "blue");

        // Succeeds even with zero instances — nothing changes.
        let outcome = controller.switch_to("api", "blue").unwrap();
        assert_eq!(outcome, SwitchOutcome::AlreadyActive);
    }

    #[test]
    fn switch_outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(SwitchOutcome::Switched).unwrap(),
            "switched"
        );
        assert_eq!(
            serde_json::to_value(SwitchOutcome::AlreadyActive).unwrap(),
            "already_active"
        );
    }

    #[test]
    fn switch_on_unknown_service_fails() {
        let (controller, _state) = controller();
        let err = controller.switch_to("ghost", "green").unwrap_err();
        assert!(matches!(err, TrafficError::ServiceNotFound(_)));
    }

    #[test]
    fn resync_reflects_ready_flips() {
        let (controller, state) = controller();
        seed_service(&state, "api", "blue");
        seed_instance(&state, "api", "b-0", "blue", true);
        controller.resync("api").unwrap();
        assert_eq!(controller.admitted("api").len(), 1);

        // Ready flips false in the store; resync drops the instance.
        seed_instance(&state, "api", "b-0", "blue", false);
        controller.resync("api").unwrap();
        assert!(controller.admitted("api").is_empty());
    }
}
