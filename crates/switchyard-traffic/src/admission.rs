//! Admission set derivation.
//!
//! The admission set is never stored and never mutated in place: each
//! recomputation builds a complete snapshot and swaps it in under a write
//! lock. Readers clone an `Arc` to the current snapshot, so a consumer can
//! never observe a half-applied update.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::debug;

use switchyard_state::{InstanceId, InstanceRecord, ServiceId};

/// An immutable, consistent view of one service's traffic-eligible instances.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AdmissionSnapshot {
    pub service: ServiceId,
    /// Traffic group the snapshot was derived for.
    pub group: String,
    /// Instance ids eligible for traffic right now.
    pub instances: BTreeSet<InstanceId>,
    /// Monotonic per-service recomputation counter.
    pub version: u64,
}

impl AdmissionSnapshot {
    /// Empty snapshot for a service that has no admitted instances yet.
    fn empty(service: &str, group: &str) -> Self {
        Self {
            service: service.to_string(),
            group: group.to_string(),
            instances: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, instance: &str) -> bool {
        self.instances.contains(instance)
    }
}

/// Holds the current admission snapshot per service.
#[derive(Clone, Default)]
pub struct AdmissionIndex {
    services: Arc<RwLock<HashMap<ServiceId, Arc<AdmissionSnapshot>>>>,
}

impl AdmissionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and install a fresh snapshot for `service`.
    ///
    /// Eligibility is `ready && phase == Running && group == active_group`;
    /// a Terminating instance is never admitted. Returns the new snapshot.
    pub fn recompute(
        &self,
        service: &str,
        active_group: &str,
        records: &[InstanceRecord],
    ) -> Arc<AdmissionSnapshot> {
        let instances: BTreeSet<InstanceId> = records
            .iter()
            .filter(|r| r.is_available() && r.group == active_group)
            .map(|r| r.id.clone())
            .collect();

        let mut services = self.services.write().expect("admission lock");
        let version = services
            .get(service)
            .map(|snap| snap.version + 1)
            .unwrap_or(1);
        let snapshot = Arc::new(AdmissionSnapshot {
            service: service.to_string(),
            group: active_group.to_string(),
            instances,
            version,
        });
        services.insert(service.to_string(), snapshot.clone());
        debug!(
            %service,
            group = %active_group,
            admitted = snapshot.len(),
            version,
            "admission set recomputed"
        );
        snapshot
    }

    /// Current snapshot for a service. Services that were never recomputed
    /// get an empty snapshot — an empty instance set is a valid state, not
    /// an error.
    pub fn admitted(&self, service: &str) -> Arc<AdmissionSnapshot> {
        let services = self.services.read().expect("admission lock");
        services
            .get(service)
            .cloned()
            .unwrap_or_else(|| Arc::new(AdmissionSnapshot::empty(service, "")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_state::InstancePhase;

    fn record(id: &str, group: &str, phase: InstancePhase, ready: bool) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            service: "api".to_string(),
            version: "v1".to_string(),
            group: group.to_string(),
            phase,
            ready,
            alive: true,
            address: "10.0.0.1:8080".to_string(),
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn admits_only_ready_running_members_of_group() {
        let index = AdmissionIndex::new();
        let records = vec![
            record("i-0", "blue", InstancePhase::Running, true),
            record("i-1", "blue", InstancePhase::Running, false), // not ready
            record("i-2", "blue", InstancePhase::Pending, true),  // not running
            record("i-3", "green", InstancePhase::Running, true), // wrong group
            record("i-4", "blue", InstancePhase::Terminating, true), // on the way out
        ];

        let snap = index.recompute("api", "blue", &records);
        assert_eq!(snap.len(), 1);
        assert!(snap.contains("i-0"));
    }

    #[test]
    fn empty_instance_set_is_valid() {
        let index = AdmissionIndex::new();
        let snap = index.recompute("api", "blue", &[]);
        assert!(snap.is_empty());

        // Never-recomputed services also read as empty.
        assert!(index.admitted("other").is_empty());
    }

    #[test]
    fn versions_are_monotonic_per_service() {
        let index = AdmissionIndex::new();
        let records = vec![record("i-0", "blue", InstancePhase::Running, true)];

        assert_eq!(index.recompute("api", "blue", &records).version, 1);
        assert_eq!(index.recompute("api", "blue", &records).version, 2);
        assert_eq!(index.recompute("web", "blue", &records).version, 1);
    }

    #[test]
    fn readers_keep_a_consistent_snapshot_across_recomputes() {
        let index = AdmissionIndex::new();
        index.recompute(
            "api",
            "blue",
            &[
                record("i-0", "blue", InstancePhase::Running, true),
                record("i-1", "blue", InstancePhase::Running, true),
            ],
        );

        let held = index.admitted("api");
        assert_eq!(held.len(), 2);

        // A recomputation replaces the snapshot; the held Arc is untouched.
        index.recompute("api", "blue", &[]);
        assert_eq!(held.len(), 2);
        assert!(index.admitted("api").is_empty());
    }

    #[test]
    fn group_switch_swaps_the_whole_set_at_once() {
        let index = AdmissionIndex::new();
        let records = vec![
            record("b-0", "blue", InstancePhase::Running, true),
            record("b-1", "blue", InstancePhase::Running, true),
            record("b-2", "blue", InstancePhase::Running, true),
            record("g-0", "green", InstancePhase::Running, true),
            record("g-1", "green", InstancePhase::Running, true),
            record("g-2", "green", InstancePhase::Running, true),
        ];

        let blue = index.recompute("api", "blue", &records);
        assert_eq!(
            blue.instances.iter().cloned().collect::<Vec<_>>(),
            vec!["b-0", "b-1", "b-2"]
        );

        let green = index.recompute("api", "green", &records);
        assert_eq!(
            green.instances.iter().cloned().collect::<Vec<_>>(),
            vec!["g-0", "g-1", "g-2"]
        );
        assert_eq!(green.version, blue.version + 1);
    }
}
