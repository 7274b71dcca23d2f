//! Domain types for the Switchyard state store.
//!
//! These types represent the persisted state of managed services, their
//! running instances, and rollout plans. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a managed service.
pub type ServiceId = String;

/// Unique identifier for an instance within a service.
pub type InstanceId = String;

/// Unique identifier for a rollout plan.
pub type PlanId = String;

// ── Service ───────────────────────────────────────────────────────

/// Specification for a service under controller management.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub name: ServiceId,
    /// Desired instance count (N).
    pub replicas: u32,
    /// Traffic group currently selected for admission (e.g. "blue").
    pub active_group: String,
    /// Health probe configuration applied to every instance.
    pub probe: ProbeConfig,
    /// Readiness hysteresis thresholds (fast, traffic-facing).
    pub readiness: ThresholdConfig,
    /// Liveness hysteresis thresholds (slow, restart-facing).
    pub liveness: ThresholdConfig,
    /// Unix timestamp (seconds) when this spec was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this spec was last updated.
    pub updated_at: u64,
}

/// Health probe parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    /// HTTP path to probe (e.g., "/healthz").
    pub path: String,
    /// Check interval (e.g., "5s").
    pub interval: String,
    /// Timeout per check (e.g., "2s").
    pub timeout: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            path: "/healthz".to_string(),
            interval: "5s".to_string(),
            timeout: "2s".to_string(),
        }
    }
}

/// Consecutive-result thresholds for one hysteresis policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThresholdConfig {
    /// Consecutive successes before the state becomes true.
    pub success_threshold: u32,
    /// Consecutive failures before the state becomes false.
    pub failure_threshold: u32,
}

impl ThresholdConfig {
    /// Fast thresholds suitable for readiness (react quickly to failures).
    pub fn readiness_default() -> Self {
        Self {
            success_threshold: 1,
            failure_threshold: 3,
        }
    }

    /// Slow thresholds suitable for liveness (tolerate startup wobble).
    pub fn liveness_default() -> Self {
        Self {
            success_threshold: 1,
            failure_threshold: 5,
        }
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// Record of a single running copy of a service version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub service: ServiceId,
    /// Version label this instance runs.
    pub version: String,
    /// Traffic group membership (e.g. "blue", "green").
    pub group: String,
    pub phase: InstancePhase,
    /// May receive traffic now. Written only by the health tracker.
    pub ready: bool,
    /// Not wedged. Written only by the health tracker; false forces
    /// replacement.
    pub alive: bool,
    /// Address probed for health (ip:port).
    pub address: String,
    /// Unix timestamp (seconds) when this instance was created.
    pub created_at: u64,
    /// Unix timestamp of last record change.
    pub updated_at: u64,
}

/// Lifecycle phase of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancePhase {
    Pending,
    Running,
    Terminating,
    Terminated,
}

impl InstanceRecord {
    /// Counted toward surge totals: commanded to exist and not yet on the
    /// way out.
    pub fn counts_toward_total(&self) -> bool {
        matches!(self.phase, InstancePhase::Pending | InstancePhase::Running)
    }

    /// Counted toward availability: running and passing readiness.
    pub fn is_available(&self) -> bool {
        self.phase == InstancePhase::Running && self.ready
    }

    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service, self.id)
    }
}

// ── Rollout ───────────────────────────────────────────────────────

/// Persisted state of a rollout plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutRecord {
    pub id: PlanId,
    pub service: ServiceId,
    pub old_version: String,
    pub new_version: String,
    /// Target instance count (N).
    pub replicas: u32,
    /// How far below N availability may drop.
    pub max_unavailable: u32,
    /// Temporary excess above N allowed during the rollout.
    pub max_surge: u32,
    pub phase: RolloutPhase,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Phase of a rollout plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RolloutPhase {
    /// Created, no actions issued yet.
    Planning,
    /// Actively replacing instances.
    InProgress,
    /// All replicas run the new version and are ready.
    Completed,
    /// Cancelled or failed; partial state is left as-is.
    Aborted { reason: String },
}

impl RolloutPhase {
    /// Whether the plan still claims the service's rollout slot.
    pub fn is_active(&self) -> bool {
        matches!(self, RolloutPhase::Planning | RolloutPhase::InProgress)
    }
}
