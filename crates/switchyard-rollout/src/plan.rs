//! Plan validation and the per-tick decision function.
//!
//! The decision function is pure: it looks at the plan's budgets and a
//! snapshot of live instance records and names exactly one action. The
//! engine re-reads live state before every call, so no decision is ever
//! made from a stale snapshot.

use thiserror::Error;

use switchyard_state::{InstanceId, InstanceRecord, RolloutRecord, StateError};

use crate::manager::ManagerError;

/// Errors from rollout operations.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("rollout already in progress for service: {0}")]
    RolloutConflict(String),

    #[error("rollout plan not found: {0}")]
    PlanNotFound(String),

    #[error("maxUnavailable and maxSurge must not both be zero")]
    InvalidBudget,

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// Validate a plan's budgets: both are >= 0 by type; both zero would make
/// progress impossible.
pub fn validate_budget(max_unavailable: u32, max_surge: u32) -> Result<(), RolloutError> {
    if max_unavailable == 0 && max_surge == 0 {
        return Err(RolloutError::InvalidBudget);
    }
    Ok(())
}

/// Instance counts split by plan version, computed from live records.
///
/// Anything that is not the plan's new version counts as old, so instances
/// left over from an even earlier version are still drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutCounts {
    pub total_old: u32,
    pub total_new: u32,
    pub available_old: u32,
    pub available_new: u32,
}

impl RolloutCounts {
    pub fn from_records(records: &[InstanceRecord], new_version: &str) -> Self {
        let mut counts = RolloutCounts {
            total_old: 0,
            total_new: 0,
            available_old: 0,
            available_new: 0,
        };
        for record in records {
            let is_new = record.version == new_version;
            if record.counts_toward_total() {
                if is_new {
                    counts.total_new += 1;
                } else {
                    counts.total_old += 1;
                }
            }
            if record.is_available() {
                if is_new {
                    counts.available_new += 1;
                } else {
                    counts.available_old += 1;
                }
            }
        }
        counts
    }

    pub fn total(&self) -> u32 {
        self.total_old + self.total_new
    }

    pub fn available(&self) -> u32 {
        self.available_old + self.available_new
    }
}

/// The single action a tick may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    /// Create one new-version instance.
    CreateNew,
    /// Terminate this old-version instance.
    Terminate { instance: InstanceId },
    /// All replicas run the new version and are ready.
    Complete,
    /// Nothing can be done safely right now; wait for health events.
    Hold,
}

/// Decide the next action for an in-progress plan from live records.
///
/// Order matters: completion is checked first, then surge-bounded creation,
/// then budget-safe termination of the oldest old instance (FIFO, id
/// tie-break for deterministic, starvation-free ordering).
pub fn decide(plan: &RolloutRecord, records: &[InstanceRecord]) -> PlanAction {
    let counts = RolloutCounts::from_records(records, &plan.new_version);
    let n = plan.replicas;

    if counts.total_old == 0 && counts.total_new == n && counts.available_new == n {
        return PlanAction::Complete;
    }

    if counts.total() < n + plan.max_surge && counts.total_new < n {
        return PlanAction::CreateNew;
    }

    if let Some(victim) = oldest_old_instance(records, &plan.new_version) {
        // Removing the victim must keep availability within budget. The
        // victim itself may or may not be Ready; only a Ready victim lowers
        // availability.
        let after = counts.available() - u32::from(victim.is_available());
        if after >= n.saturating_sub(plan.max_unavailable) {
            return PlanAction::Terminate {
                instance: victim.id.clone(),
            };
        }
    }

    PlanAction::Hold
}

/// The oldest-created old-version instance still counting toward totals.
fn oldest_old_instance<'a>(
    records: &'a [InstanceRecord],
    new_version: &str,
) -> Option<&'a InstanceRecord> {
    records
        .iter()
        .filter(|r| r.counts_toward_total() && r.version != new_version)
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        })
}
