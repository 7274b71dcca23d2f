//! Rollout engine — applies plan decisions through the instance manager.
//!
//! The engine runs one decision per health-change tick. Each tick re-reads
//! live instance state, so decisions never act on a stale snapshot, and the
//! per-service decision lock keeps concurrent ticks for the same plan
//! mutually exclusive. Commands to the instance manager are retried with
//! doubling backoff; once the retry budget is exhausted the current plan is
//! aborted with reason `InstanceManagerUnavailable` — other services are
//! unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use switchyard_state::{
    InstanceId, InstancePhase, InstanceRecord, PlanId, RolloutPhase, RolloutRecord, ServiceId,
    StateStore,
};

use crate::manager::{InstanceManager, ManagerError};
use crate::plan::{decide, validate_budget, PlanAction, RolloutError};

/// Retry behavior for instance manager commands.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First retry delay; doubles on each attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Retries after the initial attempt before giving up.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new-version instance was commanded into existence.
    Created(InstanceId),
    /// An old-version instance was commanded to terminate.
    Terminating(InstanceId),
    /// The plan reached `Completed`.
    Completed,
    /// Nothing safe to do; waiting for health events.
    Held,
    /// No active plan for this service.
    NoActivePlan,
    /// The plan was aborted (manager unavailable).
    Aborted,
}

/// Drives rollout plans for all services sharing one state store.
pub struct RolloutEngine {
    state: StateStore,
    manager: Arc<dyn InstanceManager>,
    retry: RetryPolicy,
    /// Per-service decision locks; only one tick per service at a time.
    locks: Mutex<HashMap<ServiceId, Arc<Mutex<()>>>>,
    /// Monotonic suffix for plan and replacement ids.
    seq: AtomicU64,
}

impl RolloutEngine {
    pub fn new(state: StateStore, manager: Arc<dyn InstanceManager>, retry: RetryPolicy) -> Self {
        Self {
            state,
            manager,
            retry,
            locks: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(1),
        }
    }

    /// Start a rollout to `new_version` for `service`.
    ///
    /// Rejected with `RolloutConflict` if a plan is already active for the
    /// service, and with `InvalidBudget` if both budgets are zero. The old
    /// version is taken from the service's live instances.
    pub async fn start_rollout(
        &self,
        service: &str,
        new_version: &str,
        max_unavailable: u32,
        max_surge: u32,
    ) -> Result<PlanId, RolloutError> {
        validate_budget(max_unavailable, max_surge)?;

        let lock = self.service_lock(service).await;
        let _guard = lock.lock().await;

        let spec = self
            .state
            .get_service(service)?
            .ok_or_else(|| RolloutError::ServiceNotFound(service.to_string()))?;

        if self.state.active_rollout_for_service(service)?.is_some() {
            return Err(RolloutError::RolloutConflict(service.to_string()));
        }

        let records = self.state.list_instances_for_service(service)?;
        let old_version = oldest_live_version(&records, new_version)
            .unwrap_or_else(|| new_version.to_string());

        let now = epoch_secs();
        let plan = RolloutRecord {
            id: format!("plan-{service}-{}", self.seq.fetch_add(1, Ordering::Relaxed)),
            service: service.to_string(),
            old_version,
            new_version: new_version.to_string(),
            replicas: spec.replicas,
            max_unavailable,
            max_surge,
            phase: RolloutPhase::Planning,
            created_at: now,
            updated_at: now,
        };
        self.state.put_rollout(&plan)?;

        info!(
            %service,
            plan = %plan.id,
            old = %plan.old_version,
            new = %plan.new_version,
            max_unavailable,
            max_surge,
            "rollout started"
        );
        Ok(plan.id)
    }

    /// Abort a plan. Non-destructive: instances already created are left
    /// running, and no further actions are issued after the current tick.
    pub async fn abort(&self, plan_id: &str, reason: &str) -> Result<(), RolloutError> {
        let mut plan = self
            .state
            .get_rollout(plan_id)?
            .ok_or_else(|| RolloutError::PlanNotFound(plan_id.to_string()))?;

        let lock = self.service_lock(&plan.service).await;
        let _guard = lock.lock().await;

        // Re-read under the lock so an in-flight tick's phase write is seen.
        plan = self
            .state
            .get_rollout(plan_id)?
            .ok_or_else(|| RolloutError::PlanNotFound(plan_id.to_string()))?;

        if !plan.phase.is_active() {
            debug!(plan = %plan.id, phase = ?plan.phase, "abort on finished plan ignored");
            return Ok(());
        }

        plan.phase = RolloutPhase::Aborted {
            reason: reason.to_string(),
        };
        plan.updated_at = epoch_secs();
        self.state.put_rollout(&plan)?;
        warn!(plan = %plan.id, service = %plan.service, %reason, "rollout aborted");
        Ok(())
    }

    /// Run one decision tick for a service's active plan, if any.
    ///
    /// Called on every health-change event for the service.
    pub async fn tick(&self, service: &str) -> Result<TickOutcome, RolloutError> {
        let lock = self.service_lock(service).await;
        let _guard = lock.lock().await;

        let Some(mut plan) = self.state.active_rollout_for_service(service)? else {
            return Ok(TickOutcome::NoActivePlan);
        };

        if plan.phase == RolloutPhase::Planning {
            plan.phase = RolloutPhase::InProgress;
            plan.updated_at = epoch_secs();
            self.state.put_rollout(&plan)?;
        }

        self.promote_started_instances(service)?;

        // Fresh snapshot for this tick; never decide from stale health.
        let records = self.state.list_instances_for_service(service)?;

        match decide(&plan, &records) {
            PlanAction::CreateNew => {
                match self
                    .create_instance(service, &plan.new_version, &plan_group(&records, service, &self.state)?)
                    .await
                {
                    Ok(id) => Ok(TickOutcome::Created(id)),
                    Err(RolloutError::Manager(e)) => {
                        self.abort_unavailable(&mut plan, &e)?;
                        Ok(TickOutcome::Aborted)
                    }
                    Err(e) => Err(e),
                }
            }
            PlanAction::Terminate { instance } => {
                match self.terminate_instance(service, &instance).await {
                    Ok(()) => Ok(TickOutcome::Terminating(instance)),
                    Err(RolloutError::Manager(e)) => {
                        self.abort_unavailable(&mut plan, &e)?;
                        Ok(TickOutcome::Aborted)
                    }
                    Err(e) => Err(e),
                }
            }
            PlanAction::Complete => {
                plan.phase = RolloutPhase::Completed;
                plan.updated_at = epoch_secs();
                self.state.put_rollout(&plan)?;
                info!(plan = %plan.id, %service, "rollout completed");
                Ok(TickOutcome::Completed)
            }
            PlanAction::Hold => Ok(TickOutcome::Held),
        }
    }

    /// Replace an instance that failed liveness: terminate it and create a
    /// fresh one of the same version and group. Independent of any plan.
    pub async fn replace(&self, service: &str, instance: &str) -> Result<InstanceId, RolloutError> {
        let key = format!("{service}:{instance}");
        let record = self
            .state
            .get_instance(&key)?
            .ok_or_else(|| RolloutError::State(switchyard_state::StateError::NotFound(key)))?;

        warn!(%service, %instance, version = %record.version, "replacing wedged instance");
        self.terminate_instance(service, instance).await?;
        self.create_instance(service, &record.version, &record.group)
            .await
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn service_lock(&self, service: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Issue a create command (with retries) and record the Pending instance.
    async fn create_instance(
        &self,
        service: &str,
        version: &str,
        group: &str,
    ) -> Result<InstanceId, RolloutError> {
        let id = self
            .with_retries(|| self.manager.create(service, version, group))
            .await?;

        let now = epoch_secs();
        self.state.put_instance(&InstanceRecord {
            id: id.clone(),
            service: service.to_string(),
            version: version.to_string(),
            group: group.to_string(),
            phase: InstancePhase::Pending,
            ready: false,
            alive: false,
            address: String::new(),
            created_at: now,
            updated_at: now,
        })?;
        info!(%service, instance = %id, %version, "instance created");
        Ok(id)
    }

    /// Issue a terminate command (with retries) and mark the record
    /// Terminating. The record stops counting toward totals and can never
    /// appear in the admission set from here on.
    async fn terminate_instance(&self, service: &str, instance: &str) -> Result<(), RolloutError> {
        self.with_retries(|| self.manager.terminate(service, instance))
            .await?;

        let key = format!("{service}:{instance}");
        if let Some(mut record) = self.state.get_instance(&key)? {
            record.phase = InstancePhase::Terminating;
            record.ready = false;
            record.updated_at = epoch_secs();
            self.state.put_instance(&record)?;
        }
        info!(%service, %instance, "instance terminating");
        Ok(())
    }

    /// Pending instances whose probes show life have started; promote them
    /// to Running so they can count toward availability once Ready.
    fn promote_started_instances(&self, service: &str) -> Result<(), RolloutError> {
        for mut record in self.state.list_instances_for_service(service)? {
            if record.phase == InstancePhase::Pending && (record.alive || record.ready) {
                record.phase = InstancePhase::Running;
                record.updated_at = epoch_secs();
                debug!(%service, instance = %record.id, "instance running");
                self.state.put_instance(&record)?;
            }
        }
        Ok(())
    }

    fn abort_unavailable(
        &self,
        plan: &mut RolloutRecord,
        error: &ManagerError,
    ) -> Result<(), RolloutError> {
        plan.phase = RolloutPhase::Aborted {
            reason: "InstanceManagerUnavailable".to_string(),
        };
        plan.updated_at = epoch_secs();
        self.state.put_rollout(plan)?;
        warn!(
            plan = %plan.id,
            service = %plan.service,
            error = %error,
            "rollout aborted: instance manager unavailable"
        );
        Ok(())
    }

    /// Run a manager command, retrying with doubling backoff up to the
    /// policy's limit.
    async fn with_retries<T, F, Fut>(&self, mut op: F) -> Result<T, ManagerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ManagerError>>,
    {
        let mut delay = self.retry.base_delay;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    debug!(error = %e, attempt, delay = ?delay, "manager command failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.retry.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Group new instances join: the service's currently active traffic group.
fn plan_group(
    records: &[InstanceRecord],
    service: &str,
    state: &StateStore,
) -> Result<String, RolloutError> {
    // Prefer the group old instances run in; fall back to the selector.
    if let Some(record) = records.iter().find(|r| r.counts_toward_total()) {
        return Ok(record.group.clone());
    }
    let spec = state
        .get_service(service)?
        .ok_or_else(|| RolloutError::ServiceNotFound(service.to_string()))?;
    Ok(spec.active_group)
}

/// Version of the oldest live instance that differs from `new_version`.
fn oldest_live_version(records: &[InstanceRecord], new_version: &str) -> Option<String> {
    records
        .iter()
        .filter(|r| r.counts_toward_total() && r.version != new_version)
        .min_by_key(|r| r.created_at)
        .map(|r| r.version.clone())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
