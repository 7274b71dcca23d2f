//! StateStore — redb-backed state persistence for Switchyard.
//!
//! Provides typed CRUD operations over services, instances, and rollout
//! plans. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service spec.
    pub fn put_service(&self, spec: &ServiceSpec) -> StateResult<()> {
        let value = serde_json::to_vec(spec).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            table
                .insert(spec.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service = %spec.name, "service stored");
        Ok(())
    }

    /// Get a service by name.
    pub fn get_service(&self, name: &str) -> StateResult<Option<ServiceSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: ServiceSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    /// List all services.
    pub fn list_services(&self) -> StateResult<Vec<ServiceSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let spec: ServiceSpec =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(spec);
        }
        Ok(results)
    }

    /// Update only the active traffic group of a service.
    pub fn set_active_group(&self, name: &str, group: &str, now: u64) -> StateResult<()> {
        let mut spec = self
            .get_service(name)?
            .ok_or_else(|| StateError::NotFound(name.to_string()))?;
        spec.active_group = group.to_string();
        spec.updated_at = now;
        self.put_service(&spec)
    }

    /// Delete a service by name. Returns true if it existed.
    pub fn delete_service(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service = %name, existed, "service deleted");
        Ok(existed)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, record: &InstanceRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get an instance by its composite key (`{service}:{id}`).
    pub fn get_instance(&self, key: &str) -> StateResult<Option<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: InstanceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Find an instance anywhere by bare instance id (full scan).
    pub fn find_instance(&self, instance_id: &str) -> StateResult<Option<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: InstanceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.id == instance_id {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// List all instances for a given service.
    pub fn list_instances_for_service(&self, service: &str) -> StateResult<Vec<InstanceRecord>> {
        let prefix = format!("{service}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: InstanceRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Delete an instance by key. Returns true if it existed.
    pub fn delete_instance(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Insert or update a rollout record.
    pub fn put_rollout(&self, record: &RolloutRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a rollout by plan id.
    pub fn get_rollout(&self, plan_id: &str) -> StateResult<Option<RolloutRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        match table.get(plan_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: RolloutRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Find the active (Planning or InProgress) rollout for a service, if any.
    pub fn active_rollout_for_service(
        &self,
        service: &str,
    ) -> StateResult<Option<RolloutRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: RolloutRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.service == service && record.phase.is_active() {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// List all rollouts.
    pub fn list_rollouts(&self) -> StateResult<Vec<RolloutRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: RolloutRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }
}
