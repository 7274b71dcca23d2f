//! redb table definitions for the Switchyard state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Instance keys follow the pattern `{service}:{instance_id}` so a
//! service's instances can be found with a prefix scan.

use redb::TableDefinition;

/// Service specs keyed by `{name}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Instance records keyed by `{service}:{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Rollout plan records keyed by `{plan_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");
