//! switchyard-state — embedded state store for Switchyard.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for services, instances, and rollout plans.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{service}:{instance_id}`) enable efficient prefix scans
//! for a service's instances.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Health flags on instance records
//! are written only by the health tracker; lifecycle phases only by the
//! rollout engine.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
