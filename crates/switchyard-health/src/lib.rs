//! switchyard-health — instance health tracking for Switchyard.
//!
//! Consumes probe reports and derives two independent boolean states per
//! instance — Ready and Alive — using separately configured hysteresis
//! policies. Readiness reacts fast so traffic can be pulled quickly;
//! liveness reacts slower so a starting instance is not killed prematurely.
//!
//! # Architecture
//!
//! ```text
//! ProbeReport ──▶ HealthTracker (single writer of health fields)
//!                   ├── Hysteresis (readiness thresholds)
//!                   ├── Hysteresis (liveness thresholds)
//!                   ├── InstanceRecord.ready/alive in StateStore
//!                   └── HealthEvent → admission set + rollout engine
//! ```
//!
//! A transition to Alive=false is fatal for that instance: Ready is forced
//! false at the same time and the rollout engine replaces the instance. A
//! transition to Ready=false only removes the instance from traffic.

pub mod hysteresis;
pub mod tracker;

pub use hysteresis::Hysteresis;
pub use tracker::{HealthEvent, HealthTracker};
