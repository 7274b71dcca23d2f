//! switchyard-rollout — the rollout engine for Switchyard.
//!
//! Given a desired version and a running set of old-version instances,
//! drives a sequence of create / ready-wait / terminate actions bounded by
//! the plan's surge and unavailability budgets. Every decision is made from
//! a fresh read of live health state, one action per tick, so a flapping
//! instance can never cause two simultaneous terminations that exceed the
//! budget.
//!
//! # Components
//!
//! - **`plan`** — Plan validation and the pure per-tick decision function
//! - **`engine`** — Applies decisions through the external `InstanceManager`,
//!   with retry/backoff and conflict/abort handling
//! - **`manager`** — The asynchronous instance manager contract
//!
//! `max_unavailable: 0` degenerates the decision rule to "never terminate an
//! old instance until a replacement is Ready", which is what guarantees
//! zero-downtime rollouts.

pub mod engine;
pub mod manager;
pub mod plan;

pub use engine::{RetryPolicy, RolloutEngine, TickOutcome};
pub use manager::{InstanceManager, ManagerError};
pub use plan::{decide, PlanAction, RolloutCounts, RolloutError};
