//! switchyard-traffic — traffic admission for Switchyard.
//!
//! Maintains the live, derived set of traffic-eligible instance identifiers
//! per service (the admission set) and performs instantaneous blue/green
//! cutover between traffic groups.
//!
//! # Components
//!
//! - **`admission`** — Atomically swapped admission snapshots derived from
//!   instance health and group membership
//! - **`switcher`** — The traffic switch controller (`switch_to`), refusing
//!   cutover to groups with no healthy target
//!
//! Switching traffic never creates or terminates instances and never touches
//! rollout state; the two are independent axes.

pub mod admission;
pub mod switcher;

pub use admission::{AdmissionIndex, AdmissionSnapshot};
pub use switcher::{SwitchOutcome, TrafficController, TrafficError};
