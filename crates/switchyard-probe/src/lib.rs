//! switchyard-probe — health probe execution for Switchyard.
//!
//! Issues periodic HTTP GET probes against individual instances and emits
//! pass/fail reports. Probes for different instances run on independent
//! schedules; probes for a single instance are strictly serial — the loop
//! awaits each probe before sleeping for the next, so a slow backend can
//! never build an in-flight backlog.
//!
//! # Architecture
//!
//! ```text
//! ProbeExecutor
//!   ├── Per-instance background loop (fixed interval, watch shutdown)
//!   │   └── http_probe() → ProbeOutcome
//!   └── mpsc::Sender<ProbeReport> → health tracker
//! ```
//!
//! No executor state is observable beyond the emitted reports.

pub mod executor;
pub mod prober;

pub use executor::{ProbeExecutor, ProbeReport};
pub use prober::{http_probe, parse_duration, ProbeFailure, ProbeOutcome};
