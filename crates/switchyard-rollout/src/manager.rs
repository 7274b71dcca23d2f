//! The external instance manager contract.
//!
//! Creation and termination are asynchronous commands: the engine issues a
//! command and then waits for subsequent health events rather than blocking
//! on completion. Failures are values, reported back for retry — never
//! panics.

use async_trait::async_trait;
use thiserror::Error;

use switchyard_state::InstanceId;

/// Errors from the external instance manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("instance manager unavailable: {0}")]
    Unavailable(String),

    #[error("unknown instance: {0}")]
    UnknownInstance(String),
}

/// Commands the controller issues to whatever actually runs instances.
///
/// Credentials and TLS material handed to new instances are the manager's
/// business; the controller never inspects them.
#[async_trait]
pub trait InstanceManager: Send + Sync {
    /// Start one instance of `version` for `service` in traffic group
    /// `group`. Returns the new opaque instance identifier.
    async fn create(
        &self,
        service: &str,
        version: &str,
        group: &str,
    ) -> Result<InstanceId, ManagerError>;

    /// Tear down an instance. Idempotent at the manager's discretion.
    async fn terminate(&self, service: &str, instance: &str) -> Result<(), ManagerError>;
}
