//! switchyard.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use switchyard_state::{ProbeConfig, ServiceSpec, ThresholdConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub manager: ManagerConfig,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
}

/// Where the external instance manager listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub url: String,
    /// Command retries before a plan is aborted.
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub replicas: u32,
    pub active_group: Option<String>,
    pub probe: Option<ProbeSection>,
    pub readiness: Option<ThresholdSection>,
    pub liveness: Option<ThresholdSection>,
    /// Instances already running when the daemon starts.
    #[serde(default, rename = "instance")]
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSection {
    pub path: Option<String>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSection {
    pub success_threshold: Option<u32>,
    pub failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,
    pub version: String,
    pub group: Option<String>,
    pub address: String,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

impl ServiceConfig {
    /// Materialize the persisted spec, filling defaults for omitted sections.
    pub fn to_spec(&self) -> ServiceSpec {
        let now = epoch_secs();
        let probe = self.probe.as_ref();
        let defaults = ProbeConfig::default();
        ServiceSpec {
            name: self.name.clone(),
            replicas: self.replicas,
            active_group: self.active_group.clone().unwrap_or_else(|| "blue".to_string()),
            probe: ProbeConfig {
                path: probe
                    .and_then(|p| p.path.clone())
                    .unwrap_or(defaults.path),
                interval: probe
                    .and_then(|p| p.interval.clone())
                    .unwrap_or(defaults.interval),
                timeout: probe
                    .and_then(|p| p.timeout.clone())
                    .unwrap_or(defaults.timeout),
            },
            readiness: thresholds(self.readiness.as_ref(), ThresholdConfig::readiness_default()),
            liveness: thresholds(self.liveness.as_ref(), ThresholdConfig::liveness_default()),
            created_at: now,
            updated_at: now,
        }
    }
}

fn thresholds(section: Option<&ThresholdSection>, defaults: ThresholdConfig) -> ThresholdConfig {
    ThresholdConfig {
        success_threshold: section
            .and_then(|s| s.success_threshold)
            .unwrap_or(defaults.success_threshold),
        failure_threshold: section
            .and_then(|s| s.failure_threshold)
            .unwrap_or(defaults.failure_threshold),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
