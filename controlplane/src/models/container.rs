//! Container models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Container lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Creating,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Deleting,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Creating => "CREATING",
            ContainerStatus::Starting => "STARTING",
            ContainerStatus::Running => "RUNNING",
            ContainerStatus::Stopping => "STOPPING",
            ContainerStatus::Stopped => "STOPPED",
            ContainerStatus::Failed => "FAILED",
            ContainerStatus::Deleting => "DELETING",
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Path probed over HTTP; `None` disables the probe
    #[serde(default)]
    pub path: Option<String>,

    /// Seconds between checks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Probe timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Consecutive failures before the container is reported unhealthy
    #[serde(default = "default_threshold")]
    pub unhealthy_threshold: u32,
}

fn default_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    5
}

fn default_threshold() -> u32 {
    3
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: Some("/health".to_string()),
            interval_secs: default_interval(),
            timeout_secs: default_timeout(),
            unhealthy_threshold: default_threshold(),
        }
    }
}

/// Resource usage summary written back by the health monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    pub measurement_period_start: Option<DateTime<Utc>>,
    pub measurement_period_end: Option<DateTime<Utc>>,
}

/// A user's deployable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub image: String,
    pub image_tag: String,
    pub subdomain: String,

    /// CPU units (256 = 0.25 vCPU)
    pub cpu: u32,

    /// Memory in MB
    pub memory: u32,
    pub port: u16,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub status: ContainerStatus,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub task_definition_ref: Option<String>,
    #[serde(default)]
    pub service_ref: Option<String>,
    #[serde(default)]
    pub task_ref: Option<String>,

    #[serde(default)]
    pub deployment_count: u64,
    #[serde(default)]
    pub last_deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_usage: Option<ResourceUsage>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Container {
    /// Full image reference as launched
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.image_tag)
    }

    /// Task family registered with the orchestration backend
    pub fn task_family(&self) -> String {
        format!("container-{}", self.id)
    }

    /// Service name derived for the orchestration backend
    pub fn service_name(&self) -> String {
        format!("service-{}", self.id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
