//! Build, metrics and source-control backend contracts

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Fault,
    Stopped,
    TimedOut,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "QUEUED",
            BuildStatus::InProgress => "IN_PROGRESS",
            BuildStatus::Succeeded => "SUCCEEDED",
            BuildStatus::Failed => "FAILED",
            BuildStatus::Fault => "FAULT",
            BuildStatus::Stopped => "STOPPED",
            BuildStatus::TimedOut => "TIMED_OUT",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BuildStatus::Failed | BuildStatus::Fault | BuildStatus::Stopped | BuildStatus::TimedOut
        )
    }
}

/// Build job as reported by the build backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: String,
    pub status: BuildStatus,
    #[serde(default)]
    pub current_phase: Option<String>,
    /// Failure detail for the current phase, when the backend gives one
    #[serde(default)]
    pub phase_context: Option<String>,
}

impl BuildJob {
    /// Failure reason shown to users, with the phase context when there is one
    pub fn failure_message(&self) -> String {
        match self.phase_context.as_deref().filter(|c| !c.is_empty()) {
            Some(context) => format!("Build failed: {} ({})", self.status.as_str(), context),
            None => format!("Build failed: {}", self.status.as_str()),
        }
    }
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    async fn submit_job(&self, env: &BTreeMap<String, String>) -> Result<String, PlatformError>;
    async fn get_job(&self, job_id: &str) -> Result<Option<BuildJob>, PlatformError>;
}

/// Metric dimension name and value pairs
pub type Dimensions = BTreeMap<String, String>;

#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Average of a metric over the trailing window; 0.0 when there is no data
    async fn average(
        &self,
        namespace: &str,
        metric: &str,
        dimensions: &Dimensions,
        window: Duration,
    ) -> Result<f64, PlatformError>;

    async fn put_metric(
        &self,
        namespace: &str,
        metric: &str,
        value: f64,
        dimensions: &Dimensions,
    ) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Access token from the owner's source-control connection
    async fn access_token(&self, owner_id: &str) -> Result<SecretString, PlatformError>;

    /// Head commit id of `branch`, if the branch exists
    async fn head_commit(
        &self,
        full_name: &str,
        branch: &str,
        token: &SecretString,
    ) -> Result<Option<String>, PlatformError>;
}
