//! Container orchestration backend

pub mod client;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

/// Service status reported for a live service
pub const SERVICE_ACTIVE: &str = "ACTIVE";

/// Task definition derived from a container's desired spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub family: String,
    pub image: String,
    pub cpu: u32,
    pub memory: u32,
    pub port: u16,
    pub environment: BTreeMap<String, String>,
}

/// Request to create a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub task_definition_ref: String,
    pub desired_count: u32,
}

/// Request to update a service in place
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<u32>,
    #[serde(default)]
    pub force_new_deployment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutState {
    InProgress,
    Completed,
    Failed,
}

/// Snapshot of a service and its primary rollout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub service_ref: String,
    pub status: String,
    pub running_count: u32,
    pub desired_count: u32,
    pub pending_count: u32,
    #[serde(default)]
    pub rollout_state: Option<RolloutState>,
    #[serde(default)]
    pub rollout_reason: Option<String>,
    #[serde(default)]
    pub task_refs: Vec<String>,
}

impl ServiceDescription {
    pub fn is_active(&self) -> bool {
        self.status == SERVICE_ACTIVE
    }

    /// Every desired task is running and none are pending
    pub fn is_settled(&self) -> bool {
        self.desired_count > 0
            && self.running_count == self.desired_count
            && self.pending_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_ref: String,
    pub last_status: String,
    pub health_status: TaskHealth,
}

/// Raw operations offered by the orchestration backend
#[async_trait]
pub trait OrchestrationBackend: Send + Sync {
    async fn register_task_definition(&self, spec: &TaskSpec) -> Result<String, PlatformError>;

    /// Look a service up by name or reference; `None` when it does not exist
    async fn describe_service(
        &self,
        service: &str,
    ) -> Result<Option<ServiceDescription>, PlatformError>;

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, PlatformError>;

    async fn update_service(
        &self,
        service_ref: &str,
        update: &ServiceUpdate,
    ) -> Result<String, PlatformError>;

    async fn describe_tasks(&self, task_refs: &[String]) -> Result<Vec<TaskState>, PlatformError>;

    async fn delete_service(&self, service_ref: &str, force: bool) -> Result<(), PlatformError>;
}
