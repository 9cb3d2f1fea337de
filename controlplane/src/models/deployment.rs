//! Deployment models and step bookkeeping

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata keys carried on a deployment
pub mod meta {
    pub const BUILD_JOB_ID: &str = "buildJobId";
    pub const COMMIT_SHA: &str = "commitSha";
    pub const COMMIT_MESSAGE: &str = "commitMessage";
    pub const TRIGGER: &str = "trigger";
    pub const REPOSITORY_ID: &str = "repositoryId";
    pub const SERVICE_REF: &str = "serviceRef";
    pub const PROGRESS: &str = "progress";
    pub const RUNNING_TASKS: &str = "runningTasks";
    pub const DESIRED_TASKS: &str = "desiredTasks";
    pub const PENDING_TASKS: &str = "pendingTasks";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::InProgress => "IN_PROGRESS",
            DeploymentStatus::Completed => "COMPLETED",
            DeploymentStatus::Failed => "FAILED",
            DeploymentStatus::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentType {
    Initial,
    Update,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::InProgress => "IN_PROGRESS",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        }
    }

    fn is_open(&self) -> bool {
        matches!(self, StepStatus::Pending | StepStatus::InProgress)
    }
}

/// A named phase of a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentStep {
    fn close(&mut self, status: StepStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
    }
}

/// One build-and-release attempt for a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub container_id: String,
    pub owner_id: String,
    pub status: DeploymentStatus,
    pub deployment_type: DeploymentType,
    #[serde(default)]
    pub steps: Vec<DeploymentStep>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub initiated_by: Option<String>,
    #[serde(default)]
    pub previous_image: Option<String>,
    #[serde(default)]
    pub new_image: Option<String>,
}

impl Deployment {
    pub fn new(
        container_id: impl Into<String>,
        owner_id: impl Into<String>,
        deployment_type: DeploymentType,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            container_id: container_id.into(),
            owner_id: owner_id.into(),
            status: DeploymentStatus::Pending,
            deployment_type,
            steps: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            metadata: BTreeMap::new(),
            initiated_by: None,
            previous_image: None,
            new_image: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            DeploymentStatus::Pending | DeploymentStatus::InProgress
        )
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn current_step(&self) -> Option<&DeploymentStep> {
        self.steps
            .iter()
            .rev()
            .find(|step| step.status == StepStatus::InProgress)
    }

    /// Move to IN_PROGRESS, stamping the start time once
    pub fn start(&mut self) {
        if self.status == DeploymentStatus::Pending {
            self.status = DeploymentStatus::InProgress;
        }
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Open `name` as the in-progress step.
    ///
    /// Any other in-progress step is closed as COMPLETED first. Re-opening the
    /// step that is already in progress only updates its message. Returns the
    /// steps that changed, in the order they changed.
    pub fn open_step(&mut self, name: &str, message: &str) -> Vec<DeploymentStep> {
        let now = Utc::now();
        let mut changed = Vec::new();

        if let Some(current) = self
            .steps
            .iter_mut()
            .rev()
            .find(|step| step.status == StepStatus::InProgress)
        {
            if current.name == name {
                current.message = Some(message.to_string());
                changed.push(current.clone());
                return changed;
            }
            current.close(StepStatus::Completed, now);
            changed.push(current.clone());
        }

        let step = DeploymentStep {
            name: name.to_string(),
            status: StepStatus::InProgress,
            message: Some(message.to_string()),
            error: None,
            started_at: Some(now),
            completed_at: None,
        };
        self.steps.push(step.clone());
        changed.push(step);
        changed
    }

    /// Close the open step named `name`
    pub fn close_step(
        &mut self,
        name: &str,
        status: StepStatus,
        message: Option<&str>,
    ) -> Option<DeploymentStep> {
        let now = Utc::now();
        let step = self
            .steps
            .iter_mut()
            .rev()
            .find(|step| step.name == name && step.status.is_open())?;
        step.close(status, now);
        if let Some(message) = message {
            step.message = Some(message.to_string());
        }
        Some(step.clone())
    }

    /// Terminalize as COMPLETED, closing every open step as COMPLETED
    pub fn complete(&mut self) -> Vec<DeploymentStep> {
        let now = Utc::now();
        let mut changed = Vec::new();
        for step in self.steps.iter_mut().filter(|step| step.status.is_open()) {
            step.close(StepStatus::Completed, now);
            changed.push(step.clone());
        }
        self.status = DeploymentStatus::Completed;
        self.error_message = None;
        self.finish(now);
        changed
    }

    /// Terminalize as FAILED. The in-progress step fails with `error`;
    /// steps that never started are SKIPPED.
    pub fn fail(&mut self, error: &str) -> Vec<DeploymentStep> {
        let now = Utc::now();
        let mut changed = Vec::new();
        for step in self.steps.iter_mut() {
            match step.status {
                StepStatus::InProgress => {
                    step.close(StepStatus::Failed, now);
                    step.error = Some(error.to_string());
                    changed.push(step.clone());
                }
                StepStatus::Pending => {
                    step.close(StepStatus::Skipped, now);
                    changed.push(step.clone());
                }
                _ => {}
            }
        }
        self.status = DeploymentStatus::Failed;
        self.error_message = Some(error.to_string());
        self.finish(now);
        changed
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        let started = self.started_at.unwrap_or(self.created_at);
        self.duration_ms = Some((now - started).num_milliseconds().max(0));
    }
}
