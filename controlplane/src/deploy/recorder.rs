//! Deployment record writer
//!
//! Every step and status change goes through here: the record is re-read
//! under a per-deployment lock, mutated, persisted and then published. An
//! already-terminal deployment is never touched again.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::errors::PlatformError;
use crate::events::broadcaster::EventBroadcaster;
use crate::models::deployment::{Deployment, DeploymentStatus, DeploymentStep, StepStatus};
use crate::persistence::Store;

pub struct DeploymentRecorder {
    store: Arc<dyn Store>,
    events: Arc<EventBroadcaster>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

enum Change {
    Step(DeploymentStep),
    Status(DeploymentStatus, String),
}

impl DeploymentRecorder {
    pub fn new(store: Arc<dyn Store>, events: Arc<EventBroadcaster>) -> Self {
        Self {
            store,
            events,
            locks: DashMap::new(),
        }
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    async fn lock(&self, deployment_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(deployment_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Apply `f` to a fresh copy of the record.
    ///
    /// Returns `None` without writing when the deployment is already
    /// terminal.
    async fn mutate<F>(&self, deployment_id: &str, f: F) -> Result<Option<Deployment>, PlatformError>
    where
        F: FnOnce(&mut Deployment) -> Vec<Change>,
    {
        let _guard = self.lock(deployment_id).await;

        let mut deployment = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("Deployment {}", deployment_id)))?;

        if deployment.is_terminal() {
            debug!(
                "Deployment {} already {}, skipping update",
                deployment_id, deployment.status
            );
            return Ok(None);
        }

        let changes = f(&mut deployment);
        self.store.put_deployment(&deployment).await?;

        for change in changes {
            match change {
                Change::Step(step) => self.events.publish_step(deployment_id, &step),
                Change::Status(status, message) => {
                    self.events.publish_status(deployment_id, status, &message)
                }
            }
        }

        if deployment.is_terminal() {
            self.locks.remove(deployment_id);
        }
        Ok(Some(deployment))
    }

    /// Move a pending deployment to IN_PROGRESS
    pub async fn start(&self, deployment_id: &str) -> Result<Option<Deployment>, PlatformError> {
        self.mutate(deployment_id, |deployment| {
            let was_pending = deployment.status == DeploymentStatus::Pending;
            deployment.start();
            if was_pending {
                vec![Change::Status(
                    DeploymentStatus::InProgress,
                    "Deployment started".to_string(),
                )]
            } else {
                Vec::new()
            }
        })
        .await
    }

    /// Open a step, closing the previous one first
    pub async fn open_step(
        &self,
        deployment_id: &str,
        name: &str,
        message: &str,
    ) -> Result<Option<Deployment>, PlatformError> {
        self.mutate(deployment_id, |deployment| {
            deployment
                .open_step(name, message)
                .into_iter()
                .map(Change::Step)
                .collect()
        })
        .await
    }

    pub async fn close_step(
        &self,
        deployment_id: &str,
        name: &str,
        status: StepStatus,
        message: &str,
    ) -> Result<Option<Deployment>, PlatformError> {
        self.mutate(deployment_id, |deployment| {
            deployment
                .close_step(name, status, Some(message))
                .into_iter()
                .map(Change::Step)
                .collect()
        })
        .await
    }

    pub async fn merge_metadata(
        &self,
        deployment_id: &str,
        entries: BTreeMap<String, String>,
    ) -> Result<Option<Deployment>, PlatformError> {
        self.mutate(deployment_id, |deployment| {
            deployment.metadata.extend(entries);
            Vec::new()
        })
        .await
    }

    /// Apply an arbitrary field update that publishes nothing
    pub async fn update<F>(&self, deployment_id: &str, f: F) -> Result<Option<Deployment>, PlatformError>
    where
        F: FnOnce(&mut Deployment),
    {
        self.mutate(deployment_id, |deployment| {
            f(deployment);
            Vec::new()
        })
        .await
    }

    /// Mark COMPLETED; returns whether this call terminalized the record
    pub async fn complete(&self, deployment_id: &str, message: &str) -> Result<bool, PlatformError> {
        let result = self
            .mutate(deployment_id, |deployment| {
                let mut changes: Vec<Change> =
                    deployment.complete().into_iter().map(Change::Step).collect();
                changes.push(Change::Status(DeploymentStatus::Completed, message.to_string()));
                changes
            })
            .await?;
        Ok(result.is_some())
    }

    /// Mark FAILED; returns whether this call terminalized the record
    pub async fn fail(&self, deployment_id: &str, error: &str) -> Result<bool, PlatformError> {
        let result = self
            .mutate(deployment_id, |deployment| {
                let mut changes: Vec<Change> =
                    deployment.fail(error).into_iter().map(Change::Step).collect();
                changes.push(Change::Status(DeploymentStatus::Failed, error.to_string()));
                changes
            })
            .await?;
        Ok(result.is_some())
    }

    /// Publish a log line without touching the record
    pub fn log(&self, deployment_id: &str, message: &str) {
        self.events.publish_log(deployment_id, message);
    }
}
