//! Deployment reconciler
//!
//! Re-derives the state of every active deployment from the orchestration
//! backend so an outcome is recorded even when the build task that started
//! the rollout is gone. Deployments that never reached the rollout are handed
//! to the build executor to be resumed or failed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::build::executor::BuildExecutor;
use crate::deploy::recorder::DeploymentRecorder;
use crate::errors::PlatformError;
use crate::models::deployment::{meta, Deployment};
use crate::orchestration::client::OrchestrationClient;
use crate::orchestration::{RolloutState, ServiceDescription, TaskHealth};
use crate::persistence::Store;

/// Deployment reconciler options
#[derive(Debug, Clone)]
pub struct Options {
    /// How long a finished deployment stays in the status cache
    pub cache_retention: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cache_retention: Duration::from_secs(300),
        }
    }
}

/// What a sweep did with one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Completed,
    Failed(String),
    Progress,
    Waiting,
}

#[derive(Debug, Clone)]
struct CachedStatus {
    deployment: Deployment,
    completed_at: Option<DateTime<Utc>>,
}

pub struct DeploymentReconciler {
    options: Options,
    store: Arc<dyn Store>,
    orchestration: Arc<OrchestrationClient>,
    recorder: Arc<DeploymentRecorder>,
    executor: Arc<BuildExecutor>,
    cache: DashMap<String, CachedStatus>,
}

impl DeploymentReconciler {
    pub fn new(
        options: Options,
        store: Arc<dyn Store>,
        orchestration: Arc<OrchestrationClient>,
        recorder: Arc<DeploymentRecorder>,
        executor: Arc<BuildExecutor>,
    ) -> Self {
        Self {
            options,
            store,
            orchestration,
            recorder,
            executor,
            cache: DashMap::new(),
        }
    }

    /// Reconcile every active deployment no build task is driving.
    ///
    /// Deployments with a service are checked against it; the rest go to
    /// [`BuildExecutor::recover`]. One deployment's error is logged and the
    /// sweep moves on.
    pub async fn sweep(&self) -> Result<(), PlatformError> {
        let deployments = self.store.active_deployments().await?;
        debug!("Reconciling {} active deployments", deployments.len());

        for deployment in &deployments {
            if self.executor.is_running(&deployment.id) {
                continue;
            }
            match deployment.meta(meta::SERVICE_REF) {
                Some(service_ref) => match self.reconcile(deployment, service_ref).await {
                    Ok(verdict) => {
                        debug!("Deployment {} reconciled: {:?}", deployment.id, verdict)
                    }
                    Err(e) => warn!("Unable to reconcile deployment {}: {}", deployment.id, e),
                },
                None => match self.executor.recover(&deployment.id).await {
                    Ok(recovery) => {
                        debug!("Deployment {} recovery: {:?}", deployment.id, recovery)
                    }
                    Err(e) => warn!("Unable to recover deployment {}: {}", deployment.id, e),
                },
            }
        }

        let active: HashSet<&str> = deployments.iter().map(|d| d.id.as_str()).collect();
        self.evict_expired(&active);
        Ok(())
    }

    async fn reconcile(
        &self,
        deployment: &Deployment,
        service_ref: &str,
    ) -> Result<Verdict, PlatformError> {
        let Some(service) = self.orchestration.describe_service(service_ref).await? else {
            warn!(
                "Service {} of deployment {} not found",
                service_ref, deployment.id
            );
            return Ok(Verdict::Waiting);
        };

        let verdict = match service.rollout_state {
            Some(RolloutState::Completed) => Verdict::Completed,
            Some(RolloutState::Failed) => Verdict::Failed(
                service
                    .rollout_reason
                    .clone()
                    .unwrap_or_else(|| "Rollout failed".to_string()),
            ),
            _ if service.is_settled() => {
                if self.tasks_healthy(&service).await? {
                    Verdict::Completed
                } else {
                    Verdict::Progress
                }
            }
            Some(RolloutState::InProgress) => Verdict::Progress,
            None => Verdict::Waiting,
        };

        match &verdict {
            Verdict::Completed => {
                if self
                    .recorder
                    .complete(&deployment.id, "Deployment completed successfully")
                    .await?
                {
                    info!("Deployment {} completed by reconciler", deployment.id);
                }
            }
            Verdict::Failed(reason) => {
                if self.recorder.fail(&deployment.id, reason).await? {
                    info!("Deployment {} failed by reconciler: {}", deployment.id, reason);
                }
            }
            Verdict::Progress => {
                self.recorder
                    .merge_metadata(&deployment.id, progress(&service))
                    .await?;
            }
            Verdict::Waiting => {}
        }

        if let Some(latest) = self.store.get_deployment(&deployment.id).await? {
            self.cache_status(latest);
        }
        Ok(verdict)
    }

    /// Every task reports HEALTHY; a running count alone is not enough
    async fn tasks_healthy(&self, service: &ServiceDescription) -> Result<bool, PlatformError> {
        let tasks = self.orchestration.describe_tasks(&service.task_refs).await?;
        Ok(!tasks.is_empty()
            && tasks
                .iter()
                .all(|task| task.health_status == TaskHealth::Healthy))
    }

    fn cache_status(&self, deployment: Deployment) {
        let completed_at = if deployment.is_terminal() {
            Some(deployment.completed_at.unwrap_or_else(Utc::now))
        } else {
            None
        };
        self.cache.insert(
            deployment.id.clone(),
            CachedStatus {
                deployment,
                completed_at,
            },
        );
    }

    /// Drop finished entries past the retention window and active entries
    /// whose deployment has since left the active set
    fn evict_expired(&self, active: &HashSet<&str>) {
        let retention = chrono::Duration::from_std(self.options.cache_retention)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let cutoff = Utc::now() - retention;
        self.cache.retain(|id, cached| match cached.completed_at {
            Some(completed_at) => completed_at > cutoff,
            None => active.contains(id.as_str()),
        });
    }

    pub fn cached(&self, deployment_id: &str) -> bool {
        self.cache.contains_key(deployment_id)
    }

    /// Deployment status from the cache, falling back to the store.
    ///
    /// Only finished deployments are served from the cache; an active one may
    /// have moved on since the last sweep.
    pub async fn status(&self, deployment_id: &str) -> Result<Option<Deployment>, PlatformError> {
        if let Some(cached) = self.cache.get(deployment_id) {
            if cached.completed_at.is_some() {
                return Ok(Some(cached.deployment.clone()));
            }
        }
        self.store.get_deployment(deployment_id).await
    }
}

fn progress(service: &ServiceDescription) -> BTreeMap<String, String> {
    BTreeMap::from([
        (meta::RUNNING_TASKS.to_string(), service.running_count.to_string()),
        (meta::DESIRED_TASKS.to_string(), service.desired_count.to_string()),
        (meta::PENDING_TASKS.to_string(), service.pending_count.to_string()),
        (
            meta::PROGRESS.to_string(),
            format!("{}/{}", service.running_count, service.desired_count),
        ),
    ])
}
