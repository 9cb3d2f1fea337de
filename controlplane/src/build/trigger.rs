//! Build trigger
//!
//! Creates the PENDING deployment record for a manual or webhook build and
//! hands it to the executor. Returns as soon as the build task is spawned.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backends::SourceControl;
use crate::build::executor::{BuildExecutor, BuildRequest};
use crate::errors::PlatformError;
use crate::models::deployment::{meta, Deployment, DeploymentType};
use crate::models::repository::LinkedRepository;
use crate::persistence::{require_container, require_repository, Store};

const MAX_COMMIT_MESSAGE: usize = 200;

pub const TRIGGER_MANUAL: &str = "manual";
pub const TRIGGER_WEBHOOK: &str = "webhook";

pub struct BuildTrigger {
    store: Arc<dyn Store>,
    source_control: Arc<dyn SourceControl>,
    executor: Arc<BuildExecutor>,
}

impl BuildTrigger {
    pub fn new(
        store: Arc<dyn Store>,
        source_control: Arc<dyn SourceControl>,
        executor: Arc<BuildExecutor>,
    ) -> Self {
        Self {
            store,
            source_control,
            executor,
        }
    }

    /// Build the head of the deploy branch on behalf of the repository owner
    pub async fn trigger_manual(
        &self,
        repository_id: &str,
        owner_id: &str,
    ) -> Result<Deployment, PlatformError> {
        let repository = require_repository(self.store.as_ref(), repository_id).await?;
        if repository.owner_id != owner_id {
            return Err(PlatformError::Forbidden(format!(
                "Repository {} belongs to another owner",
                repository_id
            )));
        }

        let commit_sha = match self.head_commit(&repository).await {
            Some(sha) => sha,
            None => {
                let generated = uuid::Uuid::new_v4().simple().to_string();
                warn!(
                    "Unable to resolve head of {}@{}, using generated id {}",
                    repository.full_name, repository.deploy_branch, generated
                );
                generated
            }
        };

        self.launch(
            &repository,
            &commit_sha,
            "Manual deployment",
            TRIGGER_MANUAL,
            owner_id,
        )
        .await
    }

    /// Build a pushed commit
    pub async fn trigger_webhook(
        &self,
        repository: &LinkedRepository,
        commit_sha: &str,
        commit_message: &str,
        pusher: &str,
    ) -> Result<Deployment, PlatformError> {
        self.launch(repository, commit_sha, commit_message, TRIGGER_WEBHOOK, pusher)
            .await
    }

    async fn head_commit(&self, repository: &LinkedRepository) -> Option<String> {
        let token = match self.source_control.access_token(&repository.owner_id).await {
            Ok(token) => token,
            Err(e) => {
                warn!("No source-control token for owner {}: {}", repository.owner_id, e);
                return None;
            }
        };
        match self
            .source_control
            .head_commit(&repository.full_name, &repository.deploy_branch, &token)
            .await
        {
            Ok(sha) => sha,
            Err(e) => {
                warn!("Unable to read head of {}: {}", repository.full_name, e);
                None
            }
        }
    }

    async fn launch(
        &self,
        repository: &LinkedRepository,
        commit_sha: &str,
        commit_message: &str,
        trigger: &str,
        initiated_by: &str,
    ) -> Result<Deployment, PlatformError> {
        let container = require_container(self.store.as_ref(), &repository.container_id).await?;

        let deployment_type = if container.deployment_count == 0 {
            DeploymentType::Initial
        } else {
            DeploymentType::Update
        };
        let mut deployment = Deployment::new(&container.id, &container.owner_id, deployment_type);
        deployment.set_meta(meta::TRIGGER, trigger);
        deployment.set_meta(meta::REPOSITORY_ID, repository.id.as_str());
        deployment.set_meta(meta::COMMIT_SHA, commit_sha);
        deployment.set_meta(meta::COMMIT_MESSAGE, truncate(commit_message, MAX_COMMIT_MESSAGE));
        deployment.initiated_by = Some(initiated_by.to_string());
        if container.deployment_count > 0 {
            deployment.previous_image = Some(container.image_ref());
        }
        self.store.put_deployment(&deployment).await?;

        let request = BuildRequest {
            repository_id: repository.id.clone(),
            deployment_id: deployment.id.clone(),
            commit_sha: commit_sha.to_string(),
        };
        if let Err(e) = self.executor.spawn(request) {
            deployment.fail(&e.to_string());
            self.store.put_deployment(&deployment).await?;
            return Err(e);
        }

        info!(
            "Deployment {} triggered ({}) for container {} at {}",
            deployment.id, trigger, container.id, commit_sha
        );
        Ok(deployment)
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    message.chars().take(max_chars).collect()
}
