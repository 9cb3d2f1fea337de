//! Container lifecycle operations
//!
//! Every operation checks ownership, asks the lifecycle FSM for the next
//! status and persists it before touching the orchestration backend. A
//! backend failure leaves the container FAILED and is returned to the caller.

use std::sync::Arc;

use api_models::requests::{CreateContainerRequest, UpdateContainerRequest};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::build::phases;
use crate::containers::validate::{
    default_port_for_image, split_image, subdomain_for, validate_cpu, validate_image,
    validate_memory, validate_name,
};
use crate::deploy::recorder::DeploymentRecorder;
use crate::errors::PlatformError;
use crate::health::monitor::HealthMonitor;
use crate::lifecycle::fsm::{next_status, LifecycleEvent};
use crate::models::account::Plan;
use crate::models::container::{Container, ContainerStatus, HealthCheckConfig, ResourceUsage};
use crate::models::deployment::{meta, Deployment, DeploymentType};
use crate::orchestration::client::OrchestrationClient;
use crate::persistence::{require_container, Accounts, Store};

/// Containers an owner may hold per plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub free: u64,
    pub starter: u64,
    pub pro: u64,
    pub business: u64,
    pub enterprise: u64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            free: 1,
            starter: 3,
            pro: 10,
            business: 50,
            enterprise: 200,
        }
    }
}

impl PlanLimits {
    pub fn limit(&self, plan: Plan) -> u64 {
        match plan {
            Plan::Free => self.free,
            Plan::Starter => self.starter,
            Plan::Pro => self.pro,
            Plan::Business => self.business,
            Plan::Enterprise => self.enterprise,
        }
    }
}

/// Container service options
#[derive(Debug, Clone)]
pub struct Options {
    pub plan_limits: PlanLimits,

    /// CPU units for containers created without one
    pub default_cpu: u32,

    /// Memory (MB) for containers created without one
    pub default_memory: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            plan_limits: PlanLimits::default(),
            default_cpu: 256,
            default_memory: 512,
        }
    }
}

pub struct ContainerService {
    options: Options,
    store: Arc<dyn Store>,
    accounts: Arc<dyn Accounts>,
    orchestration: Arc<OrchestrationClient>,
    recorder: Arc<DeploymentRecorder>,
    health: Arc<HealthMonitor>,
}

impl ContainerService {
    pub fn new(
        options: Options,
        store: Arc<dyn Store>,
        accounts: Arc<dyn Accounts>,
        orchestration: Arc<OrchestrationClient>,
        recorder: Arc<DeploymentRecorder>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            options,
            store,
            accounts,
            orchestration,
            recorder,
            health,
        }
    }

    /// Fetch a container the caller owns
    pub async fn get(&self, container_id: &str, owner_id: &str) -> Result<Container, PlatformError> {
        let container = require_container(self.store.as_ref(), container_id).await?;
        if container.owner_id != owner_id {
            warn!("Owner {} denied access to container {}", owner_id, container_id);
            return Err(PlatformError::Forbidden(format!(
                "Container {} belongs to another owner",
                container_id
            )));
        }
        Ok(container)
    }

    pub async fn create(
        &self,
        owner_id: &str,
        request: CreateContainerRequest,
    ) -> Result<Container, PlatformError> {
        info!("Creating container {} for owner {}", request.name, owner_id);

        let owner = self
            .accounts
            .owner(owner_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("Owner {}", owner_id)))?;
        let limit = self.options.plan_limits.limit(owner.plan);
        if self.store.count_active_containers(owner_id).await? >= limit {
            return Err(PlatformError::LimitReached(format!(
                "Container limit reached for plan: {}",
                owner.plan.as_str()
            )));
        }

        validate_name(&request.name)?;
        validate_image(&request.image)?;
        let (image, tag) = split_image(request.image.trim());
        let image_tag = tag.unwrap_or(&request.image_tag).to_string();

        let subdomain = subdomain_for(&request.name);
        if self.store.container_by_subdomain(&subdomain).await?.is_some() {
            return Err(PlatformError::Conflict(format!(
                "Subdomain {} already in use",
                subdomain
            )));
        }

        let cpu = request.cpu.unwrap_or(self.options.default_cpu);
        validate_cpu(cpu)?;
        let memory = request.memory.unwrap_or(self.options.default_memory);
        validate_memory(memory)?;
        let port = request.port.unwrap_or_else(|| default_port_for_image(image));

        let mut environment = request.environment;
        environment.insert("PORT".to_string(), port.to_string());

        let mut health_check = HealthCheckConfig::default();
        if let Some(path) = request.health_check_path {
            health_check.path = Some(path).filter(|path| !path.is_empty());
        }

        let now = Utc::now();
        let container = Container {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: request.name,
            image: image.to_string(),
            image_tag,
            subdomain,
            cpu,
            memory,
            port,
            environment,
            status: ContainerStatus::Creating,
            health_check,
            task_definition_ref: None,
            service_ref: None,
            task_ref: None,
            deployment_count: 0,
            last_deployed_at: None,
            resource_usage: Some(ResourceUsage {
                measurement_period_start: Some(now),
                measurement_period_end: Some(now),
                ..Default::default()
            }),
            created_at: now,
            updated_at: now,
        };

        self.store.put_container(&container).await?;
        self.accounts.adjust_container_count(owner_id, 1).await?;
        info!("Created container {} ({})", container.id, container.image_ref());
        Ok(container)
    }

    /// Change resources or environment; takes effect on the next deploy
    pub async fn update(
        &self,
        container_id: &str,
        owner_id: &str,
        request: UpdateContainerRequest,
    ) -> Result<Container, PlatformError> {
        let mut container = self.get(container_id, owner_id).await?;

        if let Some(cpu) = request.cpu {
            validate_cpu(cpu)?;
            container.cpu = cpu;
        }
        if let Some(memory) = request.memory {
            validate_memory(memory)?;
            container.memory = memory;
        }
        if let Some(environment) = request.environment {
            container.environment.extend(environment);
        }
        container
            .environment
            .insert("PORT".to_string(), container.port.to_string());

        container.touch();
        self.store.put_container(&container).await?;
        info!("Updated container {}", container_id);
        Ok(container)
    }

    /// Launch the container's current image
    pub async fn deploy(&self, container_id: &str, owner_id: &str) -> Result<Container, PlatformError> {
        let mut container = self.get(container_id, owner_id).await?;
        container.status = next_status(container.status, LifecycleEvent::Deploy)?;
        container.touch();
        self.store.put_container(&container).await?;

        let deployment_type = if container.deployment_count == 0 {
            DeploymentType::Initial
        } else {
            DeploymentType::Update
        };
        let mut deployment = Deployment::new(&container.id, owner_id, deployment_type);
        deployment.set_meta(meta::TRIGGER, "manual");
        deployment.initiated_by = Some(owner_id.to_string());
        if container.deployment_count > 0 {
            deployment.previous_image = Some(container.image_ref());
        }
        deployment.start();
        self.store.put_deployment(&deployment).await?;
        info!(
            "Deploying container {} as deployment {}",
            container_id, deployment.id
        );

        match self.roll_out(&container, &deployment.id).await {
            Ok(container) => Ok(container),
            Err(e) => {
                error!("Deploy of container {} failed: {}", container_id, e);
                self.mark_failed(container_id).await;
                let message = format!("Deployment failed: {}", e.reason());
                if let Err(record_err) = self.recorder.fail(&deployment.id, &message).await {
                    error!(
                        "Unable to mark deployment {} failed: {}",
                        deployment.id, record_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn roll_out(
        &self,
        container: &Container,
        deployment_id: &str,
    ) -> Result<Container, PlatformError> {
        self.recorder
            .open_step(deployment_id, phases::DEPLOYING, "Deploying container")
            .await?;

        let handles = self.orchestration.deploy(container).await?;

        let mut container = require_container(self.store.as_ref(), &container.id).await?;
        container.status = next_status(container.status, LifecycleEvent::DeploySucceeded)?;
        container.task_definition_ref = Some(handles.task_definition_ref);
        container.service_ref = Some(handles.service_ref.clone());
        container.task_ref = handles.task_ref;
        container.deployment_count += 1;
        container.last_deployed_at = Some(Utc::now());
        container.touch();
        self.store.put_container(&container).await?;

        // The reconciler completes the deployment once the rollout settles
        let new_image = container.image_ref();
        self.recorder
            .update(deployment_id, move |deployment| {
                deployment.set_meta(meta::SERVICE_REF, handles.service_ref);
                deployment.new_image = Some(new_image);
            })
            .await?;

        self.health.start_monitoring(&container);
        info!(
            "Container {} running, deployment count {}",
            container.id, container.deployment_count
        );
        Ok(container)
    }

    /// Scale the container to zero
    pub async fn stop(&self, container_id: &str, owner_id: &str) -> Result<Container, PlatformError> {
        let mut container = self.get(container_id, owner_id).await?;
        container.status = next_status(container.status, LifecycleEvent::Stop)?;
        container.touch();
        self.store.put_container(&container).await?;

        self.health.stop_monitoring(container_id);

        let result: Result<Container, PlatformError> = async {
            if let Some(service_ref) = container.service_ref.as_deref() {
                self.orchestration.scale_to_zero(service_ref).await?;
            }
            let mut container = require_container(self.store.as_ref(), container_id).await?;
            container.status = next_status(container.status, LifecycleEvent::Stopped)?;
            container.touch();
            self.store.put_container(&container).await?;
            Ok(container)
        }
        .await;

        match result {
            Ok(container) => {
                info!("Stopped container {}", container_id);
                Ok(container)
            }
            Err(e) => {
                error!("Stop of container {} failed: {}", container_id, e);
                self.mark_failed(container_id).await;
                Err(e)
            }
        }
    }

    /// Delete the container and its backing service.
    ///
    /// A RUNNING container is stopped first unless `force` is set. On failure
    /// the record is kept as FAILED.
    pub async fn delete(
        &self,
        container_id: &str,
        owner_id: &str,
        force: bool,
    ) -> Result<(), PlatformError> {
        let mut container = self.get(container_id, owner_id).await?;
        if container.status == ContainerStatus::Running && !force {
            container = self.stop(container_id, owner_id).await?;
        }

        container.status = next_status(container.status, LifecycleEvent::Delete { force })?;
        container.touch();
        self.store.put_container(&container).await?;
        self.health.stop_monitoring(container_id);

        let result: Result<(), PlatformError> = async {
            if let Some(service_ref) = container.service_ref.as_deref() {
                self.orchestration.delete_service(service_ref, force).await?;
            }
            self.store.delete_container(container_id).await?;
            self.accounts
                .adjust_container_count(&container.owner_id, -1)
                .await
        }
        .await;

        match result {
            Ok(()) => {
                info!("Deleted container {}", container_id);
                Ok(())
            }
            Err(e) => {
                error!("Delete of container {} failed: {}", container_id, e);
                self.mark_failed(container_id).await;
                Err(e)
            }
        }
    }

    async fn mark_failed(&self, container_id: &str) {
        let mut container = match self.store.get_container(container_id).await {
            Ok(Some(container)) => container,
            Ok(None) => return,
            Err(e) => {
                error!("Unable to load container {}: {}", container_id, e);
                return;
            }
        };
        if let Ok(status) = next_status(container.status, LifecycleEvent::Fail) {
            container.status = status;
        }
        container.touch();
        if let Err(e) = self.store.put_container(&container).await {
            error!("Unable to mark container {} failed: {}", container_id, e);
        }
    }
}
