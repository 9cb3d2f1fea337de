//! Orchestration client
//!
//! Translates a container's desired spec into a task definition plus a
//! service and wraps the lookups the reconciler and health monitor need.

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::PlatformError;
use crate::models::container::Container;
use crate::orchestration::{
    OrchestrationBackend, ServiceDescription, ServiceSpec, ServiceUpdate, TaskSpec, TaskState,
};

/// Orchestration handles produced by a deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedHandles {
    pub task_definition_ref: String,
    pub service_ref: String,
    pub task_ref: Option<String>,
}

pub struct OrchestrationClient {
    backend: Arc<dyn OrchestrationBackend>,
}

impl OrchestrationClient {
    pub fn new(backend: Arc<dyn OrchestrationBackend>) -> Self {
        Self { backend }
    }

    /// Build the task spec for a container
    pub fn task_spec(container: &Container) -> TaskSpec {
        let mut environment = container.environment.clone();
        environment
            .entry("HOST".to_string())
            .or_insert_with(|| "0.0.0.0".to_string());
        environment
            .entry("PORT".to_string())
            .or_insert_with(|| container.port.to_string());

        TaskSpec {
            family: container.task_family(),
            image: container.image_ref(),
            cpu: container.cpu,
            memory: container.memory,
            port: container.port,
            environment,
        }
    }

    pub async fn register_spec(&self, container: &Container) -> Result<String, PlatformError> {
        let spec = Self::task_spec(container);
        let spec_ref = self.backend.register_task_definition(&spec).await?;
        debug!("Registered task definition {} for container {}", spec_ref, container.id);
        Ok(spec_ref)
    }

    /// Update the service in place when an ACTIVE one exists, else create it
    pub async fn upsert_service(
        &self,
        container: &Container,
        spec_ref: &str,
    ) -> Result<String, PlatformError> {
        let name = container.service_name();
        match self.backend.describe_service(&name).await? {
            Some(service) if service.is_active() => {
                info!("Updating service {} for container {}", service.service_ref, container.id);
                let update = ServiceUpdate {
                    task_definition_ref: Some(spec_ref.to_string()),
                    desired_count: Some(1),
                    force_new_deployment: true,
                };
                self.backend.update_service(&service.service_ref, &update).await
            }
            _ => {
                info!("Creating service {} for container {}", name, container.id);
                let spec = ServiceSpec {
                    name,
                    task_definition_ref: spec_ref.to_string(),
                    desired_count: 1,
                };
                self.backend.create_service(&spec).await
            }
        }
    }

    pub async fn describe_service(
        &self,
        service_ref: &str,
    ) -> Result<Option<ServiceDescription>, PlatformError> {
        self.backend.describe_service(service_ref).await
    }

    pub async fn describe_tasks(
        &self,
        task_refs: &[String],
    ) -> Result<Vec<TaskState>, PlatformError> {
        if task_refs.is_empty() {
            return Ok(Vec::new());
        }
        self.backend.describe_tasks(task_refs).await
    }

    /// Scale a service to zero tasks; absent or inactive services are left alone
    pub async fn scale_to_zero(&self, service_ref: &str) -> Result<(), PlatformError> {
        match self.backend.describe_service(service_ref).await? {
            Some(service) if service.is_active() => {
                let update = ServiceUpdate {
                    desired_count: Some(0),
                    ..Default::default()
                };
                self.backend.update_service(service_ref, &update).await?;
                info!("Scaled service {} to zero", service_ref);
            }
            Some(service) => {
                debug!("Service {} is {}, not scaling", service_ref, service.status);
            }
            None => {
                debug!("Service {} not found, not scaling", service_ref);
            }
        }
        Ok(())
    }

    /// Delete a service; a service that is already gone is not an error
    pub async fn delete_service(&self, service_ref: &str, force: bool) -> Result<(), PlatformError> {
        let Some(service) = self.backend.describe_service(service_ref).await? else {
            info!("Service {} not found, nothing to delete", service_ref);
            return Ok(());
        };

        if !force && service.is_active() && service.desired_count > 0 {
            let update = ServiceUpdate {
                desired_count: Some(0),
                ..Default::default()
            };
            self.backend.update_service(service_ref, &update).await?;
        }

        self.backend.delete_service(service_ref, force).await?;
        info!("Deleted service {}", service_ref);
        Ok(())
    }

    /// Register the container's spec and create or update its service
    pub async fn deploy(&self, container: &Container) -> Result<DeployedHandles, PlatformError> {
        let task_definition_ref = self.register_spec(container).await?;
        let service_ref = self.upsert_service(container, &task_definition_ref).await?;
        let task_ref = self
            .backend
            .describe_service(&service_ref)
            .await?
            .and_then(|service| service.task_refs.into_iter().next());

        Ok(DeployedHandles {
            task_definition_ref,
            service_ref,
            task_ref,
        })
    }
}
