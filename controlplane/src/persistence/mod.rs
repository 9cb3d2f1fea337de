//! Persistence gateway contracts
//!
//! The record store and the account service are external collaborators. Every
//! mutation is a full read-then-write of one record; callers re-read before
//! acting across awaits.

pub mod memory;

use async_trait::async_trait;

use crate::errors::PlatformError;
use crate::models::account::Owner;
use crate::models::container::{Container, ContainerStatus};
use crate::models::deployment::Deployment;
use crate::models::repository::LinkedRepository;

/// Key-value record store with secondary-index queries
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_container(&self, id: &str) -> Result<Option<Container>, PlatformError>;
    async fn put_container(&self, container: &Container) -> Result<(), PlatformError>;
    async fn delete_container(&self, id: &str) -> Result<(), PlatformError>;
    async fn containers_by_status(
        &self,
        status: ContainerStatus,
    ) -> Result<Vec<Container>, PlatformError>;
    async fn container_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<Container>, PlatformError>;

    /// Containers owned by `owner_id` that are not being deleted
    async fn count_active_containers(&self, owner_id: &str) -> Result<u64, PlatformError>;

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, PlatformError>;
    async fn put_deployment(&self, deployment: &Deployment) -> Result<(), PlatformError>;

    /// Deployments in PENDING or IN_PROGRESS
    async fn active_deployments(&self) -> Result<Vec<Deployment>, PlatformError>;

    /// Most recently created deployment of a container
    async fn latest_deployment(
        &self,
        container_id: &str,
    ) -> Result<Option<Deployment>, PlatformError>;

    async fn get_repository(&self, id: &str) -> Result<Option<LinkedRepository>, PlatformError>;
    async fn put_repository(&self, repository: &LinkedRepository) -> Result<(), PlatformError>;
    async fn repository_by_full_name(
        &self,
        full_name: &str,
    ) -> Result<Option<LinkedRepository>, PlatformError>;
}

/// External account management
#[async_trait]
pub trait Accounts: Send + Sync {
    async fn owner(&self, owner_id: &str) -> Result<Option<Owner>, PlatformError>;
    async fn adjust_container_count(&self, owner_id: &str, delta: i64)
        -> Result<(), PlatformError>;
}

/// Fetch a container or fail with a precondition error
pub async fn require_container(store: &dyn Store, id: &str) -> Result<Container, PlatformError> {
    store
        .get_container(id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("Container {}", id)))
}

/// Fetch a deployment or fail with a precondition error
pub async fn require_deployment(
    store: &dyn Store,
    id: &str,
) -> Result<Deployment, PlatformError> {
    store
        .get_deployment(id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("Deployment {}", id)))
}

/// Fetch a linked repository or fail with a precondition error
pub async fn require_repository(
    store: &dyn Store,
    id: &str,
) -> Result<LinkedRepository, PlatformError> {
    store
        .get_repository(id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("Repository {}", id)))
}
