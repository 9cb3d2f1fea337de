//! In-memory store and account service
//!
//! Used for tests and single-node development runs.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::PlatformError;
use crate::models::account::{Owner, Plan};
use crate::models::container::{Container, ContainerStatus};
use crate::models::deployment::Deployment;
use crate::models::repository::LinkedRepository;
use crate::persistence::{Accounts, Store};

/// In-memory record store
#[derive(Default)]
pub struct MemoryStore {
    containers: DashMap<String, Container>,
    deployments: DashMap<String, Deployment>,
    repositories: DashMap<String, LinkedRepository>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_container(&self, id: &str) -> Result<Option<Container>, PlatformError> {
        Ok(self.containers.get(id).map(|c| c.clone()))
    }

    async fn put_container(&self, container: &Container) -> Result<(), PlatformError> {
        self.containers
            .insert(container.id.clone(), container.clone());
        Ok(())
    }

    async fn delete_container(&self, id: &str) -> Result<(), PlatformError> {
        self.containers.remove(id);
        Ok(())
    }

    async fn containers_by_status(
        &self,
        status: ContainerStatus,
    ) -> Result<Vec<Container>, PlatformError> {
        Ok(self
            .containers
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.value().clone())
            .collect())
    }

    async fn container_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<Container>, PlatformError> {
        Ok(self
            .containers
            .iter()
            .find(|c| c.subdomain == subdomain)
            .map(|c| c.value().clone()))
    }

    async fn count_active_containers(&self, owner_id: &str) -> Result<u64, PlatformError> {
        Ok(self
            .containers
            .iter()
            .filter(|c| c.owner_id == owner_id && c.status != ContainerStatus::Deleting)
            .count() as u64)
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, PlatformError> {
        Ok(self.deployments.get(id).map(|d| d.clone()))
    }

    async fn put_deployment(&self, deployment: &Deployment) -> Result<(), PlatformError> {
        self.deployments
            .insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn active_deployments(&self) -> Result<Vec<Deployment>, PlatformError> {
        Ok(self
            .deployments
            .iter()
            .filter(|d| d.is_active())
            .map(|d| d.value().clone())
            .collect())
    }

    async fn latest_deployment(
        &self,
        container_id: &str,
    ) -> Result<Option<Deployment>, PlatformError> {
        Ok(self
            .deployments
            .iter()
            .filter(|d| d.container_id == container_id)
            .max_by_key(|d| d.created_at)
            .map(|d| d.value().clone()))
    }

    async fn get_repository(&self, id: &str) -> Result<Option<LinkedRepository>, PlatformError> {
        Ok(self.repositories.get(id).map(|r| r.clone()))
    }

    async fn put_repository(&self, repository: &LinkedRepository) -> Result<(), PlatformError> {
        self.repositories
            .insert(repository.id.clone(), repository.clone());
        Ok(())
    }

    async fn repository_by_full_name(
        &self,
        full_name: &str,
    ) -> Result<Option<LinkedRepository>, PlatformError> {
        Ok(self
            .repositories
            .iter()
            .find(|r| r.full_name == full_name)
            .map(|r| r.value().clone()))
    }
}

/// In-memory account service
#[derive(Default)]
pub struct MemoryAccounts {
    owners: DashMap<String, Owner>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an owner on the given plan with no containers
    pub fn insert_owner(&self, owner_id: &str, plan: Plan) {
        self.owners.insert(
            owner_id.to_string(),
            Owner {
                id: owner_id.to_string(),
                plan,
                container_count: 0,
            },
        );
    }
}

#[async_trait]
impl Accounts for MemoryAccounts {
    async fn owner(&self, owner_id: &str) -> Result<Option<Owner>, PlatformError> {
        Ok(self.owners.get(owner_id).map(|o| o.clone()))
    }

    async fn adjust_container_count(
        &self,
        owner_id: &str,
        delta: i64,
    ) -> Result<(), PlatformError> {
        let mut owner = self
            .owners
            .get_mut(owner_id)
            .ok_or_else(|| PlatformError::NotFound(format!("Owner {}", owner_id)))?;
        owner.container_count = (owner.container_count + delta).max(0);
        Ok(())
    }
}
