//! Build job environment

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};

use crate::models::repository::LinkedRepository;

/// Image registry the build pushes to
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub host: String,
    pub repository_prefix: String,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            host: "registry.berth.local".to_string(),
            repository_prefix: "berth".to_string(),
        }
    }
}

impl RegistryOptions {
    /// Per-owner image repository
    pub fn image_repository(&self, owner_id: &str) -> String {
        format!("{}/user-{}", self.repository_prefix, owner_id)
    }

    /// Image reference without the tag
    pub fn image_base(&self, owner_id: &str) -> String {
        format!("{}/{}", self.host, self.image_repository(owner_id))
    }
}

/// Image tag derived from a commit id
pub fn image_tag(commit_sha: &str) -> String {
    commit_sha.chars().take(7).collect()
}

/// Assemble the environment handed to the build backend
pub fn build_environment(
    repository: &LinkedRepository,
    owner_id: &str,
    commit_sha: &str,
    token: &SecretString,
    registry: &RegistryOptions,
) -> BTreeMap<String, String> {
    let tag = image_tag(commit_sha);
    let image_repository = registry.image_repository(owner_id);

    let mut env = BTreeMap::new();
    env.insert("REPOSITORY".to_string(), repository.full_name.clone());
    env.insert("BRANCH".to_string(), repository.deploy_branch.clone());
    env.insert("COMMIT_SHA".to_string(), commit_sha.to_string());
    env.insert("SOURCE_TOKEN".to_string(), token.expose_secret().to_string());
    env.insert("REGISTRY".to_string(), registry.host.clone());
    env.insert(
        "IMAGE_URI".to_string(),
        format!("{}/{}:{}", registry.host, image_repository, tag),
    );
    env.insert("IMAGE_REPOSITORY".to_string(), image_repository);
    env.insert("IMAGE_TAG".to_string(), tag);

    if let Some(root) = repository
        .root_directory
        .as_deref()
        .filter(|root| !root.is_empty() && *root != "/")
    {
        env.insert("ROOT_DIRECTORY".to_string(), root.to_string());
    }
    if let Some(dockerfile) = repository
        .dockerfile_path
        .as_deref()
        .filter(|path| !path.is_empty())
    {
        env.insert("DOCKERFILE_PATH".to_string(), dockerfile.to_string());
    }

    for (name, value) in &repository.build_variables {
        env.insert(name.clone(), value.clone());
    }

    env
}
