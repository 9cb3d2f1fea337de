//! Linked source repository model

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// A source repository linked to a container for builds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedRepository {
    pub id: String,
    pub owner_id: String,
    pub container_id: String,

    /// `owner/repo` as known to the source-control host
    pub full_name: String,
    pub deploy_branch: String,

    #[serde(default)]
    pub root_directory: Option<String>,
    #[serde(default)]
    pub dockerfile_path: Option<String>,
    #[serde(default)]
    pub build_variables: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub auto_deploy: bool,

    /// Shared secret for push notification signatures
    #[serde(default, skip_serializing)]
    pub webhook_secret: Option<SecretString>,

    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_deployed_commit: Option<String>,
    #[serde(default)]
    pub last_deployed_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}
