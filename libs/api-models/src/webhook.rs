//! Source-control push notification payload

use serde::{Deserialize, Serialize};

/// Head commit id sent when a branch is deleted
pub const NULL_COMMIT: &str = "0000000000000000000000000000000000000000";

/// Push event body as delivered by the source-control host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub after: String,
    pub repository: PushRepository,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
    #[serde(default)]
    pub pusher: Option<Pusher>,
}

impl PushPayload {
    /// Branch name with the `refs/heads/` prefix removed
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }

    /// Head commit id, preferring the `head_commit` object over `after`
    pub fn commit_sha(&self) -> &str {
        self.head_commit
            .as_ref()
            .map(|commit| commit.id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.after)
    }

    pub fn commit_message(&self) -> Option<&str> {
        self.head_commit.as_ref().map(|commit| commit.message.as_str())
    }

    pub fn pusher_name(&self) -> Option<&str> {
        self.pusher.as_ref().map(|pusher| pusher.name.as_str())
    }

    /// A push whose head is the null commit deletes the branch
    pub fn is_branch_delete(&self) -> bool {
        let sha = self.commit_sha();
        sha.is_empty() || sha == NULL_COMMIT
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRepository {
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadCommit {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pusher {
    pub name: String,
}
