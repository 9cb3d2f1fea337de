//! Source-control host over REST

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::backends::SourceControl;
use crate::errors::PlatformError;
use crate::http::client::{encode_segment, HttpClient};

pub struct RestSourceControl {
    http: HttpClient,
    /// Credential for the connection service that issues per-owner tokens
    token: SecretString,
}

impl RestSourceControl {
    pub fn new(http: HttpClient, token: SecretString) -> Self {
        Self { http, token }
    }
}

#[derive(Deserialize)]
struct ConnectionToken {
    access_token: SecretString,
}

#[derive(Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Deserialize)]
struct Branch {
    commit: BranchCommit,
}

#[async_trait]
impl SourceControl for RestSourceControl {
    async fn access_token(&self, owner_id: &str) -> Result<SecretString, PlatformError> {
        let path = format!("/connections/{}/token", encode_segment(owner_id));
        let connection: Option<ConnectionToken> =
            self.http.get_optional(&path, &self.token).await?;
        connection
            .map(|c| c.access_token)
            .ok_or_else(|| PlatformError::NotFound(format!("Source-control connection for {}", owner_id)))
    }

    async fn head_commit(
        &self,
        full_name: &str,
        branch: &str,
        token: &SecretString,
    ) -> Result<Option<String>, PlatformError> {
        // `owner/repo` keeps its slash
        let path = format!("/repos/{}/branches/{}", full_name, encode_segment(branch));
        let branch: Option<Branch> = self.http.get_optional(&path, token).await?;
        Ok(branch.map(|b| b.commit.sha))
    }
}
