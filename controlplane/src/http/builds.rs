//! Build backend over REST

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::backends::{BuildBackend, BuildJob};
use crate::errors::PlatformError;
use crate::http::client::{encode_segment, HttpClient};

pub struct RestBuilds {
    http: HttpClient,
    token: SecretString,
    project: String,
}

impl RestBuilds {
    pub fn new(http: HttpClient, token: SecretString, project: &str) -> Self {
        Self {
            http,
            token,
            project: encode_segment(project),
        }
    }
}

#[derive(Serialize)]
struct EnvironmentVariable<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct StartBuildRequest<'a> {
    environment: Vec<EnvironmentVariable<'a>>,
}

#[derive(Deserialize)]
struct StartBuildResponse {
    id: String,
}

#[async_trait]
impl BuildBackend for RestBuilds {
    async fn submit_job(&self, env: &BTreeMap<String, String>) -> Result<String, PlatformError> {
        let path = format!("/projects/{}/builds", self.project);
        let body = StartBuildRequest {
            environment: env
                .iter()
                .map(|(name, value)| EnvironmentVariable { name, value })
                .collect(),
        };
        let response: StartBuildResponse = self.http.post(&path, &self.token, &body).await?;
        Ok(response.id)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<BuildJob>, PlatformError> {
        let path = format!("/builds/{}", encode_segment(job_id));
        self.http.get_optional(&path, &self.token).await
    }
}
