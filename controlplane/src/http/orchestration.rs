//! Orchestration backend over REST

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;
use crate::http::client::{encode_segment, HttpClient};
use crate::orchestration::{
    OrchestrationBackend, ServiceDescription, ServiceSpec, ServiceUpdate, TaskSpec, TaskState,
};

pub struct RestOrchestration {
    http: HttpClient,
    token: SecretString,
    cluster: String,
}

impl RestOrchestration {
    pub fn new(http: HttpClient, token: SecretString, cluster: &str) -> Self {
        Self {
            http,
            token,
            cluster: encode_segment(cluster),
        }
    }

    fn service_path(&self, service: &str) -> String {
        format!("/clusters/{}/services/{}", self.cluster, encode_segment(service))
    }
}

#[derive(Deserialize)]
struct TaskDefinitionResponse {
    task_definition_ref: String,
}

#[derive(Deserialize)]
struct ServiceRefResponse {
    service_ref: String,
}

#[derive(Serialize)]
struct DescribeTasksRequest<'a> {
    task_refs: &'a [String],
}

#[derive(Deserialize)]
struct DescribeTasksResponse {
    tasks: Vec<TaskState>,
}

#[async_trait]
impl OrchestrationBackend for RestOrchestration {
    async fn register_task_definition(&self, spec: &TaskSpec) -> Result<String, PlatformError> {
        let path = format!("/clusters/{}/task-definitions", self.cluster);
        let response: TaskDefinitionResponse = self.http.post(&path, &self.token, spec).await?;
        Ok(response.task_definition_ref)
    }

    async fn describe_service(
        &self,
        service: &str,
    ) -> Result<Option<ServiceDescription>, PlatformError> {
        self.http
            .get_optional(&self.service_path(service), &self.token)
            .await
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, PlatformError> {
        let path = format!("/clusters/{}/services", self.cluster);
        let response: ServiceRefResponse = self.http.post(&path, &self.token, spec).await?;
        Ok(response.service_ref)
    }

    async fn update_service(
        &self,
        service_ref: &str,
        update: &ServiceUpdate,
    ) -> Result<String, PlatformError> {
        let response: ServiceRefResponse = self
            .http
            .patch(&self.service_path(service_ref), &self.token, update)
            .await?;
        Ok(response.service_ref)
    }

    async fn describe_tasks(&self, task_refs: &[String]) -> Result<Vec<TaskState>, PlatformError> {
        let path = format!("/clusters/{}/tasks/describe", self.cluster);
        let response: DescribeTasksResponse = self
            .http
            .post(&path, &self.token, &DescribeTasksRequest { task_refs })
            .await?;
        Ok(response.tasks)
    }

    async fn delete_service(&self, service_ref: &str, force: bool) -> Result<(), PlatformError> {
        let path = format!("{}?force={}", self.service_path(service_ref), force);
        self.http.delete(&path, &self.token).await
    }
}
