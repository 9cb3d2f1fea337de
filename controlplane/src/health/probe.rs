//! HTTP health probes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::errors::PlatformError;
use crate::models::container::Container;
use crate::version::user_agent;

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, container: &Container, path: &str, timeout: Duration) -> ProbeOutcome;
}

/// Server errors are unhealthy. Client errors still prove the process is up.
pub fn classify(status: StatusCode) -> ProbeOutcome {
    if status.is_server_error() {
        ProbeOutcome::unhealthy(format!("HTTP {}", status.as_u16()))
    } else {
        ProbeOutcome::healthy()
    }
}

/// Probes `<scheme>://<subdomain>.<domain><path>`
pub struct HttpProbe {
    client: reqwest::Client,
    scheme: String,
    domain: String,
}

impl HttpProbe {
    pub fn new(scheme: &str, domain: &str) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent())
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;
        Ok(Self {
            client,
            scheme: scheme.to_string(),
            domain: domain.trim_start_matches('.').to_string(),
        })
    }

    pub fn url(&self, container: &Container, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        format!("{}://{}.{}{}", self.scheme, container.subdomain, self.domain, path)
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, container: &Container, path: &str, timeout: Duration) -> ProbeOutcome {
        let url = self.url(container, path);
        debug!("Probing {}", url);

        match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) => classify(response.status()),
            Err(e) if e.is_timeout() => ProbeOutcome::unhealthy("Health check timed out"),
            Err(e) => ProbeOutcome::unhealthy(format!("Health check failed: {}", e)),
        }
    }
}
