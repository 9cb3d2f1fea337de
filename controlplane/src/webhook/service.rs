//! Source-control webhook intake

use std::sync::Arc;

use api_models::webhook::PushPayload;
use tracing::{debug, info, warn};

use crate::build::trigger::BuildTrigger;
use crate::errors::PlatformError;
use crate::persistence::Store;
use crate::webhook::signature;

pub const EVENT_PING: &str = "ping";
pub const EVENT_PUSH: &str = "push";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Pong,
    Ignored(String),
    Triggered(String),
}

pub struct WebhookService {
    store: Arc<dyn Store>,
    trigger: Arc<BuildTrigger>,
}

impl WebhookService {
    pub fn new(store: Arc<dyn Store>, trigger: Arc<BuildTrigger>) -> Self {
        Self { store, trigger }
    }

    /// Handle one delivery. Only a bad signature or payload is an error;
    /// anything that should not build is ignored.
    pub async fn handle(
        &self,
        event: Option<&str>,
        signature_header: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, PlatformError> {
        match event {
            Some(EVENT_PING) => return Ok(WebhookOutcome::Pong),
            Some(EVENT_PUSH) | None => {}
            Some(other) => {
                debug!("Ignoring webhook event {}", other);
                return Ok(ignored(format!("Event {} not handled", other)));
            }
        }

        let payload: PushPayload = serde_json::from_slice(body)?;
        let full_name = payload.repository.full_name.as_str();

        let Some(repository) = self.store.repository_by_full_name(full_name).await? else {
            debug!("Push to unlinked repository {}", full_name);
            return Ok(ignored(format!("Repository {} is not linked", full_name)));
        };

        let secret = repository.webhook_secret.as_ref().ok_or_else(|| {
            PlatformError::Unauthorized(format!("No webhook secret for {}", full_name))
        })?;
        if let Err(e) = signature::verify(secret, body, signature_header) {
            warn!("Rejected webhook for repository {}: {}", repository.id, e);
            return Err(e);
        }

        if payload.is_branch_delete() {
            return Ok(ignored(format!("Branch {} deleted", payload.branch())));
        }
        if payload.branch() != repository.deploy_branch {
            return Ok(ignored(format!(
                "Push to {} does not match deploy branch {}",
                payload.branch(),
                repository.deploy_branch
            )));
        }
        if !repository.auto_deploy {
            return Ok(ignored(format!("Auto-deploy disabled for {}", full_name)));
        }

        let deployment = self
            .trigger
            .trigger_webhook(
                &repository,
                payload.commit_sha(),
                payload.commit_message().unwrap_or("Push"),
                payload.pusher_name().unwrap_or("webhook"),
            )
            .await?;
        info!(
            "Push to {}@{} triggered deployment {}",
            full_name,
            payload.branch(),
            deployment.id
        );
        Ok(WebhookOutcome::Triggered(deployment.id))
    }
}

fn ignored(reason: String) -> WebhookOutcome {
    debug!("Webhook ignored: {}", reason);
    WebhookOutcome::Ignored(reason)
}
