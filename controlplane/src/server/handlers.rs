//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use api_models::events::StreamEvent;
use api_models::requests::{
    CreateContainerRequest, DeleteContainerQuery, HealthResponse, TriggerBuildResponse,
    UpdateContainerRequest, VersionResponse, WebhookResponse,
};
use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, Stream};
use tracing::{debug, error, info};

use crate::errors::PlatformError;
use crate::events::broadcaster::Subscription;
use crate::server::state::ServerState;
use crate::version::build_info;
use crate::webhook::service::WebhookOutcome;

pub const OWNER_HEADER: &str = "x-owner-id";
pub const EVENT_HEADER: &str = "x-github-event";
pub const EVENT_HEADER_FALLBACK: &str = "x-source-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Caller identity set by the upstream authentication layer
#[derive(Debug, Clone)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = PlatformError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Owner(value.to_string()))
            .ok_or_else(|| PlatformError::Unauthorized("Missing caller identity".to_string()))
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let build = build_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: build.service.to_string(),
        version: build.version.to_string(),
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let build = build_info();
    Json(VersionResponse {
        version: build.version.to_string(),
        commit: build.commit.to_string(),
        built_at: build.built_at.to_string(),
    })
}

// ================================ CONTAINERS ==================================== //

pub async fn create_container_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Json(request): Json<CreateContainerRequest>,
) -> Result<impl IntoResponse, PlatformError> {
    let container = state.containers.create(&owner_id, request).await?;
    Ok((StatusCode::CREATED, Json(container)))
}

pub async fn get_container_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(container_id): Path<String>,
) -> Result<impl IntoResponse, PlatformError> {
    let container = state.containers.get(&container_id, &owner_id).await?;
    Ok(Json(container))
}

pub async fn update_container_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(container_id): Path<String>,
    Json(request): Json<UpdateContainerRequest>,
) -> Result<impl IntoResponse, PlatformError> {
    let container = state
        .containers
        .update(&container_id, &owner_id, request)
        .await?;
    Ok(Json(container))
}

pub async fn deploy_container_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(container_id): Path<String>,
) -> Result<impl IntoResponse, PlatformError> {
    let container = state.containers.deploy(&container_id, &owner_id).await?;
    Ok(Json(container))
}

pub async fn stop_container_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(container_id): Path<String>,
) -> Result<impl IntoResponse, PlatformError> {
    let container = state.containers.stop(&container_id, &owner_id).await?;
    Ok(Json(container))
}

pub async fn delete_container_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(container_id): Path<String>,
    Query(query): Query<DeleteContainerQuery>,
) -> Result<impl IntoResponse, PlatformError> {
    state
        .containers
        .delete(&container_id, &owner_id, query.force)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Latest health verdict of a monitored container
pub async fn container_health_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(container_id): Path<String>,
) -> Result<impl IntoResponse, PlatformError> {
    state.containers.get(&container_id, &owner_id).await?;
    let status = state.health.health_status(&container_id).ok_or_else(|| {
        PlatformError::NotFound(format!("Health status of container {}", container_id))
    })?;
    Ok(Json(status))
}

// ================================ DEPLOYMENTS =================================== //

pub async fn trigger_build_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(repository_id): Path<String>,
) -> Result<impl IntoResponse, PlatformError> {
    let deployment = state
        .trigger
        .trigger_manual(&repository_id, &owner_id)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerBuildResponse {
            deployment_id: deployment.id,
            status: deployment.status.as_str().to_string(),
        }),
    ))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, PlatformError> {
    let deployment = state
        .reconciler
        .status(&deployment_id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("Deployment {}", deployment_id)))?;
    if deployment.owner_id != owner_id {
        return Err(PlatformError::Forbidden(format!(
            "Deployment {} belongs to another owner",
            deployment_id
        )));
    }
    Ok(Json(deployment))
}

/// Live deployment events.
///
/// The stream ends after a terminal status event, when the deployment is
/// already finished, or after the idle timeout without an event.
pub async fn deployment_events_handler(
    State(state): State<Arc<ServerState>>,
    Owner(owner_id): Owner,
    Path(deployment_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, PlatformError> {
    let subscription = state.events.subscribe(&deployment_id, &owner_id).await?;
    info!("Streaming events of deployment {} to {}", deployment_id, owner_id);

    let stream = event_stream(subscription, state.stream_idle_timeout);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    ))
}

pub fn event_stream(
    subscription: Subscription,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(subscription), move |subscription| async move {
        let mut subscription = subscription?;
        match tokio::time::timeout(idle_timeout, subscription.recv()).await {
            Ok(Some(event)) => {
                let next = if event.is_terminal() {
                    None
                } else {
                    Some(subscription)
                };
                Some((Ok(sse_event(&event)), next))
            }
            Ok(None) => None,
            Err(_) => {
                debug!(
                    "Event stream of deployment {} idle for {:?}, closing",
                    subscription.deployment_id(),
                    idle_timeout
                );
                None
            }
        }
    })
}

fn sse_event(event: &StreamEvent) -> Event {
    let data = match serde_json::to_string(event) {
        Ok(data) => data,
        Err(e) => {
            error!("Unable to encode {} event: {}", event.name(), e);
            "{}".to_string()
        }
    };
    Event::default().event(event.name()).data(data)
}

// ================================= WEBHOOKS ===================================== //

pub async fn source_webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, PlatformError> {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    let event = header(EVENT_HEADER).or_else(|| header(EVENT_HEADER_FALLBACK));
    let signature = header(SIGNATURE_HEADER);

    let outcome = state.webhooks.handle(event, signature, &body).await?;
    let response = match outcome {
        WebhookOutcome::Pong => (
            StatusCode::OK,
            WebhookResponse {
                status: "pong".to_string(),
                deployment_id: None,
                reason: None,
            },
        ),
        WebhookOutcome::Ignored(reason) => (
            StatusCode::OK,
            WebhookResponse {
                status: "ignored".to_string(),
                deployment_id: None,
                reason: Some(reason),
            },
        ),
        WebhookOutcome::Triggered(deployment_id) => (
            StatusCode::ACCEPTED,
            WebhookResponse {
                status: "triggered".to_string(),
                deployment_id: Some(deployment_id),
                reason: None,
            },
        ),
    };
    Ok((response.0, Json(response.1)))
}
