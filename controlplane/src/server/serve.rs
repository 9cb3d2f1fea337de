//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::PlatformError;
use crate::server::handlers::{
    container_health_handler, create_container_handler, delete_container_handler,
    deploy_container_handler, deployment_events_handler, get_container_handler,
    get_deployment_handler, health_handler, source_webhook_handler, stop_container_handler,
    trigger_build_handler, update_container_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the control plane API
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Containers
        .route("/containers", post(create_container_handler))
        .route(
            "/containers/{id}",
            get(get_container_handler)
                .patch(update_container_handler)
                .delete(delete_container_handler),
        )
        .route("/containers/{id}/deploy", post(deploy_container_handler))
        .route("/containers/{id}/stop", post(stop_container_handler))
        .route("/containers/{id}/health", get(container_health_handler))
        // Builds and deployments
        .route("/repositories/{id}/builds", post(trigger_build_handler))
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/deployments/{id}/events", get(deployment_events_handler))
        // Webhooks
        .route("/webhooks/source", post(source_webhook_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PlatformError>>, PlatformError> {
    let app = build_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| PlatformError::Server(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PlatformError::Server(e.to_string()))
    });

    Ok(handle)
}
