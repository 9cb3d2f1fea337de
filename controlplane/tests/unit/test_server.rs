//! HTTP API unit tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use berth::models::deployment::{Deployment, DeploymentType};
use berth::persistence::Store;
use berth::server::handlers::{EVENT_HEADER, OWNER_HEADER, SIGNATURE_HEADER};
use berth::server::serve::build_router;
use berth::server::state::ServerState;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::support::{Platform, OTHER_OWNER, OWNER};

fn router(platform: &Platform) -> Router {
    let state = ServerState::new(&platform.app, Duration::from_secs(5));
    build_router(Arc::new(state))
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    owner: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Bytes) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        request = request.header(OWNER_HEADER, owner);
    }
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes)
}

fn json_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let platform = Platform::new();
    let (status, body) = send(&router(&platform), Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "berth");
}

#[tokio::test]
async fn test_container_lifecycle_over_http() {
    let platform = Platform::new();
    let router = router(&platform);

    let request = json!({ "name": "web", "image": "nginx:1.27" });
    let (status, body) = send(&router, Method::POST, "/containers", None, Some(request.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["error"], "unauthorized");

    let (status, body) = send(&router, Method::POST, "/containers", Some(OWNER), Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);
    let created = json_body(&body);
    assert_eq!(created["status"], "CREATING");
    assert_eq!(created["image_tag"], "1.27");
    let id = created["id"].as_str().unwrap().to_string();

    let uri = format!("/containers/{}", id);
    let (status, body) = send(&router, Method::GET, &uri, Some(OTHER_OWNER), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json_body(&body)["error"], "forbidden");

    let (status, body) = send(
        &router,
        Method::PATCH,
        &uri,
        Some(OWNER),
        Some(json!({ "cpu": 512 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["cpu"], 512);

    let (status, body) = send(&router, Method::POST, &format!("{}/deploy", uri), Some(OWNER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "RUNNING");

    let (status, body) = send(&router, Method::POST, &format!("{}/deploy", uri), Some(OWNER), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_body(&body)["error"], "invalid_transition");

    let (status, _) = send(&router, Method::GET, &format!("{}/health", uri), Some(OWNER), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &router,
        Method::DELETE,
        &format!("{}?force=true", uri),
        Some(OWNER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&router, Method::GET, &uri, Some(OWNER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"], "not_found");
}

#[tokio::test]
async fn test_invalid_container_request() {
    let platform = Platform::new();
    let request = json!({ "name": "web", "image": "nginx", "memory": 128 });

    let (status, body) = send(&router(&platform), Method::POST, "/containers", Some(OWNER), Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "validation");
}

#[tokio::test]
async fn test_deployment_lookup() {
    let platform = Platform::new();
    let router = router(&platform);
    let (_, deployment) = platform.running_container("web").await;
    let uri = format!("/deployments/{}", deployment.id);

    let (status, body) = send(&router, Method::GET, &uri, Some(OWNER), None).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["id"], deployment.id.as_str());
    assert_eq!(body["status"], "IN_PROGRESS");

    let (status, _) = send(&router, Method::GET, &uri, Some(OTHER_OWNER), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&router, Method::GET, "/deployments/missing", Some(OWNER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trigger_build_accepted() {
    let platform = Platform::new();
    let container = platform.create_container("web").await;
    let repository = platform.link_repository(&container).await;

    let (status, body) = send(
        &router(&platform),
        Method::POST,
        &format!("/repositories/{}/builds", repository.id),
        Some(OWNER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body = json_body(&body);
    assert_eq!(body["status"], "PENDING");
    let deployment_id = body["deployment_id"].as_str().unwrap();
    assert!(platform.store.get_deployment(deployment_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_webhook_ping() {
    let platform = Platform::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/source")
        .header(EVENT_HEADER, "ping")
        .header(SIGNATURE_HEADER, "sha256=00")
        .body(Body::from("{}"))
        .unwrap();

    let response = router(&platform).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(json_body(&body), json!({ "status": "pong" }));
}

#[tokio::test]
async fn test_webhook_bad_signature() {
    let platform = Platform::new();
    let container = platform.create_container("web").await;
    platform.link_repository(&container).await;
    let body = json!({
        "ref": "refs/heads/main",
        "after": "abcdef1234567890",
        "repository": { "full_name": "octo/app" }
    });

    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/source")
        .header(EVENT_HEADER, "push")
        .header(SIGNATURE_HEADER, "sha256=00")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router(&platform).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_event_stream_of_finished_deployment() {
    let platform = Platform::new();
    let container = platform.create_container("web").await;
    let mut deployment = Deployment::new(&container.id, OWNER, DeploymentType::Initial);
    deployment.start();
    deployment.complete();
    platform.store.put_deployment(&deployment).await.unwrap();

    let (status, body) = send(
        &router(&platform),
        Method::GET,
        &format!("/deployments/{}/events", deployment.id),
        Some(OWNER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body.to_vec()).unwrap().replace("event: ", "event:");
    let init = text.find("event:init").unwrap();
    let done = text.find("event:status").unwrap();
    assert!(init < done);
    assert!(text.contains("\"status\":\"COMPLETED\""));
}

#[tokio::test]
async fn test_event_stream_requires_owner() {
    let platform = Platform::new();
    let (_, deployment) = platform.running_container("web").await;
    let uri = format!("/deployments/{}/events", deployment.id);

    let (status, _) = send(&router(&platform), Method::GET, &uri, Some(OTHER_OWNER), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&router(&platform), Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
