//! Container service unit tests

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use api_models::requests::UpdateContainerRequest;
use berth::errors::PlatformError;
use berth::models::container::ContainerStatus;
use berth::models::deployment::{meta, DeploymentStatus, DeploymentType, StepStatus};
use berth::persistence::Store;

use crate::support::{create_request, Platform, OTHER_OWNER, OWNER};

#[tokio::test]
async fn test_create_applies_defaults() {
    let platform = Platform::new();
    let container = platform.create_container("web-app").await;

    assert_eq!(container.status, ContainerStatus::Creating);
    assert_eq!(container.image, "nginx");
    assert_eq!(container.image_tag, "latest");
    assert_eq!(container.subdomain, "web-app");
    assert_eq!(container.cpu, 256);
    assert_eq!(container.memory, 512);
    assert_eq!(container.port, 80);
    assert_eq!(container.environment.get("PORT").map(String::as_str), Some("80"));
    assert_eq!(container.health_check.path.as_deref(), Some("/health"));
    assert_eq!(platform.container_count(OWNER).await, 1);
}

#[tokio::test]
async fn test_create_splits_image_tag() {
    let platform = Platform::new();
    let container = platform
        .app
        .containers
        .create(OWNER, create_request("api", "ghcr.io/org/api:1.4.0"))
        .await
        .unwrap();

    assert_eq!(container.image, "ghcr.io/org/api");
    assert_eq!(container.image_tag, "1.4.0");
    assert_eq!(container.port, 8080);
}

#[tokio::test]
async fn test_create_enforces_plan_limit() {
    let platform = Platform::new();
    let containers = &platform.app.containers;

    containers
        .create(OTHER_OWNER, create_request("first", "nginx"))
        .await
        .unwrap();
    let result = containers
        .create(OTHER_OWNER, create_request("second", "nginx"))
        .await;

    match result {
        Err(PlatformError::LimitReached(message)) => assert!(message.contains("FREE")),
        other => panic!("expected limit error, got {:?}", other),
    }
    assert_eq!(platform.container_count(OTHER_OWNER).await, 1);
}

#[tokio::test]
async fn test_create_rejects_taken_subdomain() {
    let platform = Platform::new();
    platform.create_container("shop").await;

    let result = platform
        .app
        .containers
        .create(OWNER, create_request("shop", "nginx"))
        .await;
    assert!(matches!(result, Err(PlatformError::Conflict(_))));
}

#[tokio::test]
async fn test_create_validates_input() {
    let platform = Platform::new();
    let containers = &platform.app.containers;

    let mut request = create_request("worker", "nginx");
    request.cpu = Some(300);
    assert!(matches!(
        containers.create(OWNER, request).await,
        Err(PlatformError::Validation(_))
    ));

    assert!(matches!(
        containers.create(OWNER, create_request("Bad Name", "nginx")).await,
        Err(PlatformError::Validation(_))
    ));

    assert!(matches!(
        containers.create(OWNER, create_request("worker", "a//b")).await,
        Err(PlatformError::Validation(_))
    ));
    assert_eq!(platform.container_count(OWNER).await, 0);
}

#[tokio::test]
async fn test_deploy_runs_container() {
    let platform = Platform::new();
    let (container, deployment) = platform.running_container("web").await;

    assert_eq!(container.status, ContainerStatus::Running);
    assert_eq!(container.deployment_count, 1);
    assert!(container.last_deployed_at.is_some());
    let service_ref = container.service_ref.clone().unwrap();
    assert_eq!(service_ref, format!("svc/service-{}", container.id));
    assert_eq!(container.task_ref.as_deref(), Some(format!("task/service-{}", container.id).as_str()));

    // The rollout is completed later by the reconciler
    assert_eq!(deployment.status, DeploymentStatus::InProgress);
    assert_eq!(deployment.deployment_type, DeploymentType::Initial);
    assert_eq!(deployment.meta(meta::SERVICE_REF), Some(service_ref.as_str()));
    assert_eq!(deployment.meta(meta::TRIGGER), Some("manual"));
    assert_eq!(deployment.new_image.as_deref(), Some("nginx:latest"));
    assert_eq!(deployment.current_step().map(|step| step.name.as_str()), Some("DEPLOYING"));

    let specs = platform.orchestration.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].family, format!("container-{}", container.id));
    assert_eq!(specs[0].environment.get("HOST").map(String::as_str), Some("0.0.0.0"));
    assert!(platform.app.health.is_monitoring(&container.id));
}

#[tokio::test]
async fn test_deploy_rejected_while_running() {
    let platform = Platform::new();
    let (container, _) = platform.running_container("web").await;

    let result = platform.app.containers.deploy(&container.id, OWNER).await;
    assert!(matches!(result, Err(PlatformError::InvalidTransition(_))));
    assert_eq!(
        platform.container(&container.id).await.unwrap().status,
        ContainerStatus::Running
    );
}

#[tokio::test]
async fn test_deploy_failure_marks_failed() {
    let platform = Platform::new();
    let container = platform.create_container("web").await;
    platform.orchestration.fail_register.store(true, Ordering::SeqCst);

    let result = platform.app.containers.deploy(&container.id, OWNER).await;
    assert!(matches!(result, Err(PlatformError::Backend { .. })));

    let container = platform.container(&container.id).await.unwrap();
    assert_eq!(container.status, ContainerStatus::Failed);
    assert!(!platform.app.health.is_monitoring(&container.id));

    let deployment = platform
        .store
        .latest_deployment(&container.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(
        deployment.error_message.as_deref(),
        Some("Deployment failed: task definition rejected")
    );
    assert!(deployment
        .steps
        .iter()
        .any(|step| step.name == "DEPLOYING" && step.status == StepStatus::Failed));

    // A failed container may be deployed again
    platform.orchestration.fail_register.store(false, Ordering::SeqCst);
    let container = platform.app.containers.deploy(&container.id, OWNER).await.unwrap();
    assert_eq!(container.status, ContainerStatus::Running);
}

#[tokio::test]
async fn test_redeploy_updates_service() {
    let platform = Platform::new();
    let (container, _) = platform.running_container("web").await;
    let service_ref = container.service_ref.clone().unwrap();

    platform.app.containers.stop(&container.id, OWNER).await.unwrap();
    let container = platform.app.containers.deploy(&container.id, OWNER).await.unwrap();

    assert_eq!(container.deployment_count, 2);
    assert_eq!(container.service_ref.as_deref(), Some(service_ref.as_str()));
    let updates = platform.orchestration.updates();
    let last = &updates.last().unwrap().1;
    assert!(last.force_new_deployment);
    assert_eq!(last.desired_count, Some(1));

    let deployment = platform
        .store
        .latest_deployment(&container.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployment.deployment_type, DeploymentType::Update);
    assert_eq!(deployment.previous_image.as_deref(), Some("nginx:latest"));
}

#[tokio::test]
async fn test_stop_scales_to_zero() {
    let platform = Platform::new();
    let (container, _) = platform.running_container("web").await;

    let stopped = platform.app.containers.stop(&container.id, OWNER).await.unwrap();
    assert_eq!(stopped.status, ContainerStatus::Stopped);
    assert!(!platform.app.health.is_monitoring(&container.id));

    let service = platform
        .orchestration
        .service(container.service_ref.as_deref().unwrap())
        .unwrap();
    assert_eq!(service.desired_count, 0);

    let result = platform.app.containers.stop(&container.id, OWNER).await;
    assert!(matches!(result, Err(PlatformError::InvalidTransition(_))));
}

#[tokio::test]
async fn test_delete_stops_running_container() {
    let platform = Platform::new();
    let (container, _) = platform.running_container("web").await;
    let service_ref = container.service_ref.clone().unwrap();

    platform
        .app
        .containers
        .delete(&container.id, OWNER, false)
        .await
        .unwrap();

    assert!(platform.container(&container.id).await.is_none());
    assert_eq!(platform.orchestration.deleted(), vec![service_ref]);
    assert_eq!(platform.container_count(OWNER).await, 0);
    assert!(!platform.app.health.is_monitoring(&container.id));
}

#[tokio::test]
async fn test_delete_never_deployed() {
    let platform = Platform::new();
    let container = platform.create_container("web").await;

    // CREATING is not deletable until it fails or stops
    let result = platform.app.containers.delete(&container.id, OWNER, true).await;
    assert!(matches!(result, Err(PlatformError::InvalidTransition(_))));
    assert_eq!(platform.container_count(OWNER).await, 1);
}

#[tokio::test]
async fn test_other_owner_is_forbidden() {
    let platform = Platform::new();
    let container = platform.create_container("web").await;
    let containers = &platform.app.containers;

    assert!(matches!(
        containers.get(&container.id, OTHER_OWNER).await,
        Err(PlatformError::Forbidden(_))
    ));
    assert!(matches!(
        containers.deploy(&container.id, OTHER_OWNER).await,
        Err(PlatformError::Forbidden(_))
    ));
    assert!(matches!(
        containers.delete(&container.id, OTHER_OWNER, true).await,
        Err(PlatformError::Forbidden(_))
    ));
    assert!(matches!(
        containers.get("missing", OWNER).await,
        Err(PlatformError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_update_merges_environment() {
    let platform = Platform::new();
    let container = platform.create_container("web").await;

    let mut environment = BTreeMap::new();
    environment.insert("RUST_LOG".to_string(), "debug".to_string());
    environment.insert("PORT".to_string(), "9999".to_string());
    let updated = platform
        .app
        .containers
        .update(
            &container.id,
            OWNER,
            UpdateContainerRequest {
                cpu: Some(512),
                memory: Some(1024),
                environment: Some(environment),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.cpu, 512);
    assert_eq!(updated.memory, 1024);
    assert_eq!(updated.environment.get("RUST_LOG").map(String::as_str), Some("debug"));
    assert_eq!(updated.environment.get("PORT").map(String::as_str), Some("80"));

    let result = platform
        .app
        .containers
        .update(
            &container.id,
            OWNER,
            UpdateContainerRequest {
                memory: Some(100),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(PlatformError::Validation(_))));
}
