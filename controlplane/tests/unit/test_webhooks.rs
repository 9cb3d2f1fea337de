//! Webhook intake unit tests

use berth::backends::BuildStatus;
use berth::errors::PlatformError;
use berth::models::deployment::{meta, DeploymentStatus};
use berth::persistence::Store;
use berth::webhook::service::WebhookOutcome;
use berth::webhook::signature;
use secrecy::SecretString;
use serde_json::json;
use tokio_test::assert_ok;

use crate::support::{job, Platform, REPO_FULL_NAME, WEBHOOK_SECRET};

fn push_body(full_name: &str, git_ref: &str, sha: &str) -> Vec<u8> {
    json!({
        "ref": git_ref,
        "after": sha,
        "repository": { "full_name": full_name },
        "head_commit": { "id": sha, "message": "Add checkout page" },
        "pusher": { "name": "octocat" }
    })
    .to_string()
    .into_bytes()
}

fn sign(body: &[u8]) -> String {
    signature::sign(&SecretString::from(WEBHOOK_SECRET.to_string()), body).unwrap()
}

async fn linked_platform() -> Platform {
    let platform = Platform::new();
    let container = platform.create_container("web").await;
    platform.link_repository(&container).await;
    platform
}

#[tokio::test]
async fn test_ping_is_answered() {
    let platform = Platform::new();
    let outcome = assert_ok!(platform.app.webhooks.handle(Some("ping"), None, b"{}").await);
    assert_eq!(outcome, WebhookOutcome::Pong);
}

#[tokio::test]
async fn test_other_events_are_ignored() {
    let platform = linked_platform().await;
    let outcome = platform
        .app
        .webhooks
        .handle(Some("issues"), None, b"not json")
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored(reason) if reason.contains("issues")));
}

#[tokio::test]
async fn test_signature_is_required() {
    let platform = linked_platform().await;
    let body = push_body(REPO_FULL_NAME, "refs/heads/main", "abcdef1234567890");
    let webhooks = &platform.app.webhooks;

    assert!(matches!(
        webhooks.handle(Some("push"), None, &body).await,
        Err(PlatformError::Unauthorized(_))
    ));
    assert!(matches!(
        webhooks.handle(Some("push"), Some("sha256=zz"), &body).await,
        Err(PlatformError::Unauthorized(_))
    ));

    let other = push_body(REPO_FULL_NAME, "refs/heads/main", "0123456789abcdef");
    assert!(matches!(
        webhooks.handle(Some("push"), Some(&sign(&other)), &body).await,
        Err(PlatformError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_unlinked_repository_is_ignored() {
    let platform = linked_platform().await;
    let body = push_body("octo/other", "refs/heads/main", "abcdef1234567890");

    let outcome = platform
        .app
        .webhooks
        .handle(Some("push"), None, &body)
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored(reason) if reason.contains("not linked")));
}

#[tokio::test]
async fn test_pushes_that_should_not_build() {
    let platform = linked_platform().await;
    let webhooks = &platform.app.webhooks;

    let body = push_body(REPO_FULL_NAME, "refs/heads/feature", "abcdef1234567890");
    let outcome = assert_ok!(webhooks.handle(Some("push"), Some(&sign(&body)), &body).await);
    assert!(matches!(outcome, WebhookOutcome::Ignored(reason) if reason.contains("deploy branch")));

    let body = push_body(
        REPO_FULL_NAME,
        "refs/heads/main",
        "0000000000000000000000000000000000000000",
    );
    let outcome = assert_ok!(webhooks.handle(Some("push"), Some(&sign(&body)), &body).await);
    assert!(matches!(outcome, WebhookOutcome::Ignored(reason) if reason.contains("deleted")));

    let mut repository = platform
        .store
        .repository_by_full_name(REPO_FULL_NAME)
        .await
        .unwrap()
        .unwrap();
    repository.auto_deploy = false;
    platform.store.put_repository(&repository).await.unwrap();
    let body = push_body(REPO_FULL_NAME, "refs/heads/main", "abcdef1234567890");
    let outcome = assert_ok!(webhooks.handle(Some("push"), Some(&sign(&body)), &body).await);
    assert!(matches!(outcome, WebhookOutcome::Ignored(reason) if reason.contains("Auto-deploy")));

    assert!(platform.builds.submitted().is_empty());
}

#[tokio::test]
async fn test_push_triggers_build() {
    let platform = linked_platform().await;
    platform
        .builds
        .script(vec![job(BuildStatus::Succeeded, Some("COMPLETED"))]);
    let body = push_body(REPO_FULL_NAME, "refs/heads/main", "fedcba9876543210");

    let outcome = platform
        .app
        .webhooks
        .handle(None, Some(&sign(&body)), &body)
        .await
        .unwrap();
    let WebhookOutcome::Triggered(deployment_id) = outcome else {
        panic!("expected a triggered build, got {:?}", outcome);
    };

    let deployment = platform.wait_terminal(&deployment_id).await;
    assert_eq!(deployment.status, DeploymentStatus::Completed);
    assert_eq!(deployment.meta(meta::TRIGGER), Some("webhook"));
    assert_eq!(deployment.meta(meta::COMMIT_SHA), Some("fedcba9876543210"));
    assert_eq!(deployment.meta(meta::COMMIT_MESSAGE), Some("Add checkout page"));
    assert_eq!(deployment.initiated_by.as_deref(), Some("octocat"));
    assert_eq!(deployment.new_image.as_deref().map(|image| image.ends_with(":fedcba9")), Some(true));
}

#[tokio::test]
async fn test_malformed_payload() {
    let platform = linked_platform().await;
    let result = platform
        .app
        .webhooks
        .handle(Some("push"), Some("sha256=00"), b"{\"ref\": 7}")
        .await;
    assert!(matches!(result, Err(PlatformError::Json(_))));
}
