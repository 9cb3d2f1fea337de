//! Event broadcaster unit tests

use std::time::Duration;

use api_models::events::StreamEvent;
use berth::backends::BuildStatus;
use berth::errors::PlatformError;
use berth::events::broadcaster::Subscription;
use berth::models::deployment::{meta, Deployment, DeploymentStatus, DeploymentType};
use berth::persistence::Store;

use crate::support::{eventually, job, test_options, Platform, OTHER_OWNER, OWNER};

async fn pending_deployment(platform: &Platform) -> Deployment {
    let container = platform.create_container("web").await;
    let mut deployment = Deployment::new(&container.id, OWNER, DeploymentType::Initial);
    deployment.set_meta(meta::COMMIT_SHA, "abcdef1234567890");
    deployment.set_meta(meta::COMMIT_MESSAGE, "Fix the header");
    platform.store.put_deployment(&deployment).await.unwrap();
    deployment
}

async fn next(subscription: &mut Subscription) -> Option<StreamEvent> {
    tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("event within timeout")
}

#[tokio::test]
async fn test_init_event_comes_first() {
    let platform = Platform::new();
    let deployment = pending_deployment(&platform).await;
    platform
        .app
        .recorder
        .open_step(&deployment.id, "QUEUED", "Build submitted to queue")
        .await
        .unwrap();

    let events = &platform.app.events;
    let mut subscription = events.subscribe(&deployment.id, OWNER).await.unwrap();
    assert_eq!(subscription.deployment_id(), deployment.id);

    match next(&mut subscription).await {
        Some(StreamEvent::Init(init)) => {
            assert_eq!(init.deployment_id, deployment.id);
            assert_eq!(init.status, "PENDING");
            assert_eq!(init.commit_sha.as_deref(), Some("abcdef1234567890"));
            assert_eq!(init.commit_message.as_deref(), Some("Fix the header"));
            assert_eq!(init.steps.len(), 1);
            assert_eq!(init.steps[0].step_name, "QUEUED");
            assert_eq!(init.steps[0].status, "IN_PROGRESS");
        }
        other => panic!("expected init event, got {:?}", other),
    }
    assert_eq!(events.subscriber_count(&deployment.id), 1);
    assert!(events.has_poller(&deployment.id));
}

#[tokio::test]
async fn test_steps_then_terminal_status_close_the_stream() {
    let platform = Platform::new();
    let deployment = pending_deployment(&platform).await;
    let events = &platform.app.events;
    let recorder = &platform.app.recorder;

    let mut first = events.subscribe(&deployment.id, OWNER).await.unwrap();
    let mut second = events.subscribe(&deployment.id, OWNER).await.unwrap();
    assert!(matches!(next(&mut first).await, Some(StreamEvent::Init(_))));
    assert!(matches!(next(&mut second).await, Some(StreamEvent::Init(_))));
    assert_eq!(events.subscriber_count(&deployment.id), 2);

    recorder
        .open_step(&deployment.id, "BUILDING", "Building image")
        .await
        .unwrap();
    recorder.log(&deployment.id, "Step 1/4 : FROM node:20");
    recorder
        .complete(&deployment.id, "Deployment completed successfully")
        .await
        .unwrap();

    for subscription in [&mut first, &mut second] {
        match next(subscription).await {
            Some(StreamEvent::Step(step)) => {
                assert_eq!(step.step_name, "BUILDING");
                assert_eq!(step.status, "IN_PROGRESS");
                assert_eq!(step.message, "Building image");
            }
            other => panic!("expected step event, got {:?}", other),
        }
        match next(subscription).await {
            Some(StreamEvent::Log(log)) => assert_eq!(log.message, "Step 1/4 : FROM node:20"),
            other => panic!("expected log event, got {:?}", other),
        }
        match next(subscription).await {
            Some(StreamEvent::Step(step)) => assert_eq!(step.status, "COMPLETED"),
            other => panic!("expected step event, got {:?}", other),
        }
        match next(subscription).await {
            Some(StreamEvent::Status(status)) => {
                assert_eq!(status.status, "COMPLETED");
                assert_eq!(status.message, "Deployment completed successfully");
            }
            other => panic!("expected status event, got {:?}", other),
        }
        assert!(next(subscription).await.is_none());
    }

    assert_eq!(events.subscriber_count(&deployment.id), 0);
    assert!(!events.has_poller(&deployment.id));
}

#[tokio::test]
async fn test_finished_deployment_replays_outcome() {
    let platform = Platform::new();
    let mut deployment = pending_deployment(&platform).await;
    deployment.start();
    deployment.fail("Build failed: FAILED");
    platform.store.put_deployment(&deployment).await.unwrap();

    let events = &platform.app.events;
    let mut subscription = events.subscribe(&deployment.id, OWNER).await.unwrap();

    assert!(matches!(next(&mut subscription).await, Some(StreamEvent::Init(_))));
    match next(&mut subscription).await {
        Some(StreamEvent::Status(status)) => {
            assert_eq!(status.status, "FAILED");
            assert_eq!(status.message, "Build failed: FAILED");
        }
        other => panic!("expected status event, got {:?}", other),
    }
    assert!(next(&mut subscription).await.is_none());
    assert_eq!(events.subscriber_count(&deployment.id), 0);
    assert!(!events.has_poller(&deployment.id));
}

#[tokio::test]
async fn test_subscribe_checks_deployment() {
    let platform = Platform::new();
    let deployment = pending_deployment(&platform).await;
    let events = &platform.app.events;

    assert!(matches!(
        events.subscribe(&deployment.id, OTHER_OWNER).await,
        Err(PlatformError::Forbidden(_))
    ));
    assert!(matches!(
        events.subscribe("missing", OWNER).await,
        Err(PlatformError::NotFound(_))
    ));
    assert_eq!(events.subscriber_count(&deployment.id), 0);
}

#[tokio::test]
async fn test_dropping_last_subscription_cancels_poller() {
    let platform = Platform::new();
    let deployment = pending_deployment(&platform).await;
    let events = &platform.app.events;

    let first = events.subscribe(&deployment.id, OWNER).await.unwrap();
    let second = events.subscribe(&deployment.id, OWNER).await.unwrap();

    drop(first);
    assert_eq!(events.subscriber_count(&deployment.id), 1);
    assert!(events.has_poller(&deployment.id));

    drop(second);
    assert_eq!(events.subscriber_count(&deployment.id), 0);
    assert!(!events.has_poller(&deployment.id));
}

#[tokio::test]
async fn test_poller_follows_build_backend() {
    let mut options = test_options();
    options.events.poll_interval = Duration::from_millis(10);
    let platform = Platform::with_options(options);
    let mut deployment = pending_deployment(&platform).await;
    deployment.start();
    deployment.set_meta(meta::BUILD_JOB_ID, "build-1");
    platform.store.put_deployment(&deployment).await.unwrap();
    platform
        .builds
        .script(vec![job(BuildStatus::InProgress, Some("BUILD"))]);

    let events = &platform.app.events;
    let mut subscription = events.subscribe(&deployment.id, OWNER).await.unwrap();
    assert!(matches!(next(&mut subscription).await, Some(StreamEvent::Init(_))));

    // One event per step, however many polls see it
    match next(&mut subscription).await {
        Some(StreamEvent::Step(step)) => {
            assert_eq!(step.step_name, "BUILDING");
            assert_eq!(step.status, "IN_PROGRESS");
            assert_eq!(step.message, "Building image");
        }
        other => panic!("expected step event, got {:?}", other),
    }

    // The record finishing elsewhere ends the stream
    deployment.fail("Build timed out");
    platform.store.put_deployment(&deployment).await.unwrap();
    match next(&mut subscription).await {
        Some(StreamEvent::Status(status)) => {
            assert_eq!(status.status, "FAILED");
            assert_eq!(status.message, "Build timed out");
        }
        other => panic!("expected status event, got {:?}", other),
    }
    assert!(next(&mut subscription).await.is_none());

    let id = deployment.id.clone();
    let events = events.clone();
    eventually(|| {
        let events = events.clone();
        let id = id.clone();
        async move { !events.has_poller(&id) }
    })
    .await;
    assert_eq!(
        platform.deployment(&deployment.id).await.status,
        DeploymentStatus::Failed
    );
}

#[tokio::test]
async fn test_poller_reports_build_failure_reason() {
    let mut options = test_options();
    options.events.poll_interval = Duration::from_millis(10);
    let platform = Platform::with_options(options);
    let mut deployment = pending_deployment(&platform).await;
    deployment.start();
    deployment.set_meta(meta::BUILD_JOB_ID, "build-1");
    platform.store.put_deployment(&deployment).await.unwrap();
    let mut failed = job(BuildStatus::Failed, Some("BUILD"));
    failed.phase_context = Some("npm ERR! missing script: build".to_string());
    platform.builds.script(vec![failed]);

    let mut subscription = platform
        .app
        .events
        .subscribe(&deployment.id, OWNER)
        .await
        .unwrap();
    assert!(matches!(next(&mut subscription).await, Some(StreamEvent::Init(_))));

    match next(&mut subscription).await {
        Some(StreamEvent::Status(status)) => {
            assert_eq!(status.status, "FAILED");
            assert_eq!(
                status.message,
                "Build failed: FAILED (npm ERR! missing script: build)"
            );
        }
        other => panic!("expected status event, got {:?}", other),
    }
    assert!(next(&mut subscription).await.is_none());
}
