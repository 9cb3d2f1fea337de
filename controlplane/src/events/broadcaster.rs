//! Per-deployment event fan-out
//!
//! Subscribers get an unbounded channel each. Publishing never blocks: a
//! send to a closed channel prunes that subscriber. A terminal status closes
//! every channel for the deployment and cancels its backend poller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use api_models::events::{
    InitEvent, LogEvent, StatusEvent, StepEvent, StepSnapshot, StreamEvent,
};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backends::{BuildBackend, BuildStatus};
use crate::build::phases;
use crate::errors::PlatformError;
use crate::models::deployment::{meta, Deployment, DeploymentStatus, DeploymentStep};
use crate::persistence::Store;

/// Event broadcaster options
#[derive(Debug, Clone)]
pub struct Options {
    /// Period of the backend status poller
    pub poll_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

pub struct EventBroadcaster {
    options: Options,
    store: Arc<dyn Store>,
    builds: Arc<dyn BuildBackend>,
    subscribers: DashMap<String, Vec<Subscriber>>,
    pollers: DashMap<String, JoinHandle<()>>,
    next_id: AtomicU64,
    this: Weak<EventBroadcaster>,
}

/// A live subscription; dropping it unsubscribes
pub struct Subscription {
    deployment_id: String,
    subscriber_id: u64,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    broadcaster: Weak<EventBroadcaster>,
}

impl Subscription {
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Next event; `None` once the stream is closed
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(&self.deployment_id, self.subscriber_id);
        }
    }
}

impl EventBroadcaster {
    pub fn new(
        options: Options,
        store: Arc<dyn Store>,
        builds: Arc<dyn BuildBackend>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            options,
            store,
            builds,
            subscribers: DashMap::new(),
            pollers: DashMap::new(),
            next_id: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    /// Subscribe `owner_id` to the events of a deployment.
    ///
    /// The init snapshot is queued before the subscriber is registered so it
    /// is always the first event received.
    pub async fn subscribe(
        &self,
        deployment_id: &str,
        owner_id: &str,
    ) -> Result<Subscription, PlatformError> {
        let deployment = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("Deployment {}", deployment_id)))?;

        if deployment.owner_id != owner_id {
            warn!("Owner {} denied events of deployment {}", owner_id, deployment_id);
            return Err(PlatformError::Forbidden(format!(
                "Deployment {} belongs to another owner",
                deployment_id
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // A freshly created channel cannot be closed
        let _ = tx.send(init_event(&deployment));

        if deployment.is_terminal() {
            let _ = tx.send(status_event(
                deployment.status,
                deployment
                    .error_message
                    .as_deref()
                    .unwrap_or("Deployment finished"),
            ));
        } else {
            self.subscribers
                .entry(deployment_id.to_string())
                .or_default()
                .push(Subscriber { id: subscriber_id, tx });
            self.ensure_poller(deployment_id);
            debug!("Subscriber {} joined deployment {}", subscriber_id, deployment_id);
        }

        Ok(Subscription {
            deployment_id: deployment_id.to_string(),
            subscriber_id,
            rx,
            broadcaster: self.this.clone(),
        })
    }

    pub fn publish_step(&self, deployment_id: &str, step: &DeploymentStep) {
        let message = step
            .error
            .clone()
            .or_else(|| step.message.clone())
            .unwrap_or_default();
        self.publish(
            deployment_id,
            StreamEvent::Step(StepEvent {
                step_name: step.name.clone(),
                status: step.status.as_str().to_string(),
                message,
                timestamp: Utc::now(),
            }),
        );
    }

    pub fn publish_status(&self, deployment_id: &str, status: DeploymentStatus, message: &str) {
        self.publish(deployment_id, status_event(status, message));
    }

    pub fn publish_log(&self, deployment_id: &str, message: &str) {
        self.publish(
            deployment_id,
            StreamEvent::Log(LogEvent {
                message: message.to_string(),
                timestamp: Utc::now(),
            }),
        );
    }

    /// Push an event to every live subscriber of a deployment
    pub fn publish(&self, deployment_id: &str, event: StreamEvent) {
        let terminal = event.is_terminal();

        let emptied = match self.subscribers.get_mut(deployment_id) {
            Some(mut subscribers) => {
                subscribers.retain(|subscriber| subscriber.tx.send(event.clone()).is_ok());
                subscribers.is_empty()
            }
            None => false,
        };

        if terminal {
            if self.subscribers.remove(deployment_id).is_some() {
                info!("Closed event streams of deployment {}", deployment_id);
            }
            self.cancel_poller(deployment_id);
        } else if emptied {
            self.subscribers
                .remove_if(deployment_id, |_, subscribers| subscribers.is_empty());
            self.cancel_poller(deployment_id);
        }
    }

    fn unsubscribe(&self, deployment_id: &str, subscriber_id: u64) {
        let emptied = match self.subscribers.get_mut(deployment_id) {
            Some(mut subscribers) => {
                subscribers.retain(|subscriber| subscriber.id != subscriber_id);
                subscribers.is_empty()
            }
            None => return,
        };

        if emptied {
            self.subscribers
                .remove_if(deployment_id, |_, subscribers| subscribers.is_empty());
            self.cancel_poller(deployment_id);
            debug!("Last subscriber left deployment {}", deployment_id);
        }
    }

    pub fn subscriber_count(&self, deployment_id: &str) -> usize {
        self.subscribers
            .get(deployment_id)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn has_poller(&self, deployment_id: &str) -> bool {
        self.pollers
            .get(deployment_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn ensure_poller(&self, deployment_id: &str) {
        let this = self.this.clone();
        let interval = self.options.poll_interval;
        let id = deployment_id.to_string();

        let mut entry = self.pollers.entry(id.clone()).or_insert_with(|| {
            tokio::spawn(run_poller(this.clone(), id.clone(), interval))
        });
        if entry.is_finished() {
            *entry = tokio::spawn(run_poller(this, id, interval));
        }
    }

    fn cancel_poller(&self, deployment_id: &str) {
        if let Some((_, handle)) = self.pollers.remove(deployment_id) {
            handle.abort();
            debug!("Cancelled poller for deployment {}", deployment_id);
        }
    }

    /// Cancel every poller and close every stream
    pub fn shutdown(&self) {
        self.subscribers.clear();
        let ids: Vec<String> = self.pollers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel_poller(&id);
        }
    }
}

fn init_event(deployment: &Deployment) -> StreamEvent {
    StreamEvent::Init(InitEvent {
        deployment_id: deployment.id.clone(),
        status: deployment.status.as_str().to_string(),
        commit_sha: deployment.meta(meta::COMMIT_SHA).map(str::to_string),
        commit_message: deployment.meta(meta::COMMIT_MESSAGE).map(str::to_string),
        steps: deployment
            .steps
            .iter()
            .map(|step| StepSnapshot {
                step_name: step.name.clone(),
                status: step.status.as_str().to_string(),
                message: step.message.clone(),
                started_at: step.started_at,
                completed_at: step.completed_at,
            })
            .collect(),
        timestamp: Utc::now(),
    })
}

fn status_event(status: DeploymentStatus, message: &str) -> StreamEvent {
    StreamEvent::Status(StatusEvent {
        status: status.as_str().to_string(),
        message: message.to_string(),
        timestamp: Utc::now(),
    })
}

fn step_event(step_name: &str, status: &str, message: &str) -> StreamEvent {
    StreamEvent::Step(StepEvent {
        step_name: step_name.to_string(),
        status: status.to_string(),
        message: message.to_string(),
        timestamp: Utc::now(),
    })
}

/// Re-derive step and status events from the build backend
async fn run_poller(broadcaster: Weak<EventBroadcaster>, deployment_id: String, interval: Duration) {
    debug!("Poller started for deployment {}", deployment_id);
    let mut last_step: Option<String> = None;

    loop {
        tokio::time::sleep(interval).await;

        let Some(broadcaster) = broadcaster.upgrade() else {
            return;
        };

        let deployment = match broadcaster.store.get_deployment(&deployment_id).await {
            Ok(Some(deployment)) => deployment,
            Ok(None) => {
                warn!("Deployment {} disappeared, stopping poller", deployment_id);
                return;
            }
            Err(e) => {
                warn!("Poller failed to load deployment {}: {}", deployment_id, e);
                continue;
            }
        };

        if deployment.is_terminal() {
            let message = deployment
                .error_message
                .clone()
                .unwrap_or_else(|| "Deployment finished".to_string());
            broadcaster.publish_status(&deployment_id, deployment.status, &message);
            return;
        }

        let Some(job_id) = deployment.meta(meta::BUILD_JOB_ID) else {
            continue;
        };

        let job = match broadcaster.builds.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                warn!("Poller failed to read build {} of deployment {}: {}", job_id, deployment_id, e);
                continue;
            }
        };

        match job.status {
            BuildStatus::Succeeded => {
                if last_step.as_deref() != Some(phases::DEPLOYING) {
                    broadcaster.publish(
                        &deployment_id,
                        step_event(phases::DEPLOYING, "IN_PROGRESS", "Deploying container"),
                    );
                    last_step = Some(phases::DEPLOYING.to_string());
                }
            }
            status if status.is_failure() => {
                broadcaster.publish_status(
                    &deployment_id,
                    DeploymentStatus::Failed,
                    &job.failure_message(),
                );
                return;
            }
            _ => {
                if let Some(phase) = job.current_phase.as_deref() {
                    let (step, message) = phases::step_for(phase);
                    if last_step.as_deref() != Some(step.as_str()) {
                        broadcaster.publish(&deployment_id, step_event(&step, "IN_PROGRESS", &message));
                        last_step = Some(step);
                    }
                }
            }
        }
    }
}
