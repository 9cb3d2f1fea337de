//! Server state

use std::sync::Arc;
use std::time::Duration;

use crate::app::state::AppState;
use crate::build::trigger::BuildTrigger;
use crate::containers::service::ContainerService;
use crate::events::broadcaster::EventBroadcaster;
use crate::health::monitor::HealthMonitor;
use crate::reconcile::reconciler::DeploymentReconciler;
use crate::webhook::service::WebhookService;

/// Server state shared across handlers
pub struct ServerState {
    pub containers: Arc<ContainerService>,
    pub trigger: Arc<BuildTrigger>,
    pub webhooks: Arc<WebhookService>,
    pub events: Arc<EventBroadcaster>,
    pub reconciler: Arc<DeploymentReconciler>,
    pub health: Arc<HealthMonitor>,
    pub stream_idle_timeout: Duration,
}

impl ServerState {
    pub fn new(app_state: &AppState, stream_idle_timeout: Duration) -> Self {
        Self {
            containers: app_state.containers.clone(),
            trigger: app_state.trigger.clone(),
            webhooks: app_state.webhooks.clone(),
            events: app_state.events.clone(),
            reconciler: app_state.reconciler.clone(),
            health: app_state.health.clone(),
            stream_idle_timeout,
        }
    }
}
