//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::{AppOptions, BackendOptions};
use crate::backends::{BuildBackend, MetricsBackend, SourceControl};
use crate::build::executor::BuildExecutor;
use crate::build::trigger::BuildTrigger;
use crate::containers::service::ContainerService;
use crate::deploy::recorder::DeploymentRecorder;
use crate::errors::PlatformError;
use crate::events::broadcaster::EventBroadcaster;
use crate::health::monitor::HealthMonitor;
use crate::health::probe::{HealthProbe, HttpProbe};
use crate::http::builds::RestBuilds;
use crate::http::client::HttpClient;
use crate::http::metrics::RestMetrics;
use crate::http::orchestration::RestOrchestration;
use crate::http::source_control::RestSourceControl;
use crate::orchestration::client::OrchestrationClient;
use crate::orchestration::OrchestrationBackend;
use crate::persistence::memory::{MemoryAccounts, MemoryStore};
use crate::persistence::{Accounts, Store};
use crate::reconcile::reconciler::DeploymentReconciler;
use crate::webhook::service::WebhookService;

/// External collaborators the control plane is wired against
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn Store>,
    pub accounts: Arc<dyn Accounts>,
    pub orchestration: Arc<dyn OrchestrationBackend>,
    pub builds: Arc<dyn BuildBackend>,
    pub metrics: Arc<dyn MetricsBackend>,
    pub source_control: Arc<dyn SourceControl>,
    pub probe: Arc<dyn HealthProbe>,
}

impl Backends {
    /// REST backends from the configured endpoints, in-memory records
    pub fn from_options(options: &BackendOptions) -> Result<Self, PlatformError> {
        let timeout = options.request_timeout;

        let orchestration = HttpClient::new(
            "orchestration",
            &options.orchestration.base_url,
            timeout,
        )?;
        let builds = HttpClient::new("build", &options.build.base_url, timeout)?;
        let metrics = HttpClient::new("metrics", &options.metrics.base_url, timeout)?;
        let source_control = HttpClient::new(
            "source-control",
            &options.source_control.base_url,
            timeout,
        )?;

        Ok(Self {
            store: Arc::new(MemoryStore::new()),
            accounts: Arc::new(MemoryAccounts::new()),
            orchestration: Arc::new(RestOrchestration::new(
                orchestration,
                options.orchestration.token.clone(),
                &options.cluster,
            )),
            builds: Arc::new(RestBuilds::new(
                builds,
                options.build.token.clone(),
                &options.build_project,
            )),
            metrics: Arc::new(RestMetrics::new(metrics, options.metrics.token.clone())),
            source_control: Arc::new(RestSourceControl::new(
                source_control,
                options.source_control.token.clone(),
            )),
            probe: Arc::new(HttpProbe::new(&options.probe_scheme, &options.probe_domain)?),
        })
    }
}

/// Main application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub events: Arc<EventBroadcaster>,
    pub recorder: Arc<DeploymentRecorder>,
    pub health: Arc<HealthMonitor>,
    pub executor: Arc<BuildExecutor>,
    pub trigger: Arc<BuildTrigger>,
    pub containers: Arc<ContainerService>,
    pub reconciler: Arc<DeploymentReconciler>,
    pub webhooks: Arc<WebhookService>,
}

impl AppState {
    pub fn new(options: &AppOptions, backends: Backends) -> Self {
        info!("Initializing application state...");

        let Backends {
            store,
            accounts,
            orchestration,
            builds,
            metrics,
            source_control,
            probe,
        } = backends;

        let orchestration = Arc::new(OrchestrationClient::new(orchestration));
        let events = EventBroadcaster::new(options.events.clone(), store.clone(), builds.clone());
        let recorder = Arc::new(DeploymentRecorder::new(store.clone(), events.clone()));

        let health = HealthMonitor::new(
            options.health.clone(),
            store.clone(),
            accounts.clone(),
            orchestration.clone(),
            metrics,
            probe,
        );

        let executor = BuildExecutor::new(
            options.executor.clone(),
            store.clone(),
            builds,
            source_control.clone(),
            orchestration.clone(),
            recorder.clone(),
            health.clone(),
        );
        let trigger = Arc::new(BuildTrigger::new(
            store.clone(),
            source_control,
            executor.clone(),
        ));

        let containers = Arc::new(ContainerService::new(
            options.containers.clone(),
            store.clone(),
            accounts,
            orchestration.clone(),
            recorder.clone(),
            health.clone(),
        ));
        let reconciler = Arc::new(DeploymentReconciler::new(
            options.reconciler.clone(),
            store.clone(),
            orchestration,
            recorder.clone(),
            executor.clone(),
        ));
        let webhooks = Arc::new(WebhookService::new(store.clone(), trigger.clone()));

        Self {
            store,
            events,
            recorder,
            health,
            executor,
            trigger,
            containers,
            reconciler,
            webhooks,
        }
    }

    /// Drain builds, then stop health monitors and event streams
    pub async fn shutdown(&self) -> Result<(), PlatformError> {
        info!("Shutting down application state...");
        self.executor.shutdown().await;
        self.health.shutdown().await;
        self.events.shutdown();
        Ok(())
    }
}
