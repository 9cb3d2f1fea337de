//! Container health monitor
//!
//! One timer task per RUNNING container plus a global sweep that removes
//! records whose backing service is gone. Verdicts live in an owned map that
//! is populated by `start_monitoring` and cleared by `stop_monitoring`.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backends::{Dimensions, MetricsBackend};
use crate::errors::PlatformError;
use crate::health::probe::HealthProbe;
use crate::health::status::{HealthStatus, ResourceMetrics};
use crate::models::container::{Container, ContainerStatus, ResourceUsage};
use crate::orchestration::client::OrchestrationClient;
use crate::orchestration::{RolloutState, TaskHealth, TaskState};
use crate::persistence::{Accounts, Store};

/// Health monitor options
#[derive(Debug, Clone)]
pub struct Options {
    /// Check interval when the container does not set one
    pub default_interval: Duration,

    /// Delay before a new monitor's first check
    pub initial_delay: Duration,

    /// Upper bound on a single HTTP probe
    pub probe_timeout: Duration,

    /// Failure streak logged as unhealthy when the container does not set one
    pub unhealthy_threshold: u32,

    /// Namespace the usage metrics are read from
    pub metrics_namespace: String,

    /// Namespace health verdicts are reported to
    pub insights_namespace: String,

    /// Trailing window the usage metrics are averaged over
    pub metrics_window: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
            metrics_namespace: "Berth/Containers".to_string(),
            insights_namespace: "Berth/Health".to_string(),
            metrics_window: Duration::from_secs(300),
        }
    }
}

struct Monitor {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct HealthMonitor {
    options: Options,
    store: Arc<dyn Store>,
    accounts: Arc<dyn Accounts>,
    orchestration: Arc<OrchestrationClient>,
    metrics: Arc<dyn MetricsBackend>,
    probe: Arc<dyn HealthProbe>,
    statuses: DashMap<String, HealthStatus>,
    monitors: DashMap<String, Monitor>,
    this: Weak<HealthMonitor>,
}

impl HealthMonitor {
    pub fn new(
        options: Options,
        store: Arc<dyn Store>,
        accounts: Arc<dyn Accounts>,
        orchestration: Arc<OrchestrationClient>,
        metrics: Arc<dyn MetricsBackend>,
        probe: Arc<dyn HealthProbe>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            options,
            store,
            accounts,
            orchestration,
            metrics,
            probe,
            statuses: DashMap::new(),
            monitors: DashMap::new(),
            this: this.clone(),
        })
    }

    /// Start (or restart) the per-container check loop
    pub fn start_monitoring(&self, container: &Container) {
        let interval = match container.health_check.interval_secs {
            0 => self.options.default_interval,
            secs => Duration::from_secs(secs),
        };
        let initial_delay = self.options.initial_delay;
        let this = self.this.clone();
        let container_id = container.id.clone();

        self.statuses
            .entry(container_id.clone())
            .or_insert_with(|| HealthStatus::new(&container_id));

        let (cancel, cancelled) = oneshot::channel();
        let handle = tokio::spawn(run_monitor(
            this,
            container_id.clone(),
            interval,
            initial_delay,
            cancelled,
        ));

        if let Some(previous) = self
            .monitors
            .insert(container_id.clone(), Monitor { cancel, handle })
        {
            let _ = previous.cancel.send(());
        }
        info!(
            "Started health monitoring for container {} every {:?}",
            container_id, interval
        );
    }

    /// Stop the check loop and forget the container's verdict
    pub fn stop_monitoring(&self, container_id: &str) {
        if let Some((_, monitor)) = self.monitors.remove(container_id) {
            let _ = monitor.cancel.send(());
            info!("Stopped health monitoring for container {}", container_id);
        }
        self.statuses.remove(container_id);
    }

    pub fn is_monitoring(&self, container_id: &str) -> bool {
        self.monitors
            .get(container_id)
            .map(|monitor| !monitor.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn health_status(&self, container_id: &str) -> Option<HealthStatus> {
        self.statuses.get(container_id).map(|status| status.clone())
    }

    /// Stop every check loop
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.monitors.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, monitor)) = self.monitors.remove(&id) {
                let _ = monitor.cancel.send(());
                if let Err(e) = monitor.handle.await {
                    error!("Health monitor for container {} panicked: {}", id, e);
                }
            }
        }
    }

    /// Run one health check; `None` when the verdict was skipped
    pub async fn check_container(
        &self,
        container_id: &str,
    ) -> Result<Option<HealthStatus>, PlatformError> {
        let Some(container) = self.store.get_container(container_id).await? else {
            debug!("Container {} no longer exists, stopping its monitor", container_id);
            self.stop_monitoring(container_id);
            return Ok(None);
        };

        if container.status != ContainerStatus::Running {
            debug!(
                "Container {} is {}, skipping health check",
                container_id, container.status
            );
            return Ok(None);
        }

        if !self.statuses.contains_key(container_id) {
            debug!("Container {} is not monitored, skipping health check", container_id);
            return Ok(None);
        }

        let service_ref = service_ref(&container);
        let (task_healthy, task_error) =
            match self.orchestration.describe_service(&service_ref).await? {
                Some(service) if service.rollout_state == Some(RolloutState::InProgress) => {
                    debug!(
                        "Service {} of container {} is rolling out, skipping health check",
                        service_ref, container_id
                    );
                    return Ok(None);
                }
                Some(service) => {
                    let tasks = self.orchestration.describe_tasks(&service.task_refs).await?;
                    tasks_verdict(&tasks)
                }
                None => (false, Some(format!("Service {} not found", service_ref))),
            };

        let (http_healthy, http_error) = match container.health_check.path.as_deref() {
            Some(path) if !path.is_empty() => {
                let outcome = self
                    .probe
                    .probe(&container, path, self.probe_timeout(&container))
                    .await;
                (outcome.healthy, outcome.error)
            }
            _ => (true, None),
        };

        let healthy = task_healthy && http_healthy;
        let error = task_error.or(http_error);
        let metrics = self.usage_metrics(&container).await;

        // Monitoring may have stopped while the check ran
        let status = {
            let Some(mut entry) = self.statuses.get_mut(container_id) else {
                debug!("Container {} stopped being monitored, dropping verdict", container_id);
                return Ok(None);
            };
            entry.update_health(healthy, error);
            entry.metrics = metrics.clone();
            entry.clone()
        };

        self.report(&container, &status).await;

        if let Some(metrics) = metrics {
            self.record_usage(container_id, &metrics).await?;
        }

        let threshold = match container.health_check.unhealthy_threshold {
            0 => self.options.unhealthy_threshold,
            threshold => threshold,
        };
        if status.is_unhealthy(threshold) {
            warn!(
                "Container {} unhealthy for {} consecutive checks: {}",
                container_id,
                status.consecutive_failures,
                status.last_error.as_deref().unwrap_or("unknown error")
            );
        } else {
            debug!(
                "Container {} healthy={} (failures {}, successes {})",
                container_id, status.healthy, status.consecutive_failures, status.consecutive_successes
            );
        }

        Ok(Some(status))
    }

    /// Verify every RUNNING container still has an ACTIVE service.
    ///
    /// A definitive "gone" removes the record. A failed lookup skips the
    /// container until the next sweep. Live containers without a monitor,
    /// e.g. after a restart, get one before they are checked.
    pub async fn sweep(&self) -> Result<(), PlatformError> {
        let containers = self.store.containers_by_status(ContainerStatus::Running).await?;
        debug!("Health sweep over {} running containers", containers.len());

        for container in containers {
            let service_ref = service_ref(&container);
            match self.orchestration.describe_service(&service_ref).await {
                Ok(Some(service)) if service.is_active() => {
                    if !self.is_monitoring(&container.id) {
                        info!("Container {} has no health monitor, starting one", container.id);
                        self.start_monitoring(&container);
                    }
                    if let Err(e) = self.check_container(&container.id).await {
                        warn!("Health check of container {} failed: {}", container.id, e);
                    }
                }
                Ok(Some(service)) => {
                    warn!(
                        "Service {} of container {} is {}, removing record",
                        service_ref, container.id, service.status
                    );
                    self.remove_orphan(&container).await;
                }
                Ok(None) => {
                    warn!(
                        "Service {} of container {} not found, removing record",
                        service_ref, container.id
                    );
                    self.remove_orphan(&container).await;
                }
                Err(e) => {
                    warn!(
                        "Unable to describe service {} of container {}: {}",
                        service_ref, container.id, e
                    );
                }
            }
        }
        Ok(())
    }

    async fn remove_orphan(&self, container: &Container) {
        if let Err(e) = self.store.delete_container(&container.id).await {
            error!("Unable to delete container {}: {}", container.id, e);
            return;
        }
        if let Err(e) = self
            .accounts
            .adjust_container_count(&container.owner_id, -1)
            .await
        {
            error!(
                "Unable to decrement container count of owner {}: {}",
                container.owner_id, e
            );
        }
        self.stop_monitoring(&container.id);
        info!("Removed orphaned container {}", container.id);
    }

    fn probe_timeout(&self, container: &Container) -> Duration {
        match container.health_check.timeout_secs {
            0 => self.options.probe_timeout,
            secs => Duration::from_secs(secs).min(self.options.probe_timeout),
        }
    }

    async fn usage_metrics(&self, container: &Container) -> Option<ResourceMetrics> {
        let dimensions = Dimensions::from([("ServiceName".to_string(), container.service_name())]);
        let mut averages = BTreeMap::new();

        for metric in ["CpuUtilized", "MemoryUtilized", "NetworkRxBytes", "NetworkTxBytes"] {
            match self
                .metrics
                .average(
                    &self.options.metrics_namespace,
                    metric,
                    &dimensions,
                    self.options.metrics_window,
                )
                .await
            {
                Ok(value) => {
                    averages.insert(metric, value);
                }
                Err(e) => {
                    warn!("Unable to read {} of container {}: {}", metric, container.id, e);
                    return None;
                }
            }
        }

        Some(ResourceMetrics {
            cpu_percent: percent(averages["CpuUtilized"], container.cpu as f64),
            memory_percent: percent(averages["MemoryUtilized"], container.memory as f64),
            network_in: averages["NetworkRxBytes"],
            network_out: averages["NetworkTxBytes"],
        })
    }

    async fn report(&self, container: &Container, status: &HealthStatus) {
        let dimensions = Dimensions::from([("ContainerId".to_string(), container.id.clone())]);
        let verdict = if status.healthy { 1.0 } else { 0.0 };

        for (metric, value) in [
            ("ContainerHealth", verdict),
            (
                "ConsecutiveHealthCheckFailures",
                status.consecutive_failures as f64,
            ),
        ] {
            if let Err(e) = self
                .metrics
                .put_metric(&self.options.insights_namespace, metric, value, &dimensions)
                .await
            {
                warn!("Unable to report {} of container {}: {}", metric, container.id, e);
            }
        }
    }

    async fn record_usage(
        &self,
        container_id: &str,
        metrics: &ResourceMetrics,
    ) -> Result<(), PlatformError> {
        let Some(mut container) = self.store.get_container(container_id).await? else {
            return Ok(());
        };
        let end = Utc::now();
        let window = chrono::Duration::from_std(self.options.metrics_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        container.resource_usage = Some(ResourceUsage {
            avg_cpu_percent: metrics.cpu_percent,
            avg_memory_percent: metrics.memory_percent,
            measurement_period_start: Some(end - window),
            measurement_period_end: Some(end),
        });
        self.store.put_container(&container).await
    }
}

fn service_ref(container: &Container) -> String {
    container
        .service_ref
        .clone()
        .unwrap_or_else(|| container.service_name())
}

fn tasks_verdict(tasks: &[TaskState]) -> (bool, Option<String>) {
    if tasks.is_empty() {
        return (false, Some("No running tasks".to_string()));
    }
    match tasks
        .iter()
        .find(|task| task.last_status != "RUNNING" || task.health_status == TaskHealth::Unhealthy)
    {
        Some(task) => (
            false,
            Some(format!(
                "Task {} is {} ({:?})",
                task.task_ref, task.last_status, task.health_status
            )),
        ),
        None => (true, None),
    }
}

fn percent(used: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 {
        return 0.0;
    }
    (used / capacity * 100.0).clamp(0.0, 100.0)
}

async fn run_monitor(
    monitor: Weak<HealthMonitor>,
    container_id: String,
    interval: Duration,
    initial_delay: Duration,
    mut cancelled: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = &mut cancelled => return,
        _ = tokio::time::sleep(initial_delay) => {}
    }

    loop {
        let Some(health) = monitor.upgrade() else {
            return;
        };
        if let Err(e) = health.check_container(&container_id).await {
            warn!("Health check of container {} failed: {}", container_id, e);
        }
        drop(health);

        tokio::select! {
            _ = &mut cancelled => {
                debug!("Health monitor for container {} cancelled", container_id);
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
