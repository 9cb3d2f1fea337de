//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::build::env::RegistryOptions;
use crate::build::executor;
use crate::containers::service::{self as containers, PlanLimits};
use crate::events::broadcaster;
use crate::health::monitor;
use crate::reconcile::reconciler;
use crate::storage::settings::Settings;
use crate::workers::{health_sweep, reconciler as reconciler_worker};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Backend endpoints
    pub backends: BackendOptions,

    /// Build executor options
    pub executor: executor::Options,

    /// Deployment reconciler options
    pub reconciler: reconciler::Options,

    /// Reconciler worker options
    pub reconciler_worker: reconciler_worker::Options,

    /// Health monitor options
    pub health: monitor::Options,

    /// Health sweep worker options
    pub health_sweep: health_sweep::Options,

    /// Event broadcaster options
    pub events: broadcaster::Options,

    /// Container service options
    pub containers: containers::Options,

    /// Event streams idle for this long are closed
    pub stream_idle_timeout: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions::default(),
            backends: BackendOptions::default(),
            executor: executor::Options::default(),
            reconciler: reconciler::Options::default(),
            reconciler_worker: reconciler_worker::Options::default(),
            health: monitor::Options::default(),
            health_sweep: health_sweep::Options::default(),
            events: broadcaster::Options::default(),
            containers: containers::Options::default(),
            stream_idle_timeout: Duration::from_secs(600),
        }
    }
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        let secs = Duration::from_secs;
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: secs(settings.lifecycle.max_shutdown_delay_secs),
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            backends: BackendOptions {
                orchestration: Endpoint {
                    base_url: settings.orchestration.base_url.clone(),
                    token: settings.orchestration.api_token.clone(),
                },
                build: Endpoint {
                    base_url: settings.build.base_url.clone(),
                    token: settings.build.api_token.clone(),
                },
                metrics: Endpoint {
                    base_url: settings.metrics.base_url.clone(),
                    token: settings.metrics.api_token.clone(),
                },
                source_control: Endpoint {
                    base_url: settings.source_control.base_url.clone(),
                    token: settings.source_control.api_token.clone(),
                },
                cluster: settings.orchestration.cluster.clone(),
                build_project: settings.build.project.clone(),
                probe_scheme: settings.health.probe_scheme.clone(),
                probe_domain: settings.health.probe_domain.clone(),
                ..Default::default()
            },
            executor: executor::Options {
                poll_interval: secs(settings.build.poll_interval_secs),
                max_poll_attempts: settings.build.max_poll_attempts,
                orphan_grace: secs(settings.build.orphan_grace_secs),
                registry: RegistryOptions {
                    host: settings.registry.host.clone(),
                    repository_prefix: settings.registry.repository_prefix.clone(),
                },
            },
            reconciler: reconciler::Options {
                cache_retention: secs(settings.reconciler.cache_retention_secs),
            },
            reconciler_worker: reconciler_worker::Options {
                interval: secs(settings.reconciler.interval_secs),
            },
            health: monitor::Options {
                default_interval: secs(settings.health.default_interval_secs),
                initial_delay: secs(settings.health.initial_delay_secs),
                probe_timeout: secs(settings.health.probe_timeout_secs),
                unhealthy_threshold: settings.health.unhealthy_threshold,
                metrics_namespace: settings.metrics.namespace.clone(),
                insights_namespace: settings.metrics.insights_namespace.clone(),
                ..Default::default()
            },
            health_sweep: health_sweep::Options {
                interval: secs(settings.health.sweep_interval_secs),
                initial_delay: secs(settings.health.initial_delay_secs),
            },
            events: broadcaster::Options {
                poll_interval: secs(settings.events.poll_interval_secs),
            },
            containers: containers::Options {
                plan_limits: PlanLimits {
                    free: settings.plans.free,
                    starter: settings.plans.starter,
                    pro: settings.plans.pro,
                    business: settings.plans.business,
                    enterprise: settings.plans.enterprise,
                },
                ..Default::default()
            },
            stream_idle_timeout: secs(settings.events.idle_timeout_secs),
        }
    }
}

/// Lifecycle options for the control plane
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Base URL and bearer token of one backend service
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub token: SecretString,
}

impl Endpoint {
    fn local(port: u16) -> Self {
        Self {
            base_url: format!("http://localhost:{}", port),
            token: SecretString::from(String::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub orchestration: Endpoint,
    pub build: Endpoint,
    pub metrics: Endpoint,
    pub source_control: Endpoint,

    /// Cluster services are created in
    pub cluster: String,

    /// Build project jobs are submitted to
    pub build_project: String,

    pub probe_scheme: String,
    pub probe_domain: String,

    /// Upper bound on a single backend request
    pub request_timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            orchestration: Endpoint::local(9100),
            build: Endpoint::local(9200),
            metrics: Endpoint::local(9300),
            source_control: Endpoint::local(9400),
            cluster: "berth".to_string(),
            build_project: "berth-builds".to_string(),
            probe_scheme: "https".to_string(),
            probe_domain: "apps.berth.local".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}
