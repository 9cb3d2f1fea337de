//! Settings file management
//!
//! Every field has a serde default so a partial (or missing) settings file
//! yields a runnable configuration.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::errors::PlatformError;
use crate::logs::LogFormat;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/berth/settings.json";

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LogSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub orchestration: OrchestrationSettings,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub source_control: SourceControlSettings,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub events: EventSettings,

    /// Container limits per plan
    #[serde(default)]
    pub plans: PlanSettings,

    #[serde(default)]
    pub lifecycle: LifecycleSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LogSettings::default(),
            server: ServerSettings::default(),
            orchestration: OrchestrationSettings::default(),
            build: BuildSettings::default(),
            registry: RegistrySettings::default(),
            metrics: MetricsSettings::default(),
            source_control: SourceControlSettings::default(),
            reconciler: ReconcilerSettings::default(),
            health: HealthSettings::default(),
            events: EventSettings::default(),
            plans: PlanSettings::default(),
            lifecycle: LifecycleSettings::default(),
        }
    }
}

impl Settings {
    /// Read the settings file at `path`, falling back to defaults when absent
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PlatformError> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                PlatformError::Config(format!("{}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directives, e.g. `info,berth::build=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Directory for daily rolling log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Orchestration backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSettings {
    #[serde(default = "default_orchestration_url")]
    pub base_url: String,

    #[serde(default = "empty_secret", skip_serializing)]
    pub api_token: SecretString,

    #[serde(default = "default_cluster")]
    pub cluster: String,
}

fn default_orchestration_url() -> String {
    "http://localhost:9100".to_string()
}

fn default_cluster() -> String {
    "berth".to_string()
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            base_url: default_orchestration_url(),
            api_token: empty_secret(),
            cluster: default_cluster(),
        }
    }
}

/// Build backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_build_url")]
    pub base_url: String,

    #[serde(default = "empty_secret", skip_serializing)]
    pub api_token: SecretString,

    #[serde(default = "default_build_project")]
    pub project: String,

    #[serde(default = "default_build_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Deployments with no build job after this long are declared interrupted
    #[serde(default = "default_orphan_grace")]
    pub orphan_grace_secs: u64,
}

fn default_build_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_build_project() -> String {
    "berth-builds".to_string()
}

fn default_build_poll_interval() -> u64 {
    10
}

fn default_max_poll_attempts() -> u32 {
    60
}

fn default_orphan_grace() -> u64 {
    300
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            base_url: default_build_url(),
            api_token: empty_secret(),
            project: default_build_project(),
            poll_interval_secs: default_build_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            orphan_grace_secs: default_orphan_grace(),
        }
    }
}

/// Image registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_registry_host")]
    pub host: String,

    #[serde(default = "default_repository_prefix")]
    pub repository_prefix: String,
}

fn default_registry_host() -> String {
    "registry.berth.local".to_string()
}

fn default_repository_prefix() -> String {
    "berth".to_string()
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            host: default_registry_host(),
            repository_prefix: default_repository_prefix(),
        }
    }
}

/// Metrics backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_metrics_url")]
    pub base_url: String,

    #[serde(default = "empty_secret", skip_serializing)]
    pub api_token: SecretString,

    /// Namespace usage metrics are read from
    #[serde(default = "default_metrics_namespace")]
    pub namespace: String,

    /// Namespace health verdicts are written to
    #[serde(default = "default_insights_namespace")]
    pub insights_namespace: String,
}

fn default_metrics_url() -> String {
    "http://localhost:9300".to_string()
}

fn default_metrics_namespace() -> String {
    "Berth/Containers".to_string()
}

fn default_insights_namespace() -> String {
    "Berth/Health".to_string()
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            base_url: default_metrics_url(),
            api_token: empty_secret(),
            namespace: default_metrics_namespace(),
            insights_namespace: default_insights_namespace(),
        }
    }
}

/// Source-control connection service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceControlSettings {
    #[serde(default = "default_source_control_url")]
    pub base_url: String,

    #[serde(default = "empty_secret", skip_serializing)]
    pub api_token: SecretString,
}

fn default_source_control_url() -> String {
    "http://localhost:9400".to_string()
}

impl Default for SourceControlSettings {
    fn default() -> Self {
        Self {
            base_url: default_source_control_url(),
            api_token: empty_secret(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    #[serde(default = "default_reconciler_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_cache_retention")]
    pub cache_retention_secs: u64,
}

fn default_reconciler_interval() -> u64 {
    5
}

fn default_cache_retention() -> u64 {
    300
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_reconciler_interval(),
            cache_retention_secs: default_cache_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_thirty")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_thirty")]
    pub default_interval_secs: u64,

    #[serde(default = "default_thirty")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// Scheme used to reach containers
    #[serde(default = "default_probe_scheme")]
    pub probe_scheme: String,

    /// Containers answer on `<subdomain>.<probe_domain>`
    #[serde(default = "default_probe_domain")]
    pub probe_domain: String,
}

fn default_thirty() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_probe_scheme() -> String {
    "https".to_string()
}

fn default_probe_domain() -> String {
    "apps.berth.local".to_string()
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_thirty(),
            default_interval_secs: default_thirty(),
            initial_delay_secs: default_thirty(),
            probe_timeout_secs: default_probe_timeout(),
            unhealthy_threshold: default_unhealthy_threshold(),
            probe_scheme: default_probe_scheme(),
            probe_domain: default_probe_domain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    #[serde(default = "default_event_poll_interval")]
    pub poll_interval_secs: u64,

    /// Streams with no event for this long are closed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_event_poll_interval() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    600
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_event_poll_interval(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSettings {
    #[serde(default = "default_free_limit")]
    pub free: u64,

    #[serde(default = "default_starter_limit")]
    pub starter: u64,

    #[serde(default = "default_pro_limit")]
    pub pro: u64,

    #[serde(default = "default_business_limit")]
    pub business: u64,

    #[serde(default = "default_enterprise_limit")]
    pub enterprise: u64,
}

fn default_free_limit() -> u64 {
    1
}

fn default_starter_limit() -> u64 {
    3
}

fn default_pro_limit() -> u64 {
    10
}

fn default_business_limit() -> u64 {
    50
}

fn default_enterprise_limit() -> u64 {
    200
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            free: default_free_limit(),
            starter: default_starter_limit(),
            pro: default_pro_limit(),
            business: default_business_limit(),
            enterprise: default_enterprise_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// Upper bound on graceful shutdown
    #[serde(default = "default_thirty")]
    pub max_shutdown_delay_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_shutdown_delay_secs: default_thirty(),
        }
    }
}
