//! Health status bookkeeping

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Resource metrics sampled alongside a health check
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub network_in: f64,
    pub network_out: f64,
}

/// Rolling health of one container
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub container_id: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_error: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub metrics: Option<ResourceMetrics>,
}

impl HealthStatus {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            healthy: true,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_error: None,
            last_check: None,
            metrics: None,
        }
    }

    /// Record one check result; the opposite streak resets
    pub fn update_health(&mut self, healthy: bool, error: Option<String>) {
        self.healthy = healthy;
        self.last_check = Some(Utc::now());
        if healthy {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            self.last_error = None;
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            self.last_error = error;
        }
    }

    /// Whether the failure streak has reached `threshold`
    pub fn is_unhealthy(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold.max(1)
    }
}
