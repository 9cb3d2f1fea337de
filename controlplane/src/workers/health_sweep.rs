//! Global health sweep worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::health::monitor::HealthMonitor;

/// Health sweep worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,

    /// Initial delay before first sweep
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(30),
        }
    }
}

/// Run the health sweep worker
pub async fn run<S, F>(
    options: &Options,
    monitor: &HealthMonitor,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health sweep worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Health sweep worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        debug!("Sweeping running containers...");
        if let Err(e) = monitor.sweep().await {
            error!("Health sweep failed: {}", e);
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health sweep worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
