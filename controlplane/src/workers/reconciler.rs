//! Deployment reconciler worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::reconcile::reconciler::DeploymentReconciler;

/// Reconciler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Run the reconciler worker
pub async fn run<S, F>(
    options: &Options,
    reconciler: &DeploymentReconciler,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Reconciler worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Reconciler worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        debug!("Reconciling deployments...");
        if let Err(e) = reconciler.sweep().await {
            error!("Reconciler sweep failed: {}", e);
        }
    }
}
