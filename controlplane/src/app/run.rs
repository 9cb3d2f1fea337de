//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, Backends};
use crate::errors::PlatformError;
use crate::health::monitor::HealthMonitor;
use crate::reconcile::reconciler::DeploymentReconciler;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{health_sweep, reconciler};

/// Run the control plane against the configured REST backends
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PlatformError> {
    let backends = Backends::from_options(&options.backends)?;
    run_with(options, backends, shutdown_signal).await
}

/// Run the control plane against the given backends
pub async fn run_with(
    options: AppOptions,
    backends: Backends,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PlatformError> {
    info!("Initializing Berth control plane...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, backends, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start control plane: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    backends: Backends,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, PlatformError> {
    let app_state = Arc::new(AppState::new(options, backends));
    shutdown_manager.with_app_state(app_state.clone())?;

    init_reconciler_worker(
        options.reconciler_worker.clone(),
        app_state.reconciler.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    init_health_sweep_worker(
        options.health_sweep.clone(),
        app_state.health.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;

    Ok(app_state)
}

async fn init_reconciler_worker(
    options: reconciler::Options,
    deployment_reconciler: Arc<DeploymentReconciler>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PlatformError> {
    info!("Initializing reconciler worker...");

    let reconciler_handle = tokio::spawn(async move {
        reconciler::run(
            &options,
            deployment_reconciler.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_reconciler_worker_handle(reconciler_handle)?;
    Ok(())
}

async fn init_health_sweep_worker(
    options: health_sweep::Options,
    monitor: Arc<HealthMonitor>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PlatformError> {
    info!("Initializing health sweep worker...");

    let health_sweep_handle = tokio::spawn(async move {
        health_sweep::run(
            &options,
            monitor.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_health_sweep_worker_handle(health_sweep_handle)?;
    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PlatformError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(&app_state, options.stream_idle_timeout);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), PlatformError>>>,
    reconciler_worker_handle: Option<JoinHandle<()>>,
    health_sweep_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            reconciler_worker_handle: None,
            health_sweep_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), PlatformError> {
        if self.app_state.is_some() {
            return Err(PlatformError::Shutdown("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_reconciler_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), PlatformError> {
        if self.reconciler_worker_handle.is_some() {
            return Err(PlatformError::Shutdown(
                "reconciler_handle already set".to_string(),
            ));
        }
        self.reconciler_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_health_sweep_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), PlatformError> {
        if self.health_sweep_worker_handle.is_some() {
            return Err(PlatformError::Shutdown(
                "health_sweep_handle already set".to_string(),
            ));
        }
        self.health_sweep_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), PlatformError>>,
    ) -> Result<(), PlatformError> {
        if self.server_handle.is_some() {
            return Err(PlatformError::Shutdown("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PlatformError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), PlatformError> {
        info!("Shutting down Berth control plane...");

        // 1. HTTP server, so no new builds are accepted
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| PlatformError::Shutdown(e.to_string()))??;
        }

        // 2. Reconciler worker
        if let Some(handle) = self.reconciler_worker_handle.take() {
            handle.await.map_err(|e| PlatformError::Shutdown(e.to_string()))?;
        }

        // 3. Health sweep worker
        if let Some(handle) = self.health_sweep_worker_handle.take() {
            handle.await.map_err(|e| PlatformError::Shutdown(e.to_string()))?;
        }

        // 4. App state: in-flight builds, monitors, event streams
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
