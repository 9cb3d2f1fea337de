//! Build executor
//!
//! Drives one deployment from PENDING to a terminal state on its own task:
//! authenticate, submit the build job, poll it, then roll the built image out.
//! Failures are written to the deployment and the linked repository and never
//! escape the task.
//!
//! A deployment whose task is gone, e.g. after a restart, is picked back up by
//! [`BuildExecutor::recover`] from the build job id stored in its metadata.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backends::{BuildBackend, BuildJob, BuildStatus, SourceControl};
use crate::build::env::{build_environment, image_tag, RegistryOptions};
use crate::build::phases;
use crate::deploy::recorder::DeploymentRecorder;
use crate::errors::PlatformError;
use crate::health::monitor::HealthMonitor;
use crate::lifecycle::fsm::{next_status, LifecycleEvent};
use crate::models::deployment::{meta, StepStatus};
use crate::orchestration::client::OrchestrationClient;
use crate::persistence::Store;

/// Build executor options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay between build job polls
    pub poll_interval: Duration,

    /// Polls before the build is declared timed out
    pub max_poll_attempts: u32,

    /// Registry the built image is pushed to
    pub registry: RegistryOptions,

    /// How long a deployment may go without a build job before it is
    /// declared interrupted
    pub orphan_grace: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 60,
            registry: RegistryOptions::default(),
            orphan_grace: Duration::from_secs(300),
        }
    }
}

/// Everything the executor needs to run one build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub repository_id: String,
    pub deployment_id: String,
    pub commit_sha: String,
}

/// What [`BuildExecutor::recover`] did with a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// A build task still owns it
    Running,
    /// No build job yet, still inside the grace period
    Waiting,
    /// A new task picked the build job back up
    Resumed,
    /// Marked FAILED
    Failed,
    /// Already terminal
    Settled,
}

enum Work {
    Fresh(BuildRequest),
    /// Continue from a job submitted by an earlier task
    Resume(BuildRequest, BuildJob),
}

impl Work {
    fn request(&self) -> &BuildRequest {
        match self {
            Work::Fresh(request) | Work::Resume(request, _) => request,
        }
    }
}

enum PollOutcome {
    Succeeded,
    Failed(String),
}

pub struct BuildExecutor {
    options: Options,
    store: Arc<dyn Store>,
    builds: Arc<dyn BuildBackend>,
    source_control: Arc<dyn SourceControl>,
    orchestration: Arc<OrchestrationClient>,
    recorder: Arc<DeploymentRecorder>,
    health: Arc<HealthMonitor>,
    in_flight: DashMap<String, JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Mutex<bool>,
    this: Weak<BuildExecutor>,
}

impl BuildExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: Options,
        store: Arc<dyn Store>,
        builds: Arc<dyn BuildBackend>,
        source_control: Arc<dyn SourceControl>,
        orchestration: Arc<OrchestrationClient>,
        recorder: Arc<DeploymentRecorder>,
        health: Arc<HealthMonitor>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new_cyclic(|this| Self {
            options,
            store,
            builds,
            source_control,
            orchestration,
            recorder,
            health,
            in_flight: DashMap::new(),
            shutdown_tx,
            shutting_down: Mutex::new(false),
            this: this.clone(),
        })
    }

    /// Run a build on its own task; returns once the task is spawned
    pub fn spawn(&self, request: BuildRequest) -> Result<(), PlatformError> {
        self.launch(Work::Fresh(request))
    }

    fn launch(&self, work: Work) -> Result<(), PlatformError> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| PlatformError::Shutdown("build executor dropped".to_string()))?;

        // Held until the task is registered, so shutdown either sees it or refuses it
        let shutting_down = self
            .shutting_down
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *shutting_down {
            return Err(PlatformError::Shutdown(
                "build executor is shutting down".to_string(),
            ));
        }

        self.in_flight.retain(|_, handle| !handle.is_finished());

        let deployment_id = work.request().deployment_id.clone();
        let id = deployment_id.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            this.perform(work, shutdown_rx).await;
            this.in_flight.remove(&id);
        });
        self.in_flight.insert(deployment_id, handle);
        Ok(())
    }

    /// Number of builds still running
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Whether a build task is driving this deployment
    pub fn is_running(&self, deployment_id: &str) -> bool {
        self.in_flight
            .get(deployment_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Interrupt every running build and wait for each to record its outcome
    pub async fn shutdown(&self) {
        {
            let mut shutting_down = self
                .shutting_down
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *shutting_down = true;
        }
        let _ = self.shutdown_tx.send(());

        let ids: Vec<String> = self.in_flight.iter().map(|e| e.key().clone()).collect();
        info!("Draining {} in-flight builds", ids.len());
        for id in ids {
            if let Some((_, handle)) = self.in_flight.remove(&id) {
                if let Err(e) = handle.await {
                    error!("Build task for deployment {} panicked: {}", id, e);
                }
            }
        }
    }

    /// Execute a build to completion on the calling task
    pub async fn execute(&self, request: BuildRequest, shutdown: broadcast::Receiver<()>) {
        self.perform(Work::Fresh(request), shutdown).await;
    }

    async fn perform(&self, work: Work, mut shutdown: broadcast::Receiver<()>) {
        let (request, result) = match work {
            Work::Fresh(request) => {
                info!(
                    "Starting build for deployment {} at commit {}",
                    request.deployment_id, request.commit_sha
                );
                let result = self.run(&request, &mut shutdown).await;
                (request, result)
            }
            Work::Resume(request, job) => {
                info!(
                    "Resuming build job {} for deployment {}",
                    job.id, request.deployment_id
                );
                let result = self.resume(&request, job, &mut shutdown).await;
                (request, result)
            }
        };

        if let Err(e) = result {
            let message = failure_message(&e);
            error!("Build for deployment {} failed: {}", request.deployment_id, message);
            self.fail(&request, &message).await;
        }
    }

    /// Pick up a deployment no task is driving.
    ///
    /// A stored build job is queried again: failed jobs fail the deployment
    /// with the job's reason, anything else resumes on a new task. Without a
    /// job the deployment is failed as interrupted once it is older than
    /// `orphan_grace`.
    pub async fn recover(&self, deployment_id: &str) -> Result<Recovery, PlatformError> {
        if self.is_running(deployment_id) {
            return Ok(Recovery::Running);
        }
        let Some(deployment) = self.store.get_deployment(deployment_id).await? else {
            return Ok(Recovery::Settled);
        };
        if deployment.is_terminal() {
            return Ok(Recovery::Settled);
        }

        let request = match (
            deployment.meta(meta::REPOSITORY_ID),
            deployment.meta(meta::COMMIT_SHA),
        ) {
            (Some(repository_id), Some(commit_sha)) => Some(BuildRequest {
                repository_id: repository_id.to_string(),
                deployment_id: deployment.id.clone(),
                commit_sha: commit_sha.to_string(),
            }),
            _ => None,
        };

        let Some(job_id) = deployment.meta(meta::BUILD_JOB_ID) else {
            let age = Utc::now().signed_duration_since(deployment.created_at);
            if age.to_std().map_or(true, |age| age < self.options.orphan_grace) {
                return Ok(Recovery::Waiting);
            }
            let message = if request.is_some() {
                "Build interrupted"
            } else {
                "Deployment interrupted"
            };
            warn!(
                "Deployment {} has no build job after {}s: {}",
                deployment.id,
                age.num_seconds(),
                message
            );
            self.abandon(&deployment.id, request.as_ref(), message).await;
            return Ok(Recovery::Failed);
        };

        let Some(job) = self.builds.get_job(job_id).await? else {
            let message = format!("Build job {} not found", job_id);
            warn!("Deployment {}: {}", deployment.id, message);
            self.abandon(&deployment.id, request.as_ref(), &message).await;
            return Ok(Recovery::Failed);
        };
        if job.status.is_failure() {
            let message = job.failure_message();
            info!("Orphaned deployment {} failed: {}", deployment.id, message);
            self.abandon(&deployment.id, request.as_ref(), &message).await;
            return Ok(Recovery::Failed);
        }

        let Some(request) = request else {
            warn!(
                "Deployment {} has build job {} but no repository to resume with",
                deployment.id, job.id
            );
            self.abandon(&deployment.id, None, "Build interrupted").await;
            return Ok(Recovery::Failed);
        };
        self.launch(Work::Resume(request, job))?;
        Ok(Recovery::Resumed)
    }

    async fn run(
        &self,
        request: &BuildRequest,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), PlatformError> {
        let deployment_id = request.deployment_id.as_str();

        let repository = self
            .store
            .get_repository(&request.repository_id)
            .await?
            .ok_or_else(|| {
                PlatformError::NotFound(format!("Linked repository {}", request.repository_id))
            })?;
        self.store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("Deployment {}", deployment_id)))?;
        let container = self
            .store
            .get_container(&repository.container_id)
            .await?
            .ok_or_else(|| {
                PlatformError::NotFound(format!("Container {}", repository.container_id))
            })?;

        self.recorder
            .open_step(
                deployment_id,
                phases::INITIALIZING,
                &format!("Initializing build for {}", repository.full_name),
            )
            .await?;

        // Credentials for cloning the source
        self.recorder
            .open_step(
                deployment_id,
                phases::AUTHENTICATING,
                "Authenticating with source control",
            )
            .await?;
        let token = self
            .source_control
            .access_token(&repository.owner_id)
            .await
            .map_err(|e| stage_error("Authentication failed", e))?;
        self.recorder
            .close_step(
                deployment_id,
                phases::AUTHENTICATING,
                StepStatus::Completed,
                "Source-control authentication successful",
            )
            .await?;

        // Submit the job
        let env = build_environment(
            &repository,
            &container.owner_id,
            &request.commit_sha,
            &token,
            &self.options.registry,
        );
        self.recorder
            .open_step(deployment_id, phases::STARTING_BUILD, "Submitting build job")
            .await?;
        let job_id = self
            .builds
            .submit_job(&env)
            .await
            .map_err(|e| stage_error("Failed to start build", e))?;
        info!("Build job {} submitted for deployment {}", job_id, deployment_id);

        self.recorder
            .merge_metadata(
                deployment_id,
                BTreeMap::from([(meta::BUILD_JOB_ID.to_string(), job_id.clone())]),
            )
            .await?;
        self.recorder.start(deployment_id).await?;
        self.recorder
            .close_step(
                deployment_id,
                phases::STARTING_BUILD,
                StepStatus::Completed,
                &format!("Build job {} started", job_id),
            )
            .await?;

        if let Some(mut repository) = self.store.get_repository(&repository.id).await? {
            repository.last_deployed_commit = Some(request.commit_sha.clone());
            repository.last_deployed_at = Some(Utc::now());
            self.store.put_repository(&repository).await?;
        }

        let outcome = self.poll(deployment_id, &job_id, shutdown).await?;
        self.finish(request, &repository.container_id, outcome).await
    }

    async fn resume(
        &self,
        request: &BuildRequest,
        job: BuildJob,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), PlatformError> {
        let deployment_id = request.deployment_id.as_str();
        let repository = self
            .store
            .get_repository(&request.repository_id)
            .await?
            .ok_or_else(|| {
                PlatformError::NotFound(format!("Linked repository {}", request.repository_id))
            })?;

        self.recorder.start(deployment_id).await?;
        self.recorder
            .log(deployment_id, &format!("Resuming build job {}", job.id));

        let outcome = match job.status {
            BuildStatus::Succeeded => PollOutcome::Succeeded,
            _ => self.poll(deployment_id, &job.id, shutdown).await?,
        };
        self.finish(request, &repository.container_id, outcome).await
    }

    async fn finish(
        &self,
        request: &BuildRequest,
        container_id: &str,
        outcome: PollOutcome,
    ) -> Result<(), PlatformError> {
        match outcome {
            PollOutcome::Succeeded => self.roll_out(request, container_id).await,
            PollOutcome::Failed(message) => {
                self.fail(request, &message).await;
                Ok(())
            }
        }
    }

    /// Poll the job until it finishes, times out or the executor shuts down
    async fn poll(
        &self,
        deployment_id: &str,
        job_id: &str,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<PollOutcome, PlatformError> {
        let mut last_phase: Option<String> = None;
        let mut attempt = 0;

        while attempt < self.options.max_poll_attempts {
            tokio::select! {
                _ = shutdown.recv() => {
                    warn!("Build for deployment {} interrupted by shutdown", deployment_id);
                    return Ok(PollOutcome::Failed("Build interrupted".to_string()));
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
            attempt += 1;

            let job = match self.builds.get_job(job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    return Ok(PollOutcome::Failed(format!("Build job {} not found", job_id)));
                }
                Err(e) => {
                    warn!(
                        "Poll {} of build {} failed: {}",
                        attempt, job_id, e
                    );
                    continue;
                }
            };
            debug!(
                "Build {} status {} phase {:?}",
                job_id,
                job.status.as_str(),
                job.current_phase
            );

            match job.status {
                BuildStatus::Succeeded => {
                    if let Some(phase) = last_phase.as_deref() {
                        let (step, _) = phases::step_for(phase);
                        self.recorder
                            .close_step(
                                deployment_id,
                                &step,
                                StepStatus::Completed,
                                &phases::completed_message(phase),
                            )
                            .await?;
                    }
                    info!("Build {} succeeded", job_id);
                    return Ok(PollOutcome::Succeeded);
                }
                status if status.is_failure() => {
                    return Ok(PollOutcome::Failed(job.failure_message()));
                }
                _ => {}
            }

            if let Some(phase) = job.current_phase.as_deref() {
                if last_phase.as_deref() != Some(phase) {
                    let (step, message) = phases::step_for(phase);
                    if let Some(previous) = last_phase.as_deref() {
                        let (previous_step, _) = phases::step_for(previous);
                        // Phases sharing a step only refresh its message
                        if previous_step != step {
                            self.recorder
                                .close_step(
                                    deployment_id,
                                    &previous_step,
                                    StepStatus::Completed,
                                    &phases::completed_message(previous),
                                )
                                .await?;
                        }
                    }
                    self.recorder
                        .open_step(deployment_id, &step, &message)
                        .await?;
                    self.recorder
                        .log(deployment_id, &format!("Build phase {}", phase));
                    last_phase = Some(phase.to_string());
                }
            }
        }

        warn!(
            "Build {} timed out after {} polls",
            job_id, self.options.max_poll_attempts
        );
        Ok(PollOutcome::Failed("Build timed out".to_string()))
    }

    /// Deploy the freshly built image and finish the deployment
    async fn roll_out(&self, request: &BuildRequest, container_id: &str) -> Result<(), PlatformError> {
        let deployment_id = request.deployment_id.as_str();

        if let Some(latest) = self.store.latest_deployment(container_id).await? {
            if latest.id != deployment_id {
                let message = format!("Superseded by deployment {}", latest.id);
                info!("Deployment {} {}", deployment_id, message.to_lowercase());
                self.recorder.fail(deployment_id, &message).await?;
                return Ok(());
            }
        }

        self.recorder
            .open_step(deployment_id, phases::DEPLOYING, "Deploying container")
            .await?;

        let current = self
            .store
            .get_container(container_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("Container {}", container_id)))?;
        next_status(current.status, LifecycleEvent::Rollout)?;

        let mut candidate = current.clone();
        candidate.image = self.options.registry.image_base(&current.owner_id);
        candidate.image_tag = image_tag(&request.commit_sha);

        // Recorded ahead of the upsert so the reconciler can find the service
        let service_ref = current
            .service_ref
            .clone()
            .unwrap_or_else(|| current.service_name());
        let new_image = candidate.image_ref();
        self.recorder
            .update(deployment_id, move |deployment| {
                deployment.set_meta(meta::SERVICE_REF, service_ref);
                deployment.new_image = Some(new_image);
            })
            .await?;

        let handles = self
            .orchestration
            .deploy(&candidate)
            .await
            .map_err(|e| stage_error("Deployment failed", e))?;

        // Re-read so the write below only replaces what this rollout owns
        let mut container = self
            .store
            .get_container(container_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("Container {}", container_id)))?;
        container.status = next_status(container.status, LifecycleEvent::Rollout)?;
        container.image = candidate.image.clone();
        container.image_tag = candidate.image_tag.clone();
        container.task_definition_ref = Some(handles.task_definition_ref.clone());
        container.service_ref = Some(handles.service_ref.clone());
        container.task_ref = handles.task_ref.clone();
        container.deployment_count += 1;
        container.last_deployed_at = Some(Utc::now());
        container.touch();
        self.store.put_container(&container).await?;
        info!(
            "Container {} now running {}",
            container.id,
            container.image_ref()
        );

        let service_ref = handles.service_ref.clone();
        self.recorder
            .update(deployment_id, move |deployment| {
                deployment.set_meta(meta::SERVICE_REF, service_ref);
            })
            .await?;

        self.health.start_monitoring(&container);

        self.recorder
            .close_step(
                deployment_id,
                phases::DEPLOYING,
                StepStatus::Completed,
                "Container deployed",
            )
            .await?;
        if !self
            .recorder
            .complete(deployment_id, "Deployment completed successfully")
            .await?
        {
            debug!("Deployment {} was already terminal", deployment_id);
        }

        if let Some(mut repository) = self.store.get_repository(&request.repository_id).await? {
            repository.last_error = None;
            self.store.put_repository(&repository).await?;
        }
        Ok(())
    }

    async fn abandon(&self, deployment_id: &str, request: Option<&BuildRequest>, message: &str) {
        match request {
            Some(request) => self.fail(request, message).await,
            None => {
                if let Err(e) = self.recorder.fail(deployment_id, message).await {
                    error!("Unable to mark deployment {} failed: {}", deployment_id, e);
                }
            }
        }
    }

    /// Mark the deployment FAILED and record the error on the repository
    async fn fail(&self, request: &BuildRequest, message: &str) {
        match self.recorder.fail(&request.deployment_id, message).await {
            Ok(true) => {}
            Ok(false) => debug!(
                "Deployment {} already terminal, not failing",
                request.deployment_id
            ),
            Err(e) => error!(
                "Unable to mark deployment {} failed: {}",
                request.deployment_id, e
            ),
        }

        match self.store.get_repository(&request.repository_id).await {
            Ok(Some(mut repository)) => {
                repository.last_error = Some(message.to_string());
                if let Err(e) = self.store.put_repository(&repository).await {
                    error!("Unable to record error on repository {}: {}", repository.id, e);
                }
            }
            Ok(None) => {}
            Err(e) => error!(
                "Unable to load repository {}: {}",
                request.repository_id, e
            ),
        }
    }
}

fn stage_error(stage: &str, err: PlatformError) -> PlatformError {
    match err {
        PlatformError::NotFound(_) => err,
        other => PlatformError::Internal(format!("{}: {}", stage, other.reason())),
    }
}

fn failure_message(err: &PlatformError) -> String {
    match err {
        PlatformError::Internal(message) => message.clone(),
        other => other.reason(),
    }
}
