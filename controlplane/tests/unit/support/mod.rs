//! Fake backends and a wired control plane for the unit tests

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_models::requests::CreateContainerRequest;
use async_trait::async_trait;
use secrecy::SecretString;

use berth::app::options::AppOptions;
use berth::app::state::{AppState, Backends};
use berth::backends::{BuildBackend, BuildJob, BuildStatus, Dimensions, MetricsBackend, SourceControl};
use berth::errors::PlatformError;
use berth::health::probe::{HealthProbe, ProbeOutcome};
use berth::models::account::Plan;
use berth::models::container::Container;
use berth::models::deployment::Deployment;
use berth::models::repository::LinkedRepository;
use berth::orchestration::{
    OrchestrationBackend, RolloutState, ServiceDescription, ServiceSpec, ServiceUpdate,
    TaskHealth, TaskSpec, TaskState, SERVICE_ACTIVE,
};
use berth::persistence::memory::{MemoryAccounts, MemoryStore};
use berth::persistence::{Accounts, Store};

pub const OWNER: &str = "owner-1";
pub const OTHER_OWNER: &str = "owner-2";
pub const REPO_FULL_NAME: &str = "octo/app";
pub const WEBHOOK_SECRET: &str = "webhook-secret";

// ================================ ORCHESTRATION ================================= //

#[derive(Default)]
struct OrchestrationState {
    services: BTreeMap<String, ServiceDescription>,
    names: BTreeMap<String, String>,
    tasks: BTreeMap<String, TaskState>,
    specs: Vec<TaskSpec>,
    updates: Vec<(String, ServiceUpdate)>,
    deleted: Vec<String>,
}

impl OrchestrationState {
    fn resolve(&self, service: &str) -> Option<String> {
        if self.services.contains_key(service) {
            return Some(service.to_string());
        }
        self.names.get(service).cloned()
    }
}

/// Orchestration backend whose services are driven by the test
#[derive(Default)]
pub struct FakeOrchestration {
    state: Mutex<OrchestrationState>,
    pub fail_register: AtomicBool,
    pub fail_describe: AtomicBool,
}

impl FakeOrchestration {
    /// Every desired task running, rollout completed
    pub fn settle(&self, service_ref: &str) {
        self.mutate_service(service_ref, |service| {
            service.running_count = service.desired_count;
            service.pending_count = 0;
            service.rollout_state = Some(RolloutState::Completed);
        });
    }

    pub fn set_rollout(&self, service_ref: &str, state: Option<RolloutState>, reason: Option<&str>) {
        self.mutate_service(service_ref, |service| {
            service.rollout_state = state;
            service.rollout_reason = reason.map(str::to_string);
        });
    }

    pub fn mutate_service<F: FnOnce(&mut ServiceDescription)>(&self, service_ref: &str, f: F) {
        let mut state = self.state.lock().unwrap();
        let key = state.resolve(service_ref).expect("service exists");
        f(state.services.get_mut(&key).expect("service exists"));
    }

    pub fn remove_service(&self, service_ref: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = state.resolve(service_ref) {
            state.services.remove(&key);
            state.names.retain(|_, value| *value != key);
        }
    }

    pub fn set_task_health(&self, service_ref: &str, health: TaskHealth) {
        let mut state = self.state.lock().unwrap();
        let key = state.resolve(service_ref).expect("service exists");
        let task_refs = state.services[&key].task_refs.clone();
        for task_ref in task_refs {
            if let Some(task) = state.tasks.get_mut(&task_ref) {
                task.health_status = health;
            }
        }
    }

    pub fn service(&self, service_ref: &str) -> Option<ServiceDescription> {
        let state = self.state.lock().unwrap();
        state
            .resolve(service_ref)
            .and_then(|key| state.services.get(&key).cloned())
    }

    pub fn specs(&self) -> Vec<TaskSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    pub fn updates(&self) -> Vec<(String, ServiceUpdate)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl OrchestrationBackend for FakeOrchestration {
    async fn register_task_definition(&self, spec: &TaskSpec) -> Result<String, PlatformError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(PlatformError::backend("orchestration", "task definition rejected"));
        }
        let mut state = self.state.lock().unwrap();
        state.specs.push(spec.clone());
        Ok(format!("{}:{}", spec.family, state.specs.len()))
    }

    async fn describe_service(
        &self,
        service: &str,
    ) -> Result<Option<ServiceDescription>, PlatformError> {
        if self.fail_describe.load(Ordering::SeqCst) {
            return Err(PlatformError::backend("orchestration", "throttled"));
        }
        Ok(self.service(service))
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, PlatformError> {
        let mut state = self.state.lock().unwrap();
        let service_ref = format!("svc/{}", spec.name);
        let task_ref = format!("task/{}", spec.name);
        state.services.insert(
            service_ref.clone(),
            ServiceDescription {
                service_ref: service_ref.clone(),
                status: SERVICE_ACTIVE.to_string(),
                running_count: 0,
                desired_count: spec.desired_count,
                pending_count: spec.desired_count,
                rollout_state: Some(RolloutState::InProgress),
                rollout_reason: None,
                task_refs: vec![task_ref.clone()],
            },
        );
        state.names.insert(spec.name.clone(), service_ref.clone());
        state.tasks.insert(
            task_ref.clone(),
            TaskState {
                task_ref,
                last_status: "RUNNING".to_string(),
                health_status: TaskHealth::Healthy,
            },
        );
        Ok(service_ref)
    }

    async fn update_service(
        &self,
        service_ref: &str,
        update: &ServiceUpdate,
    ) -> Result<String, PlatformError> {
        let mut state = self.state.lock().unwrap();
        let key = state
            .resolve(service_ref)
            .ok_or_else(|| PlatformError::NotFound(format!("Service {}", service_ref)))?;
        state.updates.push((key.clone(), update.clone()));

        let service = state
            .services
            .get_mut(&key)
            .ok_or_else(|| PlatformError::NotFound(format!("Service {}", service_ref)))?;
        if let Some(desired) = update.desired_count {
            service.desired_count = desired;
            if desired == 0 {
                service.running_count = 0;
                service.pending_count = 0;
            }
        }
        if update.force_new_deployment {
            service.running_count = 0;
            service.pending_count = service.desired_count;
            service.rollout_state = Some(RolloutState::InProgress);
        }
        Ok(key)
    }

    async fn describe_tasks(&self, task_refs: &[String]) -> Result<Vec<TaskState>, PlatformError> {
        let state = self.state.lock().unwrap();
        Ok(task_refs
            .iter()
            .filter_map(|task_ref| state.tasks.get(task_ref).cloned())
            .collect())
    }

    async fn delete_service(&self, service_ref: &str, _force: bool) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = state.resolve(service_ref) {
            state.services.remove(&key);
            state.names.retain(|_, value| *value != key);
            state.deleted.push(key);
        }
        Ok(())
    }
}

// =================================== BUILDS ===================================== //

/// Build backend replaying a scripted sequence of job snapshots.
///
/// Each poll takes the next snapshot; the last one repeats.
#[derive(Default)]
pub struct FakeBuilds {
    script: Mutex<VecDeque<BuildJob>>,
    last: Mutex<Option<BuildJob>>,
    submitted: Mutex<Vec<BTreeMap<String, String>>>,
    pub fail_submit: AtomicBool,
}

impl FakeBuilds {
    pub fn script(&self, jobs: Vec<BuildJob>) {
        *self.script.lock().unwrap() = jobs.into();
        *self.last.lock().unwrap() = None;
    }

    pub fn submitted(&self) -> Vec<BTreeMap<String, String>> {
        self.submitted.lock().unwrap().clone()
    }
}

pub fn job(status: BuildStatus, phase: Option<&str>) -> BuildJob {
    BuildJob {
        id: "build-1".to_string(),
        status,
        current_phase: phase.map(str::to_string),
        phase_context: None,
    }
}

#[async_trait]
impl BuildBackend for FakeBuilds {
    async fn submit_job(&self, env: &BTreeMap<String, String>) -> Result<String, PlatformError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(PlatformError::backend("build", "project does not exist"));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(env.clone());
        Ok(format!("build-{}", submitted.len()))
    }

    async fn get_job(&self, _job_id: &str) -> Result<Option<BuildJob>, PlatformError> {
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(job) = next {
            *last = Some(job);
        }
        Ok(last.clone())
    }
}

// =================================== METRICS ==================================== //

#[derive(Default)]
pub struct FakeMetrics {
    values: Mutex<BTreeMap<String, f64>>,
    puts: Mutex<Vec<(String, String, f64)>>,
    pub fail_reads: AtomicBool,
}

impl FakeMetrics {
    pub fn set(&self, metric: &str, value: f64) {
        self.values.lock().unwrap().insert(metric.to_string(), value);
    }

    /// `(namespace, metric, value)` for every reported data point
    pub fn puts(&self) -> Vec<(String, String, f64)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsBackend for FakeMetrics {
    async fn average(
        &self,
        _namespace: &str,
        metric: &str,
        _dimensions: &Dimensions,
        _window: Duration,
    ) -> Result<f64, PlatformError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PlatformError::backend("metrics", "unavailable"));
        }
        Ok(self.values.lock().unwrap().get(metric).copied().unwrap_or(0.0))
    }

    async fn put_metric(
        &self,
        namespace: &str,
        metric: &str,
        value: f64,
        _dimensions: &Dimensions,
    ) -> Result<(), PlatformError> {
        self.puts
            .lock()
            .unwrap()
            .push((namespace.to_string(), metric.to_string(), value));
        Ok(())
    }
}

// =============================== SOURCE CONTROL ================================= //

pub struct FakeSourceControl {
    pub token: Mutex<Option<String>>,
    pub head: Mutex<Option<String>>,
}

impl Default for FakeSourceControl {
    fn default() -> Self {
        Self {
            token: Mutex::new(Some("scm-token".to_string())),
            head: Mutex::new(Some("abcdef1234567890".to_string())),
        }
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn access_token(&self, owner_id: &str) -> Result<SecretString, PlatformError> {
        self.token
            .lock()
            .unwrap()
            .clone()
            .map(SecretString::from)
            .ok_or_else(|| {
                PlatformError::Unauthorized(format!("No source-control connection for {}", owner_id))
            })
    }

    async fn head_commit(
        &self,
        _full_name: &str,
        _branch: &str,
        _token: &SecretString,
    ) -> Result<Option<String>, PlatformError> {
        Ok(self.head.lock().unwrap().clone())
    }
}

// ==================================== PROBE ===================================== //

pub struct FakeProbe {
    outcome: Mutex<ProbeOutcome>,
    pub calls: AtomicUsize,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(ProbeOutcome::healthy()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeProbe {
    pub fn respond(&self, outcome: ProbeOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, _container: &Container, _path: &str, _timeout: Duration) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().unwrap().clone()
    }
}

// ================================== PLATFORM ==================================== //

/// Options with fast build polling and background timers parked
pub fn test_options() -> AppOptions {
    let mut options = AppOptions::default();
    options.executor.poll_interval = Duration::from_millis(5);
    options.executor.max_poll_attempts = 400;
    options.health.initial_delay = Duration::from_secs(3600);
    options.health.default_interval = Duration::from_secs(3600);
    options.events.poll_interval = Duration::from_secs(3600);
    options
}

pub struct Platform {
    pub store: Arc<MemoryStore>,
    pub accounts: Arc<MemoryAccounts>,
    pub orchestration: Arc<FakeOrchestration>,
    pub builds: Arc<FakeBuilds>,
    pub metrics: Arc<FakeMetrics>,
    pub source_control: Arc<FakeSourceControl>,
    pub probe: Arc<FakeProbe>,
    pub app: AppState,
}

impl Platform {
    pub fn new() -> Self {
        Self::with_options(test_options())
    }

    pub fn with_options(options: AppOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let accounts = Arc::new(MemoryAccounts::new());
        accounts.insert_owner(OWNER, Plan::Pro);
        accounts.insert_owner(OTHER_OWNER, Plan::Free);

        let orchestration = Arc::new(FakeOrchestration::default());
        let builds = Arc::new(FakeBuilds::default());
        let metrics = Arc::new(FakeMetrics::default());
        let source_control = Arc::new(FakeSourceControl::default());
        let probe = Arc::new(FakeProbe::default());

        let backends = Backends {
            store: store.clone(),
            accounts: accounts.clone(),
            orchestration: orchestration.clone(),
            builds: builds.clone(),
            metrics: metrics.clone(),
            source_control: source_control.clone(),
            probe: probe.clone(),
        };
        let app = AppState::new(&options, backends);

        Self {
            store,
            accounts,
            orchestration,
            builds,
            metrics,
            source_control,
            probe,
            app,
        }
    }

    pub async fn create_container(&self, name: &str) -> Container {
        self.app
            .containers
            .create(OWNER, create_request(name, "nginx"))
            .await
            .unwrap()
    }

    /// A container deployed through the container service
    pub async fn running_container(&self, name: &str) -> (Container, Deployment) {
        let container = self.create_container(name).await;
        let container = self.app.containers.deploy(&container.id, OWNER).await.unwrap();
        let deployment = self
            .store
            .latest_deployment(&container.id)
            .await
            .unwrap()
            .unwrap();
        (container, deployment)
    }

    pub async fn link_repository(&self, container: &Container) -> LinkedRepository {
        let repository = LinkedRepository {
            id: format!("repo-{}", container.name),
            owner_id: container.owner_id.clone(),
            container_id: container.id.clone(),
            full_name: REPO_FULL_NAME.to_string(),
            deploy_branch: "main".to_string(),
            root_directory: None,
            dockerfile_path: None,
            build_variables: BTreeMap::new(),
            auto_deploy: true,
            webhook_secret: Some(SecretString::from(WEBHOOK_SECRET.to_string())),
            last_error: None,
            last_deployed_commit: None,
            last_deployed_at: None,
        };
        self.store.put_repository(&repository).await.unwrap();
        repository
    }

    pub async fn container(&self, id: &str) -> Option<Container> {
        self.store.get_container(id).await.unwrap()
    }

    pub async fn deployment(&self, id: &str) -> Deployment {
        self.store.get_deployment(id).await.unwrap().unwrap()
    }

    pub async fn repository(&self, id: &str) -> LinkedRepository {
        self.store.get_repository(id).await.unwrap().unwrap()
    }

    pub async fn container_count(&self, owner_id: &str) -> i64 {
        self.accounts
            .owner(owner_id)
            .await
            .unwrap()
            .unwrap()
            .container_count
    }

    /// Wait for a deployment to reach a terminal status
    pub async fn wait_terminal(&self, id: &str) -> Deployment {
        let store = self.store.clone();
        let id = id.to_string();
        eventually(|| {
            let store = store.clone();
            let id = id.clone();
            async move {
                store
                    .get_deployment(&id)
                    .await
                    .unwrap()
                    .map(|deployment| deployment.is_terminal())
                    .unwrap_or(false)
            }
        })
        .await;
        self.deployment(&id).await
    }
}

pub fn create_request(name: &str, image: &str) -> CreateContainerRequest {
    CreateContainerRequest {
        name: name.to_string(),
        image: image.to_string(),
        image_tag: "latest".to_string(),
        cpu: None,
        memory: None,
        port: None,
        environment: BTreeMap::new(),
        health_check_path: None,
    }
}

/// Poll `check` until it holds, failing the test after a few seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
