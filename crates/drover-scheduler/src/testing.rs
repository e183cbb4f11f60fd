//! Hand-written collaborators shared by the scheduler tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use drover_core::{
    AccessLevel, BranchInfo, Build, BuildExecutable, BuildStatus, Error, ExecutorInfo, Log,
    Pipeline, PullRequestInfo, QueueService, Repo, ResourceId, Result, ScmClient, Service, Step,
    User, Worker, WorkerAffinity, WorkerClient,
};
use drover_db::{
    BuildFilter, BuildRepo, DbError, DbResult, ExecutableRepo, LogRepo, MemoryStore, PipelineRepo,
    RepoRepo, ServiceRepo, StepRepo, Store, UserRepo, WorkerRepo,
};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

pub const PIPELINE: &str = r#"
    step "test" {
        image "rust:1.85"
        run "cargo test"
    }
"#;

pub fn memory_store() -> Store {
    Store::memory(MemoryStore::new())
}

/// Seed an owner and the `octo/widgets` repository it owns.
pub async fn fixture(store: &Store) -> (Repo, User) {
    let owner = store
        .users
        .create(&User {
            id: ResourceId::new(),
            name: "octocat".to_string(),
            token: "owner-token".to_string(),
            active: true,
            admin: false,
        })
        .await
        .unwrap();
    let repo = store
        .repos
        .create(&Repo::new(owner.id, "octo", "widgets"))
        .await
        .unwrap();
    (repo, owner)
}

pub async fn register_worker(store: &Store, hostname: &str) -> Worker {
    store
        .workers
        .upsert(&Worker {
            id: ResourceId::new(),
            hostname: hostname.to_string(),
            address: format!("http://{}:8080", hostname),
            routes: vec!["drover".to_string()],
            active: true,
            last_checked_in: None,
        })
        .await
        .unwrap()
}

pub struct MockScm {
    pub access: AccessLevel,
    pub fail_access: bool,
    pub contributor: bool,
    pub fail_contributor: bool,
    pub config: Bytes,
    /// Number of config fetches that fail before one succeeds.
    pub config_failures: AtomicU32,
    pub files: Vec<String>,
    pub statuses: Mutex<Vec<(i64, BuildStatus)>>,
    pub next_check: AtomicI64,
}

impl Default for MockScm {
    fn default() -> Self {
        Self {
            access: AccessLevel::Admin,
            fail_access: false,
            contributor: false,
            fail_contributor: false,
            config: Bytes::from_static(PIPELINE.as_bytes()),
            config_failures: AtomicU32::new(0),
            files: Vec::new(),
            statuses: Mutex::new(Vec::new()),
            next_check: AtomicI64::new(1),
        }
    }
}

impl MockScm {
    pub fn with_config(config: &'static str) -> Self {
        Self {
            config: Bytes::from_static(config.as_bytes()),
            ..Default::default()
        }
    }

    /// Posted commit statuses as (build number, status).
    pub fn statuses(&self) -> Vec<(i64, BuildStatus)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScmClient for MockScm {
    async fn repo_access(&self, _: &str, _: &str, _: &str, _: &str) -> Result<AccessLevel> {
        if self.fail_access {
            return Err(Error::Scm("access lookup failed".to_string()));
        }
        Ok(self.access)
    }

    async fn repo_contributor(&self, _: &User, _: &str, _: &str, _: &str) -> Result<bool> {
        if self.fail_contributor {
            return Err(Error::Scm("contributor lookup failed".to_string()));
        }
        Ok(self.contributor)
    }

    async fn changeset(&self, _: &User, _: &Repo, _: &str) -> Result<Vec<String>> {
        Ok(self.files.clone())
    }

    async fn changeset_pr(&self, _: &User, _: &Repo, _: i64) -> Result<Vec<String>> {
        Ok(self.files.clone())
    }

    async fn config_backoff(&self, _: &User, _: &Repo, _: &str) -> Result<Bytes> {
        let remaining = self.config_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.config_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Scm("config unavailable".to_string()));
        }
        Ok(self.config.clone())
    }

    async fn get_branch(&self, _: &User, _: &Repo, branch: &str) -> Result<BranchInfo> {
        Ok(BranchInfo {
            name: branch.to_string(),
            commit: "branch-head".to_string(),
        })
    }

    async fn get_pull_request(&self, _: &User, _: &Repo, number: i64) -> Result<PullRequestInfo> {
        Ok(PullRequestInfo {
            commit: "pr-head".to_string(),
            branch: "main".to_string(),
            base_ref: "main".to_string(),
            head_ref: format!("feature-{}", number),
        })
    }

    async fn status(&self, _: &User, build: &Build, _: &Repo) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((build.number, build.status));
        Ok(())
    }

    async fn step_status(&self, _: &User, _: &Build, _: &Step, _: &Repo) -> Result<()> {
        Ok(())
    }

    async fn create_check(&self, _: &User, _: &Build, _: &str, _: &Repo) -> Result<i64> {
        Ok(self.next_check.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct MockWorkers {
    executors: Vec<ExecutorInfo>,
    cancels: AtomicU32,
}

impl MockWorkers {
    /// A worker with one executor busy with `build_id`.
    pub fn running(executor_id: i64, build_id: ResourceId) -> Self {
        Self {
            executors: vec![ExecutorInfo {
                id: executor_id,
                host: "worker-1".to_string(),
                runtime: "docker".to_string(),
                distribution: "linux".to_string(),
                running: true,
                build_id: Some(build_id),
            }],
            cancels: AtomicU32::new(0),
        }
    }

    pub fn cancel_calls(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerClient for MockWorkers {
    async fn list_executors(&self, _: &Worker) -> Result<Vec<ExecutorInfo>> {
        Ok(self.executors.clone())
    }

    async fn cancel_build(&self, _: &Worker, _: i64) -> Result<Build> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(Build {
            status: BuildStatus::Canceled,
            finished: Some(Utc::now()),
            ..Default::default()
        })
    }
}

/// Queue whose first `n` pushes fail.
pub struct FlakyQueue {
    failures: AtomicU32,
    pushed: Mutex<Vec<ResourceId>>,
}

impl FlakyQueue {
    pub fn failing(n: u32) -> Self {
        Self {
            failures: AtomicU32::new(n),
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub fn pushed(&self) -> Vec<ResourceId> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueService for FlakyQueue {
    fn route(&self, _: &WorkerAffinity) -> Result<String> {
        Ok("drover".to_string())
    }

    async fn push(&self, _: &str, build_id: ResourceId) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Queue("broker unavailable".to_string()));
        }
        self.pushed.lock().unwrap().push(build_id);
        Ok(())
    }

    async fn pop(&self, _: &[String]) -> Result<Option<ResourceId>> {
        Ok(self.pushed.lock().unwrap().pop())
    }
}

/// Repository table where another writer claims the next number just
/// before each of the first `n` counter increments.
pub struct RacingRepos {
    inner: Arc<dyn RepoRepo>,
    races: AtomicU32,
}

impl RacingRepos {
    pub fn wrap(store: &mut Store, races: u32) {
        store.repos = Arc::new(Self {
            inner: store.repos.clone(),
            races: AtomicU32::new(races),
        });
    }
}

#[async_trait]
impl RepoRepo for RacingRepos {
    async fn create(&self, repo: &Repo) -> DbResult<Repo> {
        self.inner.create(repo).await
    }
    async fn get(&self, id: ResourceId) -> DbResult<Repo> {
        self.inner.get(id).await
    }
    async fn get_for_org(&self, org: &str, name: &str) -> DbResult<Repo> {
        self.inner.get_for_org(org, name).await
    }
    async fn update(&self, repo: &Repo) -> DbResult<Repo> {
        self.inner.update(repo).await
    }
    async fn increment_counter(&self, id: ResourceId, expected: i64) -> DbResult<Repo> {
        let remaining = self.races.load(Ordering::SeqCst);
        if remaining > 0 {
            self.races.store(remaining - 1, Ordering::SeqCst);
            self.inner.increment_counter(id, expected).await?;
        }
        self.inner.increment_counter(id, expected).await
    }
}

/// Step table whose first `n` inserts fail.
pub struct FlakySteps {
    inner: Arc<dyn StepRepo>,
    failures: AtomicU32,
}

impl FlakySteps {
    pub fn wrap(store: &mut Store, failures: u32) {
        store.steps = Arc::new(Self {
            inner: store.steps.clone(),
            failures: AtomicU32::new(failures),
        });
    }
}

#[async_trait]
impl StepRepo for FlakySteps {
    async fn create(&self, step: &Step) -> DbResult<Step> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return unavailable();
        }
        self.inner.create(step).await
    }
    async fn update(&self, step: &Step) -> DbResult<Step> {
        self.inner.update(step).await
    }
    async fn list_for_build(&self, build_id: ResourceId) -> DbResult<Vec<Step>> {
        self.inner.list_for_build(build_id).await
    }
}

/// Store where every call fails.
pub struct FailingStore;

impl FailingStore {
    pub fn store() -> Store {
        let failing = Arc::new(FailingStore);
        Store {
            builds: failing.clone(),
            steps: failing.clone(),
            services: failing.clone(),
            logs: failing.clone(),
            pipelines: failing.clone(),
            executables: failing.clone(),
            repos: failing.clone(),
            users: failing.clone(),
            workers: failing,
        }
    }
}

fn unavailable<T>() -> DbResult<T> {
    Err(DbError::InvalidData("store unavailable".to_string()))
}

#[async_trait]
impl BuildRepo for FailingStore {
    async fn create(&self, _: &Build) -> DbResult<Build> {
        unavailable()
    }
    async fn update(&self, _: &Build) -> DbResult<Build> {
        unavailable()
    }
    async fn get(&self, _: ResourceId) -> DbResult<Build> {
        unavailable()
    }
    async fn get_for_repo(&self, _: ResourceId, _: i64) -> DbResult<Build> {
        unavailable()
    }
    async fn delete(&self, _: ResourceId) -> DbResult<()> {
        unavailable()
    }
    async fn count_for_repo(&self, _: ResourceId, _: &BuildFilter) -> DbResult<i64> {
        unavailable()
    }
    async fn list_for_repo(
        &self,
        _: ResourceId,
        _: &BuildFilter,
        _: i64,
        _: i64,
    ) -> DbResult<Vec<Build>> {
        unavailable()
    }
    async fn list_for_org(&self, _: &str, _: &BuildFilter, _: i64, _: i64) -> DbResult<Vec<Build>> {
        unavailable()
    }
}

#[async_trait]
impl StepRepo for FailingStore {
    async fn create(&self, _: &Step) -> DbResult<Step> {
        unavailable()
    }
    async fn update(&self, _: &Step) -> DbResult<Step> {
        unavailable()
    }
    async fn list_for_build(&self, _: ResourceId) -> DbResult<Vec<Step>> {
        unavailable()
    }
}

#[async_trait]
impl ServiceRepo for FailingStore {
    async fn create(&self, _: &Service) -> DbResult<Service> {
        unavailable()
    }
    async fn update(&self, _: &Service) -> DbResult<Service> {
        unavailable()
    }
    async fn list_for_build(&self, _: ResourceId) -> DbResult<Vec<Service>> {
        unavailable()
    }
}

#[async_trait]
impl LogRepo for FailingStore {
    async fn create(&self, _: &Log) -> DbResult<Log> {
        unavailable()
    }
    async fn get_for_step(&self, _: ResourceId) -> DbResult<Log> {
        unavailable()
    }
    async fn get_for_service(&self, _: ResourceId) -> DbResult<Log> {
        unavailable()
    }
}

#[async_trait]
impl PipelineRepo for FailingStore {
    async fn create(&self, _: &Pipeline) -> DbResult<Pipeline> {
        unavailable()
    }
    async fn get_for_repo(&self, _: ResourceId, _: &str) -> DbResult<Pipeline> {
        unavailable()
    }
}

#[async_trait]
impl ExecutableRepo for FailingStore {
    async fn create(&self, _: &BuildExecutable) -> DbResult<()> {
        unavailable()
    }
    async fn pop(&self, _: ResourceId) -> DbResult<BuildExecutable> {
        unavailable()
    }
}

#[async_trait]
impl RepoRepo for FailingStore {
    async fn create(&self, _: &Repo) -> DbResult<Repo> {
        unavailable()
    }
    async fn get(&self, _: ResourceId) -> DbResult<Repo> {
        unavailable()
    }
    async fn get_for_org(&self, _: &str, _: &str) -> DbResult<Repo> {
        unavailable()
    }
    async fn update(&self, _: &Repo) -> DbResult<Repo> {
        unavailable()
    }
    async fn increment_counter(&self, _: ResourceId, _: i64) -> DbResult<Repo> {
        unavailable()
    }
}

#[async_trait]
impl UserRepo for FailingStore {
    async fn create(&self, _: &User) -> DbResult<User> {
        unavailable()
    }
    async fn get(&self, _: ResourceId) -> DbResult<User> {
        unavailable()
    }
    async fn get_by_name(&self, _: &str) -> DbResult<User> {
        unavailable()
    }
}

#[async_trait]
impl WorkerRepo for FailingStore {
    async fn upsert(&self, _: &Worker) -> DbResult<Worker> {
        unavailable()
    }
    async fn get_by_hostname(&self, _: &str) -> DbResult<Worker> {
        unavailable()
    }
    async fn list(&self) -> DbResult<Vec<Worker>> {
        unavailable()
    }
}
