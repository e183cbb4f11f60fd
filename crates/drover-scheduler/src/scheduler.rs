//! Admission facade wiring the build lifecycle together.

use drover_config::SchedulerSettings;
use drover_core::{
    Build, BuildExecutable, BuildUpdate, CompileMetadata, Compiler, QueueService, Repo,
    ResourceId, ScmClient, TriggerSource, User, WorkerClient,
};
use drover_db::Store;
use std::sync::Arc;
use tracing::{info, warn};

use crate::autocancel::{auto_cancel, should_auto_cancel};
use crate::error::{DbContext, SchedulerResult};
use crate::gatekeeper::{Traffic, traffic_build};
use crate::lifecycle::{Enqueuer, approve_build, cancel_build, update_build};
use crate::orchestrator::{Orchestrator, PublishOutcome, PublishRequest};
use crate::pool::EnqueuePool;

/// What happened to a build trigger.
#[derive(Debug, Clone)]
pub enum Admission {
    Queued(Build),
    PendingApproval(Build),
    Skipped { build: Build, message: String },
    /// Nothing was created.
    Ignored(String),
}

/// Collaborators the scheduler is built from.
pub struct SchedulerDeps {
    pub store: Store,
    pub scm: Arc<dyn ScmClient>,
    pub compiler: Arc<dyn Compiler>,
    pub queue: Arc<dyn QueueService>,
    pub workers: Arc<dyn WorkerClient>,
}

pub struct Scheduler {
    store: Store,
    scm: Arc<dyn ScmClient>,
    queue: Arc<dyn QueueService>,
    workers: Arc<dyn WorkerClient>,
    orchestrator: Orchestrator,
    pool: EnqueuePool,
    settings: SchedulerSettings,
}

impl Scheduler {
    /// Must be called from within a tokio runtime; the enqueue pool starts
    /// its tasks immediately.
    pub fn new(deps: SchedulerDeps, settings: SchedulerSettings, metadata: CompileMetadata) -> Self {
        let SchedulerDeps {
            store,
            scm,
            compiler,
            queue,
            workers,
        } = deps;

        let orchestrator = Orchestrator::new(
            store.clone(),
            scm.clone(),
            compiler,
            queue.clone(),
            metadata,
            settings.retry_backoff,
        );
        let enqueuer = Arc::new(Enqueuer::new(store.clone(), queue.clone()));
        let pool = EnqueuePool::new(enqueuer, settings.enqueue_workers);

        Self {
            store,
            scm,
            queue,
            workers,
            orchestrator,
            pool,
            settings,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Turn a trigger into a build: compile and publish it, gate it or hand
    /// it to the enqueue pool, then supersede older equivalent builds.
    pub async fn admit(
        &self,
        draft: Build,
        repo: &Repo,
        source: TriggerSource,
        comment: &str,
    ) -> SchedulerResult<Admission> {
        if !repo.active {
            return Ok(Admission::Ignored(format!(
                "{} is not an active repository",
                repo.full_name
            )));
        }

        let event_gated = matches!(source, TriggerSource::Webhook | TriggerSource::Schedule);
        if event_gated && !repo.allow_events.allows(draft.event, draft.event_action) {
            let action = draft
                .event_action
                .map(|a| format!(":{}", a))
                .unwrap_or_default();
            return Ok(Admission::Ignored(format!(
                "{} does not have {}{} events enabled",
                repo.full_name, draft.event, action
            )));
        }

        let attempts = if event_gated {
            self.settings.compile_attempts
        } else {
            1
        };

        let outcome = self
            .orchestrator
            .compile_and_publish(PublishRequest {
                build: draft,
                repo: repo.clone(),
                source,
                attempts,
                comment: comment.to_string(),
            })
            .await?;

        let item = match outcome {
            PublishOutcome::Skipped { build, message } => {
                return Ok(Admission::Skipped { build, message });
            }
            PublishOutcome::Queued { item, .. } => item,
        };

        let repo = item.repo.clone();
        let traffic = traffic_build(&self.store, self.scm.as_ref(), &self.pool, item).await?;

        // Gating settles the status, and the status decides which older builds go.
        let (Traffic::PendingApproval(build) | Traffic::Enqueued(build)) = &traffic;
        if should_auto_cancel(&repo.auto_cancel, build, &repo.branch) {
            if let Err(e) = auto_cancel(&self.store, self.workers.as_ref(), build, &repo).await {
                warn!(
                    repo = %repo.full_name,
                    build = build.number,
                    error = %e,
                    "Unable to auto cancel superseded builds"
                );
            }
        }

        Ok(match traffic {
            Traffic::PendingApproval(build) => Admission::PendingApproval(build),
            Traffic::Enqueued(build) => Admission::Queued(build),
        })
    }

    /// Start a build on request of `user`.
    pub async fn create_build(
        &self,
        mut draft: Build,
        repo: &Repo,
        user: &User,
    ) -> SchedulerResult<Admission> {
        draft.sender = user.name.clone();
        self.admit(draft, repo, TriggerSource::Create, "").await
    }

    /// Start a new build from a previous one.
    pub async fn restart_build(
        &self,
        repo: &Repo,
        number: i64,
        user: &User,
    ) -> SchedulerResult<Admission> {
        let mut draft = self.get_build(repo, number).await?;
        draft.parent = Some(number);
        draft.sender = user.name.clone();

        info!(repo = %repo.full_name, parent = number, user = %user.name, "Restarting build");
        self.admit(draft, repo, TriggerSource::Restart, "").await
    }

    pub async fn approve(&self, repo: &Repo, number: i64, approver: &User) -> SchedulerResult<Build> {
        let build = self.get_build(repo, number).await?;
        let owner = self.owner(repo).await?;
        approve_build(
            &self.store,
            self.scm.as_ref(),
            &self.pool,
            &build,
            repo,
            &owner,
            &approver.name,
        )
        .await
    }

    pub async fn cancel(&self, repo: &Repo, number: i64, user: &User) -> SchedulerResult<Build> {
        let build = self.get_build(repo, number).await?;
        let owner = self.owner(repo).await?;
        cancel_build(
            &self.store,
            self.workers.as_ref(),
            self.scm.as_ref(),
            &build,
            repo,
            &owner,
            &user.name,
        )
        .await
    }

    /// Apply a worker's progress report.
    pub async fn update(
        &self,
        repo: &Repo,
        number: i64,
        update: &BuildUpdate,
    ) -> SchedulerResult<Build> {
        let build = self.get_build(repo, number).await?;
        let owner = self.owner(repo).await?;
        update_build(&self.store, self.scm.as_ref(), &build, update, repo, &owner).await
    }

    /// Next build id waiting on any of `routes`.
    pub async fn claim(&self, routes: &[String]) -> SchedulerResult<Option<ResourceId>> {
        Ok(self.queue.pop(routes).await?)
    }

    /// Hand out a build's executable plan. Succeeds once per build.
    pub async fn pop_executable(&self, build_id: ResourceId) -> SchedulerResult<BuildExecutable> {
        self.store
            .executables
            .pop(build_id)
            .await
            .context(|| format!("unable to pop executable for build {}", build_id))
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn get_build(&self, repo: &Repo, number: i64) -> SchedulerResult<Build> {
        self.store
            .builds
            .get_for_repo(repo.id, number)
            .await
            .context(|| format!("unable to get build {}/{}", repo.full_name, number))
    }

    async fn owner(&self, repo: &Repo) -> SchedulerResult<User> {
        self.store
            .users
            .get(repo.owner_id)
            .await
            .context(|| format!("unable to get owner for {}", repo.full_name))
    }
}
