//! Compile-and-publish: turns a build draft into a persisted, routable
//! build with its executable plan stored for a worker to claim.

use bytes::Bytes;
use chrono::Utc;
use drover_core::{
    Build, BuildExecutable, BuildStatus, CompileContext, CompileMetadata, Compiler, Event,
    ExecutablePlan, Pipeline, QueueService, Repo, ResourceId, ScmClient, TriggerSource, User,
};
use drover_db::{BuildFilter, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbContext, SchedulerError, SchedulerResult};
use crate::lifecycle::{QueueItem, clean_build};
use crate::planner::{PlanError, plan_build};
use crate::skip::skip_empty_build;

/// Input of a compile-and-publish run.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub build: Build,
    pub repo: Repo,
    pub source: TriggerSource,
    /// Total attempts for the compile loop, at least one.
    pub attempts: u32,
    /// Free-form text from a comment trigger, exposed to the pipeline.
    pub comment: String,
}

/// Result of a successful compile-and-publish run.
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Queued {
        build: Build,
        plan: ExecutablePlan,
        item: QueueItem,
    },
    /// No user-defined step matched the trigger. Nothing was persisted.
    Skipped { build: Build, message: String },
}

/// State owned by a single attempt of the compile loop.
struct Attempt {
    build: Build,
    /// Repository as re-read at the start of the attempt.
    repo: Repo,
    cached: Option<Pipeline>,
    raw: Bytes,
}

/// What a successful attempt produced.
enum AttemptResult {
    Planned {
        build: Build,
        repo: Repo,
        plan: ExecutablePlan,
        services: Vec<drover_core::Service>,
        steps: Vec<drover_core::Step>,
    },
    Skipped {
        build: Build,
        message: String,
    },
}

/// Runs compile-and-publish against explicitly injected collaborators.
pub struct Orchestrator {
    store: Store,
    scm: Arc<dyn ScmClient>,
    compiler: Arc<dyn Compiler>,
    queue: Arc<dyn QueueService>,
    metadata: CompileMetadata,
    backoff: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        scm: Arc<dyn ScmClient>,
        compiler: Arc<dyn Compiler>,
        queue: Arc<dyn QueueService>,
        metadata: CompileMetadata,
        backoff: Duration,
    ) -> Self {
        Self {
            store,
            scm,
            compiler,
            queue,
            metadata,
            backoff,
        }
    }

    pub async fn compile_and_publish(
        &self,
        req: PublishRequest,
    ) -> SchedulerResult<PublishOutcome> {
        let PublishRequest {
            mut build,
            repo,
            source,
            attempts,
            comment,
        } = req;
        let attempts = attempts.max(1);
        let full_name = repo.full_name.clone();

        // Settings such as the build limit come from the stored row, not the caller's copy.
        let repo = self
            .store
            .repos
            .get(repo.id)
            .await
            .context(|| format!("unable to get repo {}", full_name))?;

        let owner = self
            .store
            .users
            .get(repo.owner_id)
            .await
            .context(|| format!("unable to get owner for {}", full_name))?;
        self.check_owner_access(&owner, &repo).await?;

        let pr_number = match build.event {
            Event::PullRequest | Event::Comment => Some(pull_request_number(&build.git_ref)?),
            _ => None,
        };

        match (build.event, pr_number) {
            (Event::Comment, Some(number)) => {
                let pr = self.scm.get_pull_request(&owner, &repo, number).await?;
                build.commit = pr.commit;
                build.branch = pr.branch;
                build.base_ref = pr.base_ref;
                build.head_ref = pr.head_ref;
            }
            (Event::Schedule, _) => {
                if build.branch.is_empty() {
                    build.branch = repo.branch.clone();
                }
                let branch = self.scm.get_branch(&owner, &repo, &build.branch).await?;
                build.commit = branch.commit;
                build.git_ref = format!("refs/heads/{}", branch.name);
                build.branch = branch.name;
            }
            _ => {}
        }

        let active = self
            .store
            .builds
            .count_for_repo(
                repo.id,
                &BuildFilter::with_statuses(&[BuildStatus::Pending, BuildStatus::Running]),
            )
            .await
            .context(|| format!("unable to count active builds for {}", full_name))?;
        if active >= repo.build_limit {
            return Err(SchedulerError::LimitExceeded(format!(
                "unable to create new build: {} has exceeded the concurrent build limit of {}",
                full_name, repo.build_limit
            )));
        }

        build.reset_for_publish();
        build.repo_id = repo.id;

        let files = match (build.event, pr_number) {
            (Event::PullRequest | Event::Comment, Some(number)) => {
                self.scm.changeset_pr(&owner, &repo, number).await?
            }
            (Event::Delete, _) => Vec::new(),
            _ => self.scm.changeset(&owner, &repo, &build.commit).await?,
        };

        let mut result = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.backoff * (attempt - 1)).await;
            }

            match self
                .run_attempt(&build, &repo, &owner, &files, &comment)
                .await
            {
                Ok(done) => {
                    result = Some(done);
                    break;
                }
                Err(e) if attempt < attempts && e.is_retryable() => {
                    warn!(
                        repo = %full_name,
                        source = %source,
                        attempt,
                        attempts,
                        error = %e,
                        "Compile attempt failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let (build, repo, plan, services, steps) = match result {
            Some(AttemptResult::Planned {
                build,
                repo,
                plan,
                services,
                steps,
            }) => (build, repo, plan, services, steps),
            Some(AttemptResult::Skipped { build, message }) => {
                info!(repo = %full_name, source = %source, "{}", message);
                return Ok(PublishOutcome::Skipped { build, message });
            }
            None => {
                return Err(SchedulerError::Internal(format!(
                    "no compile attempt completed for {}",
                    full_name
                )));
            }
        };

        let mut build = self
            .store
            .builds
            .get_for_repo(repo.id, build.number)
            .await
            .context(|| format!("unable to get build {}/{}", full_name, build.number))?;

        let route = match self.queue.route(&plan.worker) {
            Ok(route) => route,
            Err(e) => {
                clean_build(&self.store, Some(&build), &services, &steps, &e).await;
                return Err(e.into());
            }
        };

        build.host = route.clone();
        let build = match self.store.builds.update(&build).await {
            Ok(b) => b,
            Err(e) => {
                clean_build(&self.store, Some(&build), &services, &steps, &e).await;
                return Err(SchedulerError::Db {
                    context: format!("unable to update build {}/{}", full_name, build.number),
                    source: e,
                });
            }
        };

        let data = match plan.to_bytes() {
            Ok(data) => data,
            Err(e) => {
                clean_build(&self.store, Some(&build), &services, &steps, &e).await;
                return Err(SchedulerError::Internal(format!(
                    "unable to marshal executable plan: {}",
                    e
                )));
            }
        };
        let executable = BuildExecutable {
            id: ResourceId::new(),
            build_id: build.id,
            data,
        };
        if let Err(e) = self.store.executables.create(&executable).await {
            clean_build(&self.store, Some(&build), &services, &steps, &e).await;
            return Err(SchedulerError::Db {
                context: format!("unable to publish executable for {}/{}", full_name, build.number),
                source: e,
            });
        }

        info!(
            repo = %full_name,
            build = build.number,
            source = %source,
            route = %route,
            "Published build"
        );

        let item = QueueItem {
            build: build.clone(),
            repo,
            owner,
            route,
        };
        Ok(PublishOutcome::Queued { build, plan, item })
    }

    /// The owner's credentials post statuses for the build, so they must
    /// still be able to write to the repository.
    async fn check_owner_access(&self, owner: &User, repo: &Repo) -> SchedulerResult<()> {
        let denied = |reason: String| {
            SchedulerError::Unauthorized(format!(
                "unable to publish build for {}: owner {} {}",
                repo.full_name, owner.name, reason
            ))
        };

        match self
            .scm
            .repo_access(&owner.name, &owner.token, &repo.org, &repo.name)
            .await
        {
            Ok(level) if level.can_write() => Ok(()),
            Ok(_) => Err(denied("no longer has write access".to_string())),
            Err(e) => Err(denied(format!("access could not be verified: {}", e))),
        }
    }

    async fn run_attempt(
        &self,
        draft: &Build,
        repo: &Repo,
        owner: &User,
        files: &[String],
        comment: &str,
    ) -> SchedulerResult<AttemptResult> {
        let mut attempt = self.begin_attempt(draft, repo, owner).await?;

        let mut compile_repo = attempt.repo.clone();
        let mut compile_build = attempt.build.clone();
        if let Some(cached) = &attempt.cached {
            // Recompile with the type the cached pipeline was written in.
            compile_repo.pipeline_type = cached.pipeline_type;
            compile_build.pipeline_type = Some(cached.pipeline_type);
        }

        let ctx = CompileContext::new(compile_build)
            .with_repo(compile_repo)
            .with_user(owner.clone())
            .with_commit(attempt.build.commit.clone())
            .with_files(files.to_vec())
            .with_metadata(self.metadata.clone())
            .with_comment(comment);
        let compiled = self.compiler.compile(&attempt.raw, &ctx).map_err(|e| {
            SchedulerError::Compile(format!(
                "unable to compile pipeline configuration for {}: {}",
                repo.full_name, e
            ))
        })?;
        let mut plan = compiled.plan;

        if let Some(message) = skip_empty_build(&plan) {
            attempt.build.status = BuildStatus::Skipped;
            if let Err(e) = self.scm.status(owner, &attempt.build, &attempt.repo).await {
                warn!(repo = %repo.full_name, error = %e, "Unable to set skipped commit status");
            }
            return Ok(AttemptResult::Skipped {
                build: attempt.build,
                message,
            });
        }

        let pipeline = match attempt.cached.take() {
            Some(cached) => cached,
            None => self
                .store
                .pipelines
                .create(&compiled.pipeline)
                .await
                .context(|| {
                    format!(
                        "unable to create pipeline for {}@{}",
                        repo.full_name, attempt.build.commit
                    )
                })?,
        };
        attempt.build.pipeline_id = Some(pipeline.id);

        // Claim the number only once the build is certain to be created.
        let repo_now = self
            .store
            .repos
            .increment_counter(attempt.repo.id, attempt.repo.counter)
            .await
            .context(|| format!("unable to claim build number for {}", repo.full_name))?;

        attempt.build.created = Some(Utc::now());
        match plan_build(
            &self.store,
            self.scm.as_ref(),
            &mut plan,
            &attempt.build,
            &repo_now,
            owner,
        )
        .await
        {
            Ok(planned) => Ok(AttemptResult::Planned {
                build: planned.build,
                repo: repo_now,
                plan,
                services: planned.services,
                steps: planned.steps,
            }),
            Err(PlanError {
                build,
                services,
                steps,
                source,
            }) => {
                clean_build(&self.store, build.as_ref(), &services, &steps, &source).await;
                Err(source)
            }
        }
    }

    /// Fresh repository row, cached or fetched configuration and a build
    /// draft with everything a previous attempt may have set cleared.
    async fn begin_attempt(
        &self,
        draft: &Build,
        repo: &Repo,
        owner: &User,
    ) -> SchedulerResult<Attempt> {
        let mut build = draft.clone();
        build.id = ResourceId::new();
        build.status = BuildStatus::Pending;
        build.error = None;
        build.finished = None;
        build.pipeline_id = None;

        let cached = match self
            .store
            .pipelines
            .get_for_repo(repo.id, &build.commit)
            .await
        {
            Ok(pipeline) => Some(pipeline),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                return Err(SchedulerError::Db {
                    context: format!("unable to get pipeline for {}@{}", repo.full_name, build.commit),
                    source: e,
                });
            }
        };

        let raw = match &cached {
            Some(pipeline) => {
                debug!(repo = %repo.full_name, commit = %build.commit, "Using cached pipeline");
                Bytes::from(pipeline.data.clone())
            }
            None => self.scm.config_backoff(owner, repo, &build.commit).await?,
        };

        let fresh = self
            .store
            .repos
            .get(repo.id)
            .await
            .context(|| format!("unable to get repo {}", repo.full_name))?;
        build.number = fresh.counter + 1;

        Ok(Attempt {
            build,
            repo: fresh,
            cached,
            raw,
        })
    }
}

/// Pull request number from a `refs/pull/<n>/head` style ref.
pub fn pull_request_number(git_ref: &str) -> SchedulerResult<i64> {
    git_ref
        .strip_prefix("refs/pull/")
        .and_then(|rest| rest.split_once('/'))
        .and_then(|(number, _)| number.parse::<i64>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            SchedulerError::InvalidInput(format!(
                "unable to parse pull request number from ref {}",
                git_ref
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::testing::{FlakySteps, MockScm, RacingRepos, fixture, memory_store};
    use drover_config::KdlCompiler;

    fn new_orchestrator(store: &Store, scm: MockScm, routes: Vec<String>) -> Orchestrator {
        Orchestrator::new(
            store.clone(),
            Arc::new(scm),
            Arc::new(KdlCompiler::default()),
            Arc::new(MemoryQueue::new("drover", routes)),
            CompileMetadata::default(),
            Duration::ZERO,
        )
    }

    fn request(repo: &Repo, commit: &str, attempts: u32) -> PublishRequest {
        PublishRequest {
            build: Build {
                event: Event::Push,
                branch: "main".to_string(),
                git_ref: "refs/heads/main".to_string(),
                commit: commit.to_string(),
                sender: "octocat".to_string(),
                ..Default::default()
            },
            repo: repo.clone(),
            source: TriggerSource::Webhook,
            attempts,
            comment: String::new(),
        }
    }

    fn queued(outcome: PublishOutcome) -> (Build, ExecutablePlan, QueueItem) {
        match outcome {
            PublishOutcome::Queued { build, plan, item } => (build, plan, item),
            PublishOutcome::Skipped { message, .. } => panic!("unexpected skip: {}", message),
        }
    }

    #[tokio::test]
    async fn test_publish_persists_and_routes_build() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        let orchestrator = new_orchestrator(&store, MockScm::default(), Vec::new());

        let outcome = orchestrator
            .compile_and_publish(request(&repo, "abc123", 1))
            .await
            .unwrap();
        let (build, plan, item) = queued(outcome);

        assert_eq!(build.number, 1);
        assert_eq!(build.host, "drover");
        assert_eq!(item.route, "drover");
        assert!(build.pipeline_id.is_some());
        assert_eq!(plan.step_names(), vec!["init", "clone", "test"]);
        assert_eq!(store.repos.get(repo.id).await.unwrap().counter, 1);
        assert_eq!(store.steps.list_for_build(build.id).await.unwrap().len(), 3);
        store
            .pipelines
            .get_for_repo(repo.id, "abc123")
            .await
            .unwrap();

        let executable = store.executables.pop(build.id).await.unwrap();
        let stored = ExecutablePlan::from_bytes(&executable.data).unwrap();
        assert_eq!(stored.step_names(), plan.step_names());
    }

    #[tokio::test]
    async fn test_numbers_increase_per_build() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        let orchestrator = new_orchestrator(&store, MockScm::default(), Vec::new());

        let (first, _, _) = queued(
            orchestrator
                .compile_and_publish(request(&repo, "aaa", 1))
                .await
                .unwrap(),
        );
        let (second, _, _) = queued(
            orchestrator
                .compile_and_publish(request(&repo, "bbb", 1))
                .await
                .unwrap(),
        );

        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_skip_claims_no_number() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        let orchestrator = new_orchestrator(
            &store,
            MockScm::with_config(
                r#"
                step "publish" {
                    image "rust:1.85"
                    when {
                        event "tag"
                    }
                }
                "#,
            ),
            Vec::new(),
        );

        let outcome = orchestrator
            .compile_and_publish(request(&repo, "abc123", 1))
            .await
            .unwrap();

        let PublishOutcome::Skipped { build, message } = outcome else {
            panic!("expected a skipped build");
        };
        assert_eq!(build.status, BuildStatus::Skipped);
        assert_eq!(message, "skipping build since only init and clone step found");
        assert_eq!(store.repos.get(repo.id).await.unwrap().counter, 0);
        assert_eq!(
            store
                .builds
                .count_for_repo(repo.id, &BuildFilter::default())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_build_limit() {
        let store = memory_store();
        let (mut repo, _) = fixture(&store).await;
        for number in 1..=2 {
            store.repos.increment_counter(repo.id, number - 1).await.unwrap();
            store
                .builds
                .create(&Build {
                    repo_id: repo.id,
                    number,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let orchestrator = new_orchestrator(&store, MockScm::default(), Vec::new());

        repo.build_limit = 5;
        store.repos.update(&repo).await.unwrap();
        let (build, _, _) = queued(
            orchestrator
                .compile_and_publish(request(&repo, "abc123", 1))
                .await
                .unwrap(),
        );
        assert_eq!(build.number, 3);

        repo.build_limit = 3;
        store.repos.update(&repo).await.unwrap();
        let err = orchestrator
            .compile_and_publish(request(&repo, "def456", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::LimitExceeded(_)));
        assert_eq!(store.repos.get(repo.id).await.unwrap().counter, 3);
    }

    #[tokio::test]
    async fn test_build_limit_ignores_stale_caller_copy() {
        let store = memory_store();
        let (mut repo, _) = fixture(&store).await;
        repo.build_limit = 1;
        store.repos.update(&repo).await.unwrap();
        let orchestrator = new_orchestrator(&store, MockScm::default(), Vec::new());

        queued(
            orchestrator
                .compile_and_publish(request(&repo, "aaa", 1))
                .await
                .unwrap(),
        );

        let mut stale = repo.clone();
        stale.build_limit = 10;
        let err = orchestrator
            .compile_and_publish(request(&stale, "bbb", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::LimitExceeded(_)));
        assert_eq!(store.repos.get(repo.id).await.unwrap().counter, 1);
    }

    #[tokio::test]
    async fn test_lost_number_race_is_retried() {
        let mut store = memory_store();
        let (repo, _) = fixture(&store).await;
        RacingRepos::wrap(&mut store, 1);
        let orchestrator = new_orchestrator(&store, MockScm::default(), Vec::new());

        let (build, _, item) = queued(
            orchestrator
                .compile_and_publish(request(&repo, "abc123", 2))
                .await
                .unwrap(),
        );

        assert_eq!(build.number, 2);
        assert_eq!(item.repo.counter, 2);
        assert_eq!(store.repos.get(repo.id).await.unwrap().counter, 2);
        assert_eq!(
            store
                .builds
                .count_for_repo(repo.id, &BuildFilter::default())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_lost_number_race_without_retry_fails() {
        let mut store = memory_store();
        let (repo, _) = fixture(&store).await;
        RacingRepos::wrap(&mut store, 1);

        let err = new_orchestrator(&store, MockScm::default(), Vec::new())
            .compile_and_publish(request(&repo, "abc123", 1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::Db {
                source: drover_db::DbError::Conflict(_),
                ..
            }
        ));
        assert_eq!(
            store
                .builds
                .count_for_repo(repo.id, &BuildFilter::default())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_failed_plan_is_cleaned_and_retried_with_fresh_number() {
        let mut store = memory_store();
        let (repo, _) = fixture(&store).await;
        FlakySteps::wrap(&mut store, 1);
        let orchestrator = new_orchestrator(&store, MockScm::default(), Vec::new());

        let (build, plan, _) = queued(
            orchestrator
                .compile_and_publish(request(&repo, "abc123", 2))
                .await
                .unwrap(),
        );

        let failed = store.builds.get_for_repo(repo.id, 1).await.unwrap();
        assert_eq!(failed.status, BuildStatus::Error);
        assert!(failed.finished.is_some());
        assert!(store.steps.list_for_build(failed.id).await.unwrap().is_empty());

        assert_eq!(build.number, 2);
        assert_ne!(build.id, failed.id);
        assert_eq!(build.status, BuildStatus::Pending);
        assert_eq!(store.repos.get(repo.id).await.unwrap().counter, 2);
        assert_eq!(
            store.steps.list_for_build(build.id).await.unwrap().len(),
            plan.step_names().len()
        );
    }

    #[tokio::test]
    async fn test_schedule_without_branch_uses_default_branch() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        let mut req = request(&repo, "", 1);
        req.build.event = Event::Schedule;
        req.build.branch = String::new();
        req.build.git_ref = String::new();
        req.source = TriggerSource::Schedule;

        let (build, _, _) = queued(
            new_orchestrator(&store, MockScm::default(), Vec::new())
                .compile_and_publish(req)
                .await
                .unwrap(),
        );

        assert_eq!(build.branch, "main");
        assert_eq!(build.git_ref, "refs/heads/main");
        assert_eq!(build.commit, "branch-head");
    }

    #[tokio::test]
    async fn test_config_fetch_is_retried() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;

        let flaky = MockScm::default();
        flaky.config_failures.store(1, std::sync::atomic::Ordering::SeqCst);
        let orchestrator = new_orchestrator(&store, flaky, Vec::new());
        let (build, _, _) = queued(
            orchestrator
                .compile_and_publish(request(&repo, "abc123", 2))
                .await
                .unwrap(),
        );
        assert_eq!(build.number, 1);

        let flaky = MockScm::default();
        flaky.config_failures.store(1, std::sync::atomic::Ordering::SeqCst);
        let orchestrator = new_orchestrator(&store, flaky, Vec::new());
        let err = orchestrator
            .compile_and_publish(request(&repo, "def456", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Core(drover_core::Error::Scm(_))));
        assert_eq!(store.repos.get(repo.id).await.unwrap().counter, 1);
    }

    #[tokio::test]
    async fn test_same_commit_reuses_cached_pipeline() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;

        queued(
            new_orchestrator(&store, MockScm::default(), Vec::new())
                .compile_and_publish(request(&repo, "abc123", 1))
                .await
                .unwrap(),
        );

        // The configuration now in the repository no longer parses.
        let broken = new_orchestrator(&store, MockScm::with_config("step {"), Vec::new());
        let mut restart = request(&repo, "abc123", 1);
        restart.source = TriggerSource::Restart;
        restart.build.parent = Some(1);
        let (build, plan, _) = queued(broken.compile_and_publish(restart).await.unwrap());

        assert_eq!(build.number, 2);
        assert_eq!(build.parent, Some(1));
        assert_eq!(plan.step_names(), vec!["init", "clone", "test"]);
    }

    #[tokio::test]
    async fn test_invalid_route_cleans_build() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        let orchestrator = new_orchestrator(
            &store,
            MockScm::with_config(
                r#"
                worker flavor="gpu"
                step "train" {
                    image "python:3"
                }
                "#,
            ),
            Vec::new(),
        );

        let err = orchestrator
            .compile_and_publish(request(&repo, "abc123", 3))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Core(drover_core::Error::Queue(_))));

        let build = store.builds.get_for_repo(repo.id, 1).await.unwrap();
        assert_eq!(build.status, BuildStatus::Error);
        assert!(build.finished.is_some());
        for step in store.steps.list_for_build(build.id).await.unwrap() {
            assert_eq!(step.status, BuildStatus::Killed);
        }
        assert!(store.executables.pop(build.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_owner_without_write_access() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        let scm = MockScm {
            access: drover_core::AccessLevel::Read,
            ..Default::default()
        };

        let err = new_orchestrator(&store, scm, Vec::new())
            .compile_and_publish(request(&repo, "abc123", 5))
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::Unauthorized(_)));
        assert_eq!(store.repos.get(repo.id).await.unwrap().counter, 0);
    }

    #[tokio::test]
    async fn test_comment_build_uses_pull_request_head() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        let mut req = request(&repo, "", 1);
        req.build.event = Event::Comment;
        req.build.git_ref = "refs/pull/12/head".to_string();
        req.comment = "/rebuild".to_string();

        let (build, plan, _) = queued(
            new_orchestrator(&store, MockScm::default(), Vec::new())
                .compile_and_publish(req)
                .await
                .unwrap(),
        );

        assert_eq!(build.commit, "pr-head");
        assert_eq!(build.head_ref, "feature-12");
        assert_eq!(
            plan.environment.get("DROVER_BUILD_COMMENT"),
            Some(&"/rebuild".to_string())
        );
    }

    #[test]
    fn test_pull_request_number() {
        assert_eq!(pull_request_number("refs/pull/42/head").unwrap(), 42);
        assert!(pull_request_number("refs/heads/main").is_err());
        assert!(pull_request_number("refs/pull/abc/head").is_err());
        assert!(pull_request_number("refs/pull/7").is_err());
    }
}
