//! Canceling builds, locally or through the worker running them.

use chrono::Utc;
use drover_core::{Build, BuildStatus, Repo, ScmClient, User, WorkerClient};
use drover_db::Store;
use tracing::{info, warn};

use super::set_children_status;
use crate::error::{DbContext, SchedulerError, SchedulerResult};

/// Ask the worker hosting a running build to stop it, then persist the
/// state the worker reports back.
pub async fn cancel_running(
    store: &Store,
    workers: &dyn WorkerClient,
    build: &Build,
) -> SchedulerResult<Build> {
    let worker = store
        .workers
        .get_by_hostname(&build.host)
        .await
        .context(|| format!("unable to get worker {} for build {}", build.host, build.id))?;

    let executors = match workers.list_executors(&worker).await {
        Ok(executors) => executors,
        Err(e) => {
            warn!(worker = %worker.hostname, error = %e, "Unable to list executors");
            Vec::new()
        }
    };

    let Some(executor) = executors
        .iter()
        .find(|e| e.running && e.build_id == Some(build.id))
    else {
        return Err(SchedulerError::NotFound(format!(
            "no executor on {} is running build {}",
            worker.hostname, build.id
        )));
    };

    let reported = workers.cancel_build(&worker, executor.id).await?;

    let mut build = build.clone();
    build.status = reported.status;
    build.error = reported.error.or(build.error);
    build.started = reported.started.or(build.started);
    build.finished = reported.finished.or(build.finished);
    if !reported.host.is_empty() {
        build.host = reported.host;
    }
    if !reported.runtime.is_empty() {
        build.runtime = reported.runtime;
    }
    if !reported.distribution.is_empty() {
        build.distribution = reported.distribution;
    }

    store
        .builds
        .update(&build)
        .await
        .context(|| format!("unable to update canceled build {}", build.id))
}

/// Cancel a build on behalf of `canceled_by`.
///
/// Running builds are stopped remotely. Pending builds have not been
/// claimed yet, so their executable is discarded and their services and
/// steps canceled in place.
pub async fn cancel_build(
    store: &Store,
    workers: &dyn WorkerClient,
    scm: &dyn ScmClient,
    build: &Build,
    repo: &Repo,
    owner: &User,
    canceled_by: &str,
) -> SchedulerResult<Build> {
    let message = format!("build was canceled by {}", canceled_by);

    let build = match build.status {
        BuildStatus::Running => {
            let mut canceled = cancel_running(store, workers, build).await?;
            canceled.error = Some(message);
            store
                .builds
                .update(&canceled)
                .await
                .context(|| format!("unable to update build {}/{}", repo.full_name, canceled.number))?
        }
        BuildStatus::Pending | BuildStatus::PendingApproval => {
            let mut canceled = build.clone();
            canceled.status = BuildStatus::Canceled;
            canceled.error = Some(message);
            canceled.finished = Some(Utc::now());
            let canceled = store
                .builds
                .update(&canceled)
                .await
                .context(|| format!("unable to update build {}/{}", repo.full_name, canceled.number))?;

            if let Err(e) = store.executables.pop(canceled.id).await {
                if !e.is_not_found() {
                    warn!(build_id = %canceled.id, error = %e, "Unable to discard executable");
                }
            }

            let (_, steps) = set_children_status(store, canceled.id, BuildStatus::Canceled).await?;
            for step in steps.iter().filter(|s| s.report_as.is_some()) {
                if let Err(e) = scm.step_status(owner, &canceled, step, repo).await {
                    warn!(step = %step.name, error = %e, "Unable to set step status");
                }
            }
            canceled
        }
        other => {
            return Err(SchedulerError::Conflict(format!(
                "unable to cancel build {}/{}: build is {}",
                repo.full_name, build.number, other
            )));
        }
    };

    if let Err(e) = scm.status(owner, &build, repo).await {
        warn!(repo = %repo.full_name, build = build.number, error = %e, "Unable to set commit status");
    }

    info!(repo = %repo.full_name, build = build.number, by = %canceled_by, "Canceled build");
    Ok(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockScm, MockWorkers, fixture, memory_store, register_worker};
    use drover_core::{BuildExecutable, Container, ResourceId, Step};

    #[tokio::test]
    async fn test_cancel_pending_build() {
        let store = memory_store();
        let scm = MockScm::default();
        let workers = MockWorkers::default();
        let (repo, owner) = fixture(&store).await;
        let build = store
            .builds
            .create(&Build {
                repo_id: repo.id,
                number: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .steps
            .create(&Step::from_container(
                &Container {
                    number: 1,
                    name: "test".to_string(),
                    ..Default::default()
                },
                &build,
                "",
            ))
            .await
            .unwrap();
        store
            .executables
            .create(&BuildExecutable {
                id: ResourceId::new(),
                build_id: build.id,
                data: b"{}".to_vec(),
            })
            .await
            .unwrap();

        let canceled = cancel_build(&store, &workers, &scm, &build, &repo, &owner, "octocat")
            .await
            .unwrap();

        assert_eq!(canceled.status, BuildStatus::Canceled);
        assert_eq!(canceled.error.as_deref(), Some("build was canceled by octocat"));
        assert!(canceled.finished.is_some());
        assert!(store.executables.pop(build.id).await.unwrap_err().is_not_found());
        let steps = store.steps.list_for_build(build.id).await.unwrap();
        assert!(steps.iter().all(|s| s.status == BuildStatus::Canceled));
        assert_eq!(workers.cancel_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_running_build_asks_worker() {
        let store = memory_store();
        let scm = MockScm::default();
        let (repo, owner) = fixture(&store).await;
        register_worker(&store, "worker-1").await;
        let build = store
            .builds
            .create(&Build {
                repo_id: repo.id,
                number: 1,
                status: BuildStatus::Running,
                host: "worker-1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let workers = MockWorkers::running(7, build.id);

        let canceled = cancel_build(&store, &workers, &scm, &build, &repo, &owner, "octocat")
            .await
            .unwrap();

        assert_eq!(canceled.status, BuildStatus::Canceled);
        assert_eq!(workers.cancel_calls(), 1);
        let stored = store.builds.get(build.id).await.unwrap();
        assert_eq!(stored.status, BuildStatus::Canceled);
        assert_eq!(stored.error.as_deref(), Some("build was canceled by octocat"));
    }

    #[tokio::test]
    async fn test_cancel_running_without_executor_fails() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        register_worker(&store, "worker-1").await;
        let build = Build {
            repo_id: repo.id,
            status: BuildStatus::Running,
            host: "worker-1".to_string(),
            ..Default::default()
        };
        let workers = MockWorkers::default();

        let err = cancel_running(&store, &workers, &build).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_finished_build_conflicts() {
        let store = memory_store();
        let scm = MockScm::default();
        let workers = MockWorkers::default();
        let (repo, owner) = fixture(&store).await;
        let build = Build {
            repo_id: repo.id,
            status: BuildStatus::Success,
            ..Default::default()
        };

        let err = cancel_build(&store, &workers, &scm, &build, &repo, &owner, "octocat")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));
    }
}
