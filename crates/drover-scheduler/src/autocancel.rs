//! Auto-cancel: a new build supersedes older equivalent builds that have
//! not finished yet.

use chrono::Utc;
use drover_core::{Action, AutoCancelOptions, Build, BuildStatus, Event, Repo, WorkerClient};
use drover_db::{BuildFilter, Store};
use tracing::{info, warn};

use crate::error::{DbContext, SchedulerResult};
use crate::lifecycle::cancel_running;

const PAGE_SIZE: i64 = 100;

/// Whether `target` does the same work as `current` and may be dropped
/// in its favor.
pub fn is_cancelable(target: &Build, current: &Build) -> bool {
    if target.event != current.event {
        return false;
    }

    match target.event {
        Event::Push => target.branch == current.branch,
        Event::PullRequest => {
            matches!(
                target.event_action,
                Some(Action::Opened) | Some(Action::Synchronize)
            ) && target.head_ref == current.head_ref
        }
        _ => false,
    }
}

/// Whether `build` is allowed to trigger auto-cancel at all.
pub fn should_auto_cancel(opts: &AutoCancelOptions, build: &Build, default_branch: &str) -> bool {
    if build.status == BuildStatus::PendingApproval {
        return true;
    }

    if !opts.running && !opts.pending && !opts.default_branch {
        return false;
    }

    match build.event {
        Event::Push => build.branch != default_branch || opts.default_branch,
        Event::PullRequest => build.event_action == Some(Action::Synchronize),
        _ => false,
    }
}

/// Cancel every non-terminal build of the repository superseded by `build`.
///
/// Returns whether anything was canceled.
pub async fn auto_cancel(
    store: &Store,
    workers: &dyn WorkerClient,
    build: &Build,
    repo: &Repo,
) -> SchedulerResult<bool> {
    let filter = BuildFilter::with_statuses(&[
        BuildStatus::Pending,
        BuildStatus::PendingApproval,
        BuildStatus::Running,
    ]);
    let opts = repo.auto_cancel;

    let mut candidates = Vec::new();
    let mut page = 1;
    loop {
        let batch = store
            .builds
            .list_for_repo(repo.id, &filter, page, PAGE_SIZE)
            .await
            .context(|| format!("unable to list active builds for {}", repo.full_name))?;
        let done = (batch.len() as i64) < PAGE_SIZE;
        candidates.extend(batch);
        if done {
            break;
        }
        page += 1;
    }

    let mut canceled = false;
    for target in candidates {
        if target.id == build.id || !is_cancelable(&target, build) {
            continue;
        }

        let mut target = match target.status {
            BuildStatus::PendingApproval => discard_pending(store, target).await,
            BuildStatus::Pending if opts.pending => discard_pending(store, target).await,
            BuildStatus::Running if opts.running => {
                cancel_running(store, workers, &target).await?
            }
            _ => continue,
        };

        target.error = Some(format!(
            "build was auto canceled in favor of build {}",
            build.number
        ));
        store
            .builds
            .update(&target)
            .await
            .context(|| format!("unable to update build {}/{}", repo.full_name, target.number))?;

        info!(
            repo = %repo.full_name,
            build = target.number,
            superseded_by = build.number,
            "Auto canceled build"
        );
        canceled = true;
    }

    Ok(canceled)
}

/// Mark a build nobody has claimed as canceled and drop its executable.
async fn discard_pending(store: &Store, mut target: Build) -> Build {
    target.status = BuildStatus::Canceled;
    target.finished = Some(Utc::now());

    if let Err(e) = store.executables.pop(target.id).await {
        if !e.is_not_found() {
            warn!(build_id = %target.id, error = %e, "Unable to discard executable");
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockWorkers, fixture, memory_store, register_worker};
    use drover_core::{BuildExecutable, ResourceId};

    fn push(branch: &str) -> Build {
        Build {
            event: Event::Push,
            branch: branch.to_string(),
            ..Default::default()
        }
    }

    fn pull(action: Action, head_ref: &str) -> Build {
        Build {
            event: Event::PullRequest,
            event_action: Some(action),
            head_ref: head_ref.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_cancelable_push() {
        assert!(is_cancelable(&push("dev"), &push("dev")));
        assert!(!is_cancelable(&push("dev"), &push("patch-1")));
    }

    #[test]
    fn test_is_cancelable_pull_request() {
        let current = pull(Action::Synchronize, "feature");
        assert!(is_cancelable(&pull(Action::Opened, "feature"), &current));
        assert!(is_cancelable(&pull(Action::Synchronize, "feature"), &current));
        assert!(!is_cancelable(&pull(Action::Labeled, "feature"), &current));
        assert!(!is_cancelable(&pull(Action::Opened, "other"), &current));
    }

    #[test]
    fn test_is_cancelable_event_mismatch() {
        let mut tag = push("dev");
        tag.event = Event::Tag;
        assert!(!is_cancelable(&push("dev"), &pull(Action::Opened, "dev")));
        assert!(!is_cancelable(&tag, &push("dev")));
        assert!(!is_cancelable(&tag, &tag.clone()));
    }

    #[test]
    fn test_should_auto_cancel() {
        let all = AutoCancelOptions {
            running: true,
            pending: true,
            default_branch: false,
        };
        let with_default = AutoCancelOptions {
            default_branch: true,
            ..all
        };
        let none = AutoCancelOptions::default();
        let default_only = AutoCancelOptions {
            default_branch: true,
            ..none
        };

        assert!(!should_auto_cancel(&all, &push("main"), "main"));
        assert!(should_auto_cancel(&with_default, &push("main"), "main"));
        assert!(should_auto_cancel(&all, &push("dev"), "main"));
        assert!(!should_auto_cancel(&none, &push("dev"), "main"));
        assert!(should_auto_cancel(&default_only, &push("main"), "main"));
        assert!(should_auto_cancel(&default_only, &push("dev"), "main"));

        assert!(should_auto_cancel(&all, &pull(Action::Synchronize, "f"), "main"));
        assert!(!should_auto_cancel(&all, &pull(Action::Opened, "f"), "main"));

        let gated = Build {
            status: BuildStatus::PendingApproval,
            ..push("main")
        };
        assert!(should_auto_cancel(&none, &gated, "main"));

        let tag = Build {
            event: Event::Tag,
            ..push("dev")
        };
        assert!(!should_auto_cancel(&all, &tag, "main"));
    }

    #[tokio::test]
    async fn test_auto_cancel_pending_sibling() {
        let store = memory_store();
        let workers = MockWorkers::default();
        let (mut repo, _) = fixture(&store).await;
        repo.auto_cancel.pending = true;

        let older = store
            .builds
            .create(&Build {
                repo_id: repo.id,
                number: 1,
                ..push("dev")
            })
            .await
            .unwrap();
        store
            .executables
            .create(&BuildExecutable {
                id: ResourceId::new(),
                build_id: older.id,
                data: b"{}".to_vec(),
            })
            .await
            .unwrap();
        let unrelated = store
            .builds
            .create(&Build {
                repo_id: repo.id,
                number: 2,
                ..push("patch-1")
            })
            .await
            .unwrap();
        let current = store
            .builds
            .create(&Build {
                repo_id: repo.id,
                number: 3,
                ..push("dev")
            })
            .await
            .unwrap();

        assert!(auto_cancel(&store, &workers, &current, &repo).await.unwrap());

        let older = store.builds.get(older.id).await.unwrap();
        assert_eq!(older.status, BuildStatus::Canceled);
        assert_eq!(
            older.error.as_deref(),
            Some("build was auto canceled in favor of build 3")
        );
        assert!(store.executables.pop(older.id).await.unwrap_err().is_not_found());
        assert_eq!(
            store.builds.get(unrelated.id).await.unwrap().status,
            BuildStatus::Pending
        );
        assert_eq!(
            store.builds.get(current.id).await.unwrap().status,
            BuildStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_auto_cancel_respects_options() {
        let store = memory_store();
        let (repo, _) = fixture(&store).await;
        register_worker(&store, "worker-1").await;

        let running = store
            .builds
            .create(&Build {
                repo_id: repo.id,
                number: 1,
                status: BuildStatus::Running,
                host: "worker-1".to_string(),
                ..push("dev")
            })
            .await
            .unwrap();
        let current = Build {
            repo_id: repo.id,
            number: 2,
            ..push("dev")
        };
        let workers = MockWorkers::running(7, running.id);

        assert!(!auto_cancel(&store, &workers, &current, &repo).await.unwrap());
        assert_eq!(workers.cancel_calls(), 0);

        let mut repo = repo;
        repo.auto_cancel.running = true;
        assert!(auto_cancel(&store, &workers, &current, &repo).await.unwrap());
        assert_eq!(workers.cancel_calls(), 1);
        assert_eq!(
            store.builds.get(running.id).await.unwrap().status,
            BuildStatus::Canceled
        );
    }
}
