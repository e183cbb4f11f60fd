//! Approval gate for builds coming from forks.

use drover_core::{ApprovalPolicy, Build, BuildStatus, Repo, ScmClient, User};
use drover_db::Store;
use tracing::{info, warn};

use crate::error::{DbContext, SchedulerResult};
use crate::lifecycle::{QueueItem, set_children_status};
use crate::pool::EnqueuePool;

/// Where a freshly published build went.
#[derive(Debug, Clone)]
pub enum Traffic {
    PendingApproval(Build),
    Enqueued(Build),
}

/// Whether the repository policy parks this build until someone approves it.
pub async fn needs_approval(
    scm: &dyn ScmClient,
    build: &Build,
    repo: &Repo,
    owner: &User,
) -> SchedulerResult<bool> {
    if !build.fork {
        return Ok(false);
    }

    match repo.approve_build {
        ApprovalPolicy::ForkAlways => Ok(true),
        ApprovalPolicy::ForkNoWrite => {
            match scm
                .repo_access(&build.sender, &owner.token, &repo.org, &repo.name)
                .await
            {
                Ok(level) => Ok(!level.can_write()),
                Err(e) => {
                    warn!(sender = %build.sender, repo = %repo.full_name, error = %e, "Unable to check sender access");
                    Ok(true)
                }
            }
        }
        ApprovalPolicy::FirstTime => {
            let contributor = scm
                .repo_contributor(owner, &build.sender, &repo.org, &repo.name)
                .await?;
            Ok(!contributor)
        }
        ApprovalPolicy::Never => Ok(false),
    }
}

/// Park a build in `pending approval` together with its services and steps,
/// then post the matching commit status.
pub async fn gatekeep_build(
    store: &Store,
    scm: &dyn ScmClient,
    build: &Build,
    repo: &Repo,
    owner: &User,
) -> SchedulerResult<Build> {
    let mut build = build.clone();
    build.status = BuildStatus::PendingApproval;
    let build = store
        .builds
        .update(&build)
        .await
        .context(|| format!("unable to gate build {}/{}", repo.full_name, build.number))?;

    set_children_status(store, build.id, BuildStatus::PendingApproval).await?;

    if let Err(e) = scm.status(owner, &build, repo).await {
        warn!(repo = %repo.full_name, build = build.number, error = %e, "Unable to set commit status");
    }

    info!(repo = %repo.full_name, build = build.number, sender = %build.sender, "Build awaits approval");
    Ok(build)
}

/// Gate the build or hand it to the enqueue pool.
pub async fn traffic_build(
    store: &Store,
    scm: &dyn ScmClient,
    pool: &EnqueuePool,
    item: QueueItem,
) -> SchedulerResult<Traffic> {
    if needs_approval(scm, &item.build, &item.repo, &item.owner).await? {
        let build = gatekeep_build(store, scm, &item.build, &item.repo, &item.owner).await?;
        return Ok(Traffic::PendingApproval(build));
    }

    if let Err(e) = scm.status(&item.owner, &item.build, &item.repo).await {
        warn!(repo = %item.repo.full_name, build = item.build.number, error = %e, "Unable to set commit status");
    }

    let build = item.build.clone();
    pool.submit(item).await?;
    Ok(Traffic::Enqueued(build))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockScm, fixture, memory_store};
    use drover_core::{AccessLevel, Container, Service, Step};

    fn fork(repo: &Repo) -> Build {
        Build {
            repo_id: repo.id,
            number: 1,
            fork: true,
            sender: "outsider".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_policy_matrix() {
        let store = memory_store();
        let (mut repo, owner) = fixture(&store).await;
        let build = fork(&repo);

        let writer = MockScm::default();
        let reader = MockScm {
            access: AccessLevel::Read,
            ..Default::default()
        };
        let broken = MockScm {
            fail_access: true,
            ..Default::default()
        };

        repo.approve_build = ApprovalPolicy::ForkAlways;
        assert!(needs_approval(&writer, &build, &repo, &owner).await.unwrap());

        repo.approve_build = ApprovalPolicy::ForkNoWrite;
        assert!(!needs_approval(&writer, &build, &repo, &owner).await.unwrap());
        assert!(needs_approval(&reader, &build, &repo, &owner).await.unwrap());
        assert!(needs_approval(&broken, &build, &repo, &owner).await.unwrap());

        repo.approve_build = ApprovalPolicy::Never;
        assert!(!needs_approval(&reader, &build, &repo, &owner).await.unwrap());

        let local = Build {
            fork: false,
            ..build.clone()
        };
        repo.approve_build = ApprovalPolicy::ForkAlways;
        assert!(!needs_approval(&writer, &local, &repo, &owner).await.unwrap());
    }

    #[tokio::test]
    async fn test_first_time_contributor() {
        let store = memory_store();
        let (mut repo, owner) = fixture(&store).await;
        repo.approve_build = ApprovalPolicy::FirstTime;
        let build = fork(&repo);

        let known = MockScm {
            contributor: true,
            ..Default::default()
        };
        let stranger = MockScm::default();
        let broken = MockScm {
            fail_contributor: true,
            ..Default::default()
        };

        assert!(!needs_approval(&known, &build, &repo, &owner).await.unwrap());
        assert!(needs_approval(&stranger, &build, &repo, &owner).await.unwrap());
        assert!(needs_approval(&broken, &build, &repo, &owner).await.is_err());
    }

    #[tokio::test]
    async fn test_gatekeep_sets_children_before_status() {
        let store = memory_store();
        let scm = MockScm::default();
        let (repo, owner) = fixture(&store).await;
        let build = store.builds.create(&fork(&repo)).await.unwrap();
        let container = Container {
            number: 1,
            name: "test".to_string(),
            ..Default::default()
        };
        store
            .steps
            .create(&Step::from_container(&container, &build, ""))
            .await
            .unwrap();
        store
            .services
            .create(&Service::from_container(&container, &build))
            .await
            .unwrap();

        let gated = gatekeep_build(&store, &scm, &build, &repo, &owner)
            .await
            .unwrap();

        assert_eq!(gated.status, BuildStatus::PendingApproval);
        for step in store.steps.list_for_build(build.id).await.unwrap() {
            assert_eq!(step.status, BuildStatus::PendingApproval);
        }
        for service in store.services.list_for_build(build.id).await.unwrap() {
            assert_eq!(service.status, BuildStatus::PendingApproval);
        }
        assert_eq!(scm.statuses(), vec![(1, BuildStatus::PendingApproval)]);
    }
}
