//! Releasing builds held by the approval gate.

use chrono::Utc;
use drover_core::{Build, BuildStatus, Repo, ScmClient, User};
use drover_db::Store;
use tracing::{info, warn};

use super::{QueueItem, set_children_status};
use crate::error::{DbContext, SchedulerError, SchedulerResult};
use crate::pool::EnqueuePool;

/// Approve a build in `pending approval` and submit it for enqueue.
pub async fn approve_build(
    store: &Store,
    scm: &dyn ScmClient,
    pool: &EnqueuePool,
    build: &Build,
    repo: &Repo,
    owner: &User,
    approver: &str,
) -> SchedulerResult<Build> {
    if build.status != BuildStatus::PendingApproval {
        return Err(SchedulerError::Conflict(format!(
            "unable to approve build {}/{}: build is {}",
            repo.full_name, build.number, build.status
        )));
    }

    let mut approved = build.clone();
    approved.status = BuildStatus::Pending;
    approved.approved_at = Some(Utc::now());
    approved.approved_by = Some(approver.to_string());
    let approved = store
        .builds
        .update(&approved)
        .await
        .context(|| format!("unable to approve build {}/{}", repo.full_name, build.number))?;

    set_children_status(store, approved.id, BuildStatus::Pending).await?;

    if let Err(e) = scm.status(owner, &approved, repo).await {
        warn!(repo = %repo.full_name, build = approved.number, error = %e, "Unable to set commit status");
    }

    info!(repo = %repo.full_name, build = approved.number, approver = %approver, "Approved build");

    pool.submit(QueueItem {
        build: approved.clone(),
        repo: repo.clone(),
        owner: owner.clone(),
        route: approved.host.clone(),
    })
    .await?;

    Ok(approved)
}
