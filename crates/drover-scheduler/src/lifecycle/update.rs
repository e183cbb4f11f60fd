//! Worker callbacks reporting build progress.

use drover_core::{Build, BuildUpdate, Event, Repo, ScmClient, User};
use drover_db::Store;
use tracing::warn;

use crate::error::{DbContext, SchedulerResult};

/// Apply a partial update from a worker and persist it.
///
/// Terminal updates post the final commit status, except for scheduled
/// builds which have no commit to report on.
pub async fn update_build(
    store: &Store,
    scm: &dyn ScmClient,
    build: &Build,
    update: &BuildUpdate,
    repo: &Repo,
    owner: &User,
) -> SchedulerResult<Build> {
    let mut build = build.clone();
    build.apply(update);

    let build = store
        .builds
        .update(&build)
        .await
        .context(|| format!("unable to update build {}/{}", repo.full_name, build.number))?;

    if build.status.is_terminal() && build.event != Event::Schedule {
        if let Err(e) = scm.status(owner, &build, repo).await {
            warn!(repo = %repo.full_name, build = build.number, error = %e, "Unable to set commit status");
        }
    }

    Ok(build)
}
