//! State transitions applied to existing builds.

mod approve;
mod cancel;
mod clean;
mod enqueue;
mod update;

pub use approve::approve_build;
pub use cancel::{cancel_build, cancel_running};
pub use clean::{Cleaned, clean_build};
pub use enqueue::{Enqueuer, QueueItem};
pub use update::update_build;

use chrono::Utc;
use drover_core::{BuildStatus, ResourceId, Service, Step};
use drover_db::Store;

use crate::error::{DbContext, SchedulerResult};

/// Move every service and step of a build to `status`.
///
/// Terminal statuses also stamp the finished time.
pub(crate) async fn set_children_status(
    store: &Store,
    build_id: ResourceId,
    status: BuildStatus,
) -> SchedulerResult<(Vec<Service>, Vec<Step>)> {
    let finished = status.is_terminal().then(Utc::now);

    let mut services = store
        .services
        .list_for_build(build_id)
        .await
        .context(|| format!("unable to list services for build {}", build_id))?;
    for service in services.iter_mut() {
        service.status = status;
        if finished.is_some() {
            service.finished = finished;
        }
        store
            .services
            .update(service)
            .await
            .context(|| format!("unable to update service {}", service.name))?;
    }

    let mut steps = store
        .steps
        .list_for_build(build_id)
        .await
        .context(|| format!("unable to list steps for build {}", build_id))?;
    for step in steps.iter_mut() {
        step.status = status;
        if finished.is_some() {
            step.finished = finished;
        }
        store
            .steps
            .update(step)
            .await
            .context(|| format!("unable to update step {}", step.name))?;
    }

    Ok((services, steps))
}
