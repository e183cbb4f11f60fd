//! Publishing build references to the queue.

use chrono::Utc;
use drover_core::{Build, QueueService, Repo, User};
use drover_db::Store;
use std::sync::Arc;
use tracing::{info, warn};

use super::clean_build;

/// A persisted build ready to be pushed onto its route.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub build: Build,
    pub repo: Repo,
    pub owner: User,
    pub route: String,
}

/// Pushes queue items, cleaning the build when the queue cannot take it.
pub struct Enqueuer {
    store: Store,
    queue: Arc<dyn QueueService>,
}

impl Enqueuer {
    pub fn new(store: Store, queue: Arc<dyn QueueService>) -> Self {
        Self { store, queue }
    }

    /// Push with one retry, then stamp the enqueued time.
    ///
    /// A second push failure terminates the build through cleanup, so the
    /// returned build is either enqueued or in `error`.
    pub async fn enqueue(&self, item: QueueItem) -> Build {
        let build_id = item.build.id;

        let mut pushed = self.queue.push(&item.route, build_id).await;
        if let Err(e) = &pushed {
            warn!(route = %item.route, build_id = %build_id, error = %e, "Queue push failed, retrying");
            pushed = self.queue.push(&item.route, build_id).await;
        }

        if let Err(e) = pushed {
            return self
                .abandon(&item, &format!("unable to push build to queue: {}", e))
                .await;
        }

        let mut build = match self.store.builds.get(build_id).await {
            Ok(build) => build,
            Err(e) => {
                warn!(build_id = %build_id, error = %e, "Unable to reload build, using queued copy");
                item.build.clone()
            }
        };
        build.enqueued = Some(Utc::now());
        if let Err(e) = self.store.builds.update(&build).await {
            warn!(build_id = %build_id, error = %e, "Unable to record enqueue time");
        }

        info!(repo = %item.repo.full_name, build = build.number, route = %item.route, "Enqueued build");
        build
    }

    /// Terminate a build that will never reach the queue.
    pub async fn abandon(&self, item: &QueueItem, reason: &str) -> Build {
        let build_id = item.build.id;
        let services = self
            .store
            .services
            .list_for_build(build_id)
            .await
            .unwrap_or_else(|e| {
                warn!(build_id = %build_id, error = %e, "Unable to list services for cleanup");
                Vec::new()
            });
        let steps = self
            .store
            .steps
            .list_for_build(build_id)
            .await
            .unwrap_or_else(|e| {
                warn!(build_id = %build_id, error = %e, "Unable to list steps for cleanup");
                Vec::new()
            });

        let cleaned = clean_build(&self.store, Some(&item.build), &services, &steps, &reason).await;
        cleaned.build.unwrap_or_else(|| item.build.clone())
    }
}
