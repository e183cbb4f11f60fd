//! Queue interface used to hand builds to workers.

use async_trait::async_trait;

use crate::pipeline::WorkerAffinity;
use crate::{ResourceId, Result};

/// Routes builds to named partitions and moves build references through them.
///
/// Delivery is at-least-once; callers retry failed pushes themselves.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Pick the route a plan with the given affinity is published on.
    fn route(&self, worker: &WorkerAffinity) -> Result<String>;

    /// Publish a build reference on a route.
    async fn push(&self, route: &str, build_id: ResourceId) -> Result<()>;

    /// Claim the oldest build reference on any of the given routes.
    async fn pop(&self, routes: &[String]) -> Result<Option<ResourceId>>;
}
