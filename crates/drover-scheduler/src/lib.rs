//! Build lifecycle orchestration for Drover CI/CD.
//!
//! Turns triggers into persisted, queued builds and drives them through
//! approval, auto-cancel, cancellation and cleanup. Builds are handed to
//! workers through a queue; PostgreSQL uses SKIP LOCKED for claiming.

pub mod autocancel;
pub mod error;
pub mod gatekeeper;
pub mod lifecycle;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod skip;

#[cfg(test)]
mod testing;

pub use autocancel::{auto_cancel, is_cancelable, should_auto_cancel};
pub use error::{SchedulerError, SchedulerResult};
pub use gatekeeper::{Traffic, gatekeep_build, needs_approval, traffic_build};
pub use lifecycle::{QueueItem, approve_build, cancel_build, clean_build, update_build};
pub use orchestrator::{Orchestrator, PublishOutcome, PublishRequest};
pub use planner::{PlanError, Planned, plan_build};
pub use pool::EnqueuePool;
pub use queue::{MemoryQueue, PgQueue, RouteTable};
pub use remote::{HttpWorkerClient, WorkerTokenMinter};
pub use scheduler::{Admission, Scheduler, SchedulerDeps};
pub use skip::skip_empty_build;
