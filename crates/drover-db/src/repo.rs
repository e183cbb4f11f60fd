//! Repository traits and PostgreSQL implementations.

pub mod build;
pub mod executable;
pub mod logs;
pub mod pipeline;
pub mod repository;
pub mod service;
pub mod step;
pub mod user;
pub mod worker;

pub use build::{BuildFilter, BuildRepo, PgBuildRepo};
pub use executable::{ExecutableRepo, PgExecutableRepo};
pub use logs::{LogRepo, PgLogRepo};
pub use pipeline::{PgPipelineRepo, PipelineRepo};
pub use repository::{PgRepoRepo, RepoRepo};
pub use service::{PgServiceRepo, ServiceRepo};
pub use step::{PgStepRepo, StepRepo};
pub use user::{PgUserRepo, UserRepo};
pub use worker::{PgWorkerRepo, WorkerRepo};
