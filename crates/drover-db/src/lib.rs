//! Row store for Drover CI/CD.
//!
//! One repository trait per entity, with PostgreSQL implementations and an
//! in-memory implementation for tests and single-process development.

pub mod error;
pub mod memory;
pub mod repo;

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Every entity repository the build lifecycle touches.
#[derive(Clone)]
pub struct Store {
    pub builds: Arc<dyn BuildRepo>,
    pub steps: Arc<dyn StepRepo>,
    pub services: Arc<dyn ServiceRepo>,
    pub logs: Arc<dyn LogRepo>,
    pub pipelines: Arc<dyn PipelineRepo>,
    pub executables: Arc<dyn ExecutableRepo>,
    pub repos: Arc<dyn RepoRepo>,
    pub users: Arc<dyn UserRepo>,
    pub workers: Arc<dyn WorkerRepo>,
}

impl Store {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            builds: Arc::new(PgBuildRepo::new(pool.clone())),
            steps: Arc::new(PgStepRepo::new(pool.clone())),
            services: Arc::new(PgServiceRepo::new(pool.clone())),
            logs: Arc::new(PgLogRepo::new(pool.clone())),
            pipelines: Arc::new(PgPipelineRepo::new(pool.clone())),
            executables: Arc::new(PgExecutableRepo::new(pool.clone())),
            repos: Arc::new(PgRepoRepo::new(pool.clone())),
            users: Arc::new(PgUserRepo::new(pool.clone())),
            workers: Arc::new(PgWorkerRepo::new(pool)),
        }
    }

    pub fn memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            builds: store.clone(),
            steps: store.clone(),
            services: store.clone(),
            logs: store.clone(),
            pipelines: store.clone(),
            executables: store.clone(),
            repos: store.clone(),
            users: store.clone(),
            workers: store,
        }
    }
}
