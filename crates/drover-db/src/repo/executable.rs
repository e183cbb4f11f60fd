//! Executable plans waiting for a worker. Each row can be popped once.

use async_trait::async_trait;
use drover_core::{BuildExecutable, ResourceId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutableRow {
    pub id: Uuid,
    pub build_id: Uuid,
    pub data: Vec<u8>,
}

impl From<ExecutableRow> for BuildExecutable {
    fn from(row: ExecutableRow) -> Self {
        BuildExecutable {
            id: row.id.into(),
            build_id: row.build_id.into(),
            data: row.data,
        }
    }
}

#[async_trait]
pub trait ExecutableRepo: Send + Sync {
    async fn create(&self, executable: &BuildExecutable) -> DbResult<()>;

    /// Atomically read and delete the executable of a build.
    async fn pop(&self, build_id: ResourceId) -> DbResult<BuildExecutable>;
}

/// PostgreSQL implementation of ExecutableRepo.
pub struct PgExecutableRepo {
    pool: PgPool,
}

impl PgExecutableRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutableRepo for PgExecutableRepo {
    async fn create(&self, executable: &BuildExecutable) -> DbResult<()> {
        sqlx::query("INSERT INTO build_executables (id, build_id, data) VALUES ($1, $2, $3)")
            .bind(executable.id.as_uuid())
            .bind(executable.build_id.as_uuid())
            .bind(&executable.data)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::on_insert(e, format!("executable for build {}", executable.build_id)))?;
        Ok(())
    }

    async fn pop(&self, build_id: ResourceId) -> DbResult<BuildExecutable> {
        let row = sqlx::query_as::<_, ExecutableRow>(
            "DELETE FROM build_executables WHERE build_id = $1 RETURNING *",
        )
        .bind(build_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("executable for build {}", build_id)))?;
        Ok(row.into())
    }
}
