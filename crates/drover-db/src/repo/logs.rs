//! Log repository. Rows are created empty when a build is planned.

use async_trait::async_trait;
use drover_core::{Log, ResourceId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Database row for logs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LogRow {
    pub id: Uuid,
    pub build_id: Uuid,
    pub repo_id: Uuid,
    pub step_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub data: Vec<u8>,
}

impl From<LogRow> for Log {
    fn from(row: LogRow) -> Self {
        Log {
            id: row.id.into(),
            build_id: row.build_id.into(),
            repo_id: row.repo_id.into(),
            step_id: row.step_id.map(ResourceId::from),
            service_id: row.service_id.map(ResourceId::from),
            data: row.data,
        }
    }
}

#[async_trait]
pub trait LogRepo: Send + Sync {
    async fn create(&self, log: &Log) -> DbResult<Log>;

    async fn get_for_step(&self, step_id: ResourceId) -> DbResult<Log>;

    async fn get_for_service(&self, service_id: ResourceId) -> DbResult<Log>;
}

/// PostgreSQL implementation of LogRepo.
pub struct PgLogRepo {
    pool: PgPool,
}

impl PgLogRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogRepo for PgLogRepo {
    async fn create(&self, log: &Log) -> DbResult<Log> {
        let row = sqlx::query_as::<_, LogRow>(
            r#"
            INSERT INTO logs (id, build_id, repo_id, step_id, service_id, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(log.id.as_uuid())
        .bind(log.build_id.as_uuid())
        .bind(log.repo_id.as_uuid())
        .bind(log.step_id.map(Uuid::from))
        .bind(log.service_id.map(Uuid::from))
        .bind(&log.data)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_for_step(&self, step_id: ResourceId) -> DbResult<Log> {
        let row = sqlx::query_as::<_, LogRow>("SELECT * FROM logs WHERE step_id = $1")
            .bind(step_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("log for step {}", step_id)))?;
        Ok(row.into())
    }

    async fn get_for_service(&self, service_id: ResourceId) -> DbResult<Log> {
        let row = sqlx::query_as::<_, LogRow>("SELECT * FROM logs WHERE service_id = $1")
            .bind(service_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("log for service {}", service_id)))?;
        Ok(row.into())
    }
}
