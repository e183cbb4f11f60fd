//! Worker registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::Worker;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkerRow {
    pub id: Uuid,
    pub hostname: String,
    pub address: String,
    pub routes: Vec<String>,
    pub active: bool,
    pub last_checked_in: Option<DateTime<Utc>>,
}

impl From<WorkerRow> for Worker {
    fn from(row: WorkerRow) -> Self {
        Worker {
            id: row.id.into(),
            hostname: row.hostname,
            address: row.address,
            routes: row.routes,
            active: row.active,
            last_checked_in: row.last_checked_in,
        }
    }
}

#[async_trait]
pub trait WorkerRepo: Send + Sync {
    /// Register a worker, replacing the record of the same hostname.
    async fn upsert(&self, worker: &Worker) -> DbResult<Worker>;

    async fn get_by_hostname(&self, hostname: &str) -> DbResult<Worker>;

    async fn list(&self) -> DbResult<Vec<Worker>>;
}

/// PostgreSQL implementation of WorkerRepo.
pub struct PgWorkerRepo {
    pool: PgPool,
}

impl PgWorkerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRepo for PgWorkerRepo {
    async fn upsert(&self, worker: &Worker) -> DbResult<Worker> {
        let row = sqlx::query_as::<_, WorkerRow>(
            r#"
            INSERT INTO workers (id, hostname, address, routes, active, last_checked_in)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (hostname) DO UPDATE SET
                address = EXCLUDED.address,
                routes = EXCLUDED.routes,
                active = EXCLUDED.active,
                last_checked_in = EXCLUDED.last_checked_in
            RETURNING *
            "#,
        )
        .bind(worker.id.as_uuid())
        .bind(&worker.hostname)
        .bind(&worker.address)
        .bind(&worker.routes)
        .bind(worker.active)
        .bind(worker.last_checked_in)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_by_hostname(&self, hostname: &str) -> DbResult<Worker> {
        let row = sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers WHERE hostname = $1")
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("worker {}", hostname)))?;
        Ok(row.into())
    }

    async fn list(&self) -> DbResult<Vec<Worker>> {
        let rows = sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers ORDER BY hostname")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Worker::from).collect())
    }
}
