//! Service repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{BuildStatus, ResourceId, Service};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::parse_column;
use crate::{DbError, DbResult};

/// Database row for services.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: Uuid,
    pub build_id: Uuid,
    pub repo_id: Uuid,
    pub number: i64,
    pub name: String,
    pub image: String,
    pub status: String,
    pub error: Option<String>,
    pub exit_code: i32,
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub host: String,
    pub runtime: String,
    pub distribution: String,
    pub environment: serde_json::Value,
}

impl TryFrom<ServiceRow> for Service {
    type Error = DbError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        Ok(Service {
            id: row.id.into(),
            build_id: row.build_id.into(),
            repo_id: row.repo_id.into(),
            number: row.number,
            name: row.name,
            image: row.image,
            status: parse_column::<BuildStatus>(&row.status)?,
            error: row.error,
            exit_code: row.exit_code,
            created: row.created,
            started: row.started,
            finished: row.finished,
            host: row.host,
            runtime: row.runtime,
            distribution: row.distribution,
            environment: serde_json::from_value(row.environment)?,
        })
    }
}

#[async_trait]
pub trait ServiceRepo: Send + Sync {
    /// Insert a service. (build, number) must be unique.
    async fn create(&self, service: &Service) -> DbResult<Service>;

    async fn update(&self, service: &Service) -> DbResult<Service>;

    async fn list_for_build(&self, build_id: ResourceId) -> DbResult<Vec<Service>>;
}

/// PostgreSQL implementation of ServiceRepo.
pub struct PgServiceRepo {
    pool: PgPool,
}

impl PgServiceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceRepo for PgServiceRepo {
    async fn create(&self, service: &Service) -> DbResult<Service> {
        let row = sqlx::query_as::<_, ServiceRow>(
            r#"
            INSERT INTO services (
                id, build_id, repo_id, number, name, image, status, error, exit_code,
                created, started, finished, host, runtime, distribution, environment
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(service.id.as_uuid())
        .bind(service.build_id.as_uuid())
        .bind(service.repo_id.as_uuid())
        .bind(service.number)
        .bind(&service.name)
        .bind(&service.image)
        .bind(service.status.to_string())
        .bind(&service.error)
        .bind(service.exit_code)
        .bind(service.created)
        .bind(service.started)
        .bind(service.finished)
        .bind(&service.host)
        .bind(&service.runtime)
        .bind(&service.distribution)
        .bind(serde_json::to_value(&service.environment)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            DbError::on_insert(e, format!("service {} for build {}", service.number, service.build_id))
        })?;
        row.try_into()
    }

    async fn update(&self, service: &Service) -> DbResult<Service> {
        let row = sqlx::query_as::<_, ServiceRow>(
            r#"
            UPDATE services SET
                status = $2, error = $3, exit_code = $4, started = $5, finished = $6,
                host = $7, runtime = $8, distribution = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(service.id.as_uuid())
        .bind(service.status.to_string())
        .bind(&service.error)
        .bind(service.exit_code)
        .bind(service.started)
        .bind(service.finished)
        .bind(&service.host)
        .bind(&service.runtime)
        .bind(&service.distribution)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("service {}", service.id)))?;
        row.try_into()
    }

    async fn list_for_build(&self, build_id: ResourceId) -> DbResult<Vec<Service>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT * FROM services WHERE build_id = $1 ORDER BY number ASC",
        )
        .bind(build_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Service::try_from).collect()
    }
}
