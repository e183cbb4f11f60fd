//! Step repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{BuildStatus, ResourceId, Step};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::parse_column;
use crate::{DbError, DbResult};

/// Database row for steps.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepRow {
    pub id: Uuid,
    pub build_id: Uuid,
    pub repo_id: Uuid,
    pub number: i64,
    pub name: String,
    pub image: String,
    pub stage: String,
    pub status: String,
    pub error: Option<String>,
    pub exit_code: i32,
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub host: String,
    pub runtime: String,
    pub distribution: String,
    pub report_as: Option<String>,
    pub check_id: Option<i64>,
    pub environment: serde_json::Value,
}

impl TryFrom<StepRow> for Step {
    type Error = DbError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Step {
            id: row.id.into(),
            build_id: row.build_id.into(),
            repo_id: row.repo_id.into(),
            number: row.number,
            name: row.name,
            image: row.image,
            stage: row.stage,
            status: parse_column::<BuildStatus>(&row.status)?,
            error: row.error,
            exit_code: row.exit_code,
            created: row.created,
            started: row.started,
            finished: row.finished,
            host: row.host,
            runtime: row.runtime,
            distribution: row.distribution,
            report_as: row.report_as,
            check_id: row.check_id,
            environment: serde_json::from_value(row.environment)?,
        })
    }
}

#[async_trait]
pub trait StepRepo: Send + Sync {
    /// Insert a step. (build, number) must be unique.
    async fn create(&self, step: &Step) -> DbResult<Step>;

    async fn update(&self, step: &Step) -> DbResult<Step>;

    /// Steps of a build ordered by number.
    async fn list_for_build(&self, build_id: ResourceId) -> DbResult<Vec<Step>>;
}

/// PostgreSQL implementation of StepRepo.
pub struct PgStepRepo {
    pool: PgPool,
}

impl PgStepRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StepRepo for PgStepRepo {
    async fn create(&self, step: &Step) -> DbResult<Step> {
        let row = sqlx::query_as::<_, StepRow>(
            r#"
            INSERT INTO steps (
                id, build_id, repo_id, number, name, image, stage, status, error,
                exit_code, created, started, finished, host, runtime, distribution,
                report_as, check_id, environment
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19)
            RETURNING *
            "#,
        )
        .bind(step.id.as_uuid())
        .bind(step.build_id.as_uuid())
        .bind(step.repo_id.as_uuid())
        .bind(step.number)
        .bind(&step.name)
        .bind(&step.image)
        .bind(&step.stage)
        .bind(step.status.to_string())
        .bind(&step.error)
        .bind(step.exit_code)
        .bind(step.created)
        .bind(step.started)
        .bind(step.finished)
        .bind(&step.host)
        .bind(&step.runtime)
        .bind(&step.distribution)
        .bind(&step.report_as)
        .bind(step.check_id)
        .bind(serde_json::to_value(&step.environment)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::on_insert(e, format!("step {} for build {}", step.number, step.build_id)))?;
        row.try_into()
    }

    async fn update(&self, step: &Step) -> DbResult<Step> {
        let row = sqlx::query_as::<_, StepRow>(
            r#"
            UPDATE steps SET
                status = $2, error = $3, exit_code = $4, started = $5, finished = $6,
                host = $7, runtime = $8, distribution = $9, check_id = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(step.id.as_uuid())
        .bind(step.status.to_string())
        .bind(&step.error)
        .bind(step.exit_code)
        .bind(step.started)
        .bind(step.finished)
        .bind(&step.host)
        .bind(&step.runtime)
        .bind(&step.distribution)
        .bind(step.check_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("step {}", step.id)))?;
        row.try_into()
    }

    async fn list_for_build(&self, build_id: ResourceId) -> DbResult<Vec<Step>> {
        let rows = sqlx::query_as::<_, StepRow>(
            "SELECT * FROM steps WHERE build_id = $1 ORDER BY number ASC",
        )
        .bind(build_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }
}
