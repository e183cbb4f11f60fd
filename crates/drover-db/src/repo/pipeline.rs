//! Compiled pipeline cache, keyed by (repository, commit).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{Pipeline, PipelineType, ResourceId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::parse_column;
use crate::{DbError, DbResult};

/// Database row for pipelines.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineRow {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub commit_sha: String,
    pub git_ref: String,
    pub pipeline_type: String,
    pub version: String,
    pub data: Vec<u8>,
    pub created: DateTime<Utc>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = DbError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        Ok(Pipeline {
            id: row.id.into(),
            repo_id: row.repo_id.into(),
            commit: row.commit_sha,
            git_ref: row.git_ref,
            pipeline_type: parse_column::<PipelineType>(&row.pipeline_type)?,
            version: row.version,
            data: row.data,
            created: row.created,
        })
    }
}

#[async_trait]
pub trait PipelineRepo: Send + Sync {
    /// Insert a pipeline. Fails with `Duplicate` if the commit is already cached.
    async fn create(&self, pipeline: &Pipeline) -> DbResult<Pipeline>;

    async fn get_for_repo(&self, repo_id: ResourceId, commit: &str) -> DbResult<Pipeline>;
}

/// PostgreSQL implementation of PipelineRepo.
pub struct PgPipelineRepo {
    pool: PgPool,
}

impl PgPipelineRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineRepo for PgPipelineRepo {
    async fn create(&self, pipeline: &Pipeline) -> DbResult<Pipeline> {
        let row = sqlx::query_as::<_, PipelineRow>(
            r#"
            INSERT INTO pipelines (id, repo_id, commit_sha, git_ref, pipeline_type, version, data, created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(pipeline.id.as_uuid())
        .bind(pipeline.repo_id.as_uuid())
        .bind(&pipeline.commit)
        .bind(&pipeline.git_ref)
        .bind(pipeline.pipeline_type.to_string())
        .bind(&pipeline.version)
        .bind(&pipeline.data)
        .bind(pipeline.created)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::on_insert(e, format!("pipeline for commit {}", pipeline.commit)))?;
        row.try_into()
    }

    async fn get_for_repo(&self, repo_id: ResourceId, commit: &str) -> DbResult<Pipeline> {
        let row = sqlx::query_as::<_, PipelineRow>(
            "SELECT * FROM pipelines WHERE repo_id = $1 AND commit_sha = $2",
        )
        .bind(repo_id.as_uuid())
        .bind(commit)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("pipeline for commit {}", commit)))?;
        row.try_into()
    }
}
