//! Repository records and the per-repository build counter.

use async_trait::async_trait;
use drover_core::{AllowEvents, ApprovalPolicy, AutoCancelOptions, PipelineType, Repo, ResourceId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::parse_column;
use crate::{DbError, DbResult};

/// Database row for repositories.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepoRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub org: String,
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
    pub branch: String,
    pub build_limit: i64,
    pub counter: i64,
    pub active: bool,
    pub allow_events: i64,
    pub approve_build: String,
    pub auto_cancel_running: bool,
    pub auto_cancel_pending: bool,
    pub auto_cancel_default_branch: bool,
    pub pipeline_type: String,
}

impl TryFrom<RepoRow> for Repo {
    type Error = DbError;

    fn try_from(row: RepoRow) -> Result<Self, Self::Error> {
        Ok(Repo {
            id: row.id.into(),
            owner_id: row.owner_id.into(),
            org: row.org,
            name: row.name,
            full_name: row.full_name,
            clone_url: row.clone_url,
            branch: row.branch,
            build_limit: row.build_limit,
            counter: row.counter,
            active: row.active,
            allow_events: AllowEvents(row.allow_events as u64),
            approve_build: parse_column::<ApprovalPolicy>(&row.approve_build)?,
            auto_cancel: AutoCancelOptions {
                running: row.auto_cancel_running,
                pending: row.auto_cancel_pending,
                default_branch: row.auto_cancel_default_branch,
            },
            pipeline_type: parse_column::<PipelineType>(&row.pipeline_type)?,
        })
    }
}

#[async_trait]
pub trait RepoRepo: Send + Sync {
    async fn create(&self, repo: &Repo) -> DbResult<Repo>;

    async fn get(&self, id: ResourceId) -> DbResult<Repo>;

    async fn get_for_org(&self, org: &str, name: &str) -> DbResult<Repo>;

    /// Update settings. The counter is only moved by [`RepoRepo::increment_counter`].
    async fn update(&self, repo: &Repo) -> DbResult<Repo>;

    /// Move the counter from `expected` to `expected + 1`.
    ///
    /// Fails with `Conflict` if another writer moved it first.
    async fn increment_counter(&self, id: ResourceId, expected: i64) -> DbResult<Repo>;
}

/// PostgreSQL implementation of RepoRepo.
pub struct PgRepoRepo {
    pool: PgPool,
}

impl PgRepoRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepoRepo for PgRepoRepo {
    async fn create(&self, repo: &Repo) -> DbResult<Repo> {
        let row = sqlx::query_as::<_, RepoRow>(
            r#"
            INSERT INTO repos (
                id, owner_id, org, name, full_name, clone_url, branch, build_limit,
                counter, active, allow_events, approve_build, auto_cancel_running,
                auto_cancel_pending, auto_cancel_default_branch, pipeline_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(repo.id.as_uuid())
        .bind(repo.owner_id.as_uuid())
        .bind(&repo.org)
        .bind(&repo.name)
        .bind(&repo.full_name)
        .bind(&repo.clone_url)
        .bind(&repo.branch)
        .bind(repo.build_limit)
        .bind(repo.counter)
        .bind(repo.active)
        .bind(repo.allow_events.0 as i64)
        .bind(repo.approve_build.to_string())
        .bind(repo.auto_cancel.running)
        .bind(repo.auto_cancel.pending)
        .bind(repo.auto_cancel.default_branch)
        .bind(repo.pipeline_type.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::on_insert(e, format!("repo {}", repo.full_name)))?;
        row.try_into()
    }

    async fn get(&self, id: ResourceId) -> DbResult<Repo> {
        let row = sqlx::query_as::<_, RepoRow>("SELECT * FROM repos WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("repo {}", id)))?;
        row.try_into()
    }

    async fn get_for_org(&self, org: &str, name: &str) -> DbResult<Repo> {
        let row = sqlx::query_as::<_, RepoRow>("SELECT * FROM repos WHERE org = $1 AND name = $2")
            .bind(org)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("repo {}/{}", org, name)))?;
        row.try_into()
    }

    async fn update(&self, repo: &Repo) -> DbResult<Repo> {
        let row = sqlx::query_as::<_, RepoRow>(
            r#"
            UPDATE repos SET
                clone_url = $2, branch = $3, build_limit = $4, active = $5,
                allow_events = $6, approve_build = $7, auto_cancel_running = $8,
                auto_cancel_pending = $9, auto_cancel_default_branch = $10,
                pipeline_type = $11
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(repo.id.as_uuid())
        .bind(&repo.clone_url)
        .bind(&repo.branch)
        .bind(repo.build_limit)
        .bind(repo.active)
        .bind(repo.allow_events.0 as i64)
        .bind(repo.approve_build.to_string())
        .bind(repo.auto_cancel.running)
        .bind(repo.auto_cancel.pending)
        .bind(repo.auto_cancel.default_branch)
        .bind(repo.pipeline_type.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("repo {}", repo.id)))?;
        row.try_into()
    }

    async fn increment_counter(&self, id: ResourceId, expected: i64) -> DbResult<Repo> {
        let row = sqlx::query_as::<_, RepoRow>(
            "UPDATE repos SET counter = counter + 1 WHERE id = $1 AND counter = $2 RETURNING *",
        )
        .bind(id.as_uuid())
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                // Distinguish a lost race from a missing repository.
                self.get(id).await?;
                Err(DbError::Conflict(format!(
                    "counter of repo {} moved past {}",
                    id, expected
                )))
            }
        }
    }
}
