//! Build repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{Action, Build, BuildStatus, Event, PipelineType, ResourceId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::parse_column;
use crate::{DbError, DbResult};

/// Database row for builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildRow {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub number: i64,
    pub parent: Option<i64>,
    pub event: String,
    pub event_action: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub enqueued: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub title: String,
    pub message: String,
    pub commit_sha: String,
    pub sender: String,
    pub author: String,
    pub branch: String,
    pub git_ref: String,
    pub base_ref: String,
    pub head_ref: String,
    pub host: String,
    pub runtime: String,
    pub distribution: String,
    pub fork: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub pipeline_type: Option<String>,
    pub pipeline_id: Option<Uuid>,
}

impl TryFrom<BuildRow> for Build {
    type Error = DbError;

    fn try_from(row: BuildRow) -> Result<Self, Self::Error> {
        Ok(Build {
            id: row.id.into(),
            repo_id: row.repo_id.into(),
            number: row.number,
            parent: row.parent,
            event: parse_column::<Event>(&row.event)?,
            event_action: row
                .event_action
                .as_deref()
                .map(parse_column::<Action>)
                .transpose()?,
            status: parse_column::<BuildStatus>(&row.status)?,
            error: row.error,
            created: row.created,
            enqueued: row.enqueued,
            started: row.started,
            finished: row.finished,
            title: row.title,
            message: row.message,
            commit: row.commit_sha,
            sender: row.sender,
            author: row.author,
            branch: row.branch,
            git_ref: row.git_ref,
            base_ref: row.base_ref,
            head_ref: row.head_ref,
            host: row.host,
            runtime: row.runtime,
            distribution: row.distribution,
            fork: row.fork,
            approved_at: row.approved_at,
            approved_by: row.approved_by,
            pipeline_type: row
                .pipeline_type
                .as_deref()
                .map(parse_column::<PipelineType>)
                .transpose()?,
            pipeline_id: row.pipeline_id.map(ResourceId::from),
        })
    }
}

/// Optional constraints for counting and listing builds.
#[derive(Debug, Clone, Default)]
pub struct BuildFilter {
    /// Any of these statuses; empty means all.
    pub statuses: Vec<BuildStatus>,
    pub event: Option<Event>,
    pub branch: Option<String>,
}

impl BuildFilter {
    pub fn with_statuses(statuses: &[BuildStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Default::default()
        }
    }

    pub fn matches(&self, build: &Build) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&build.status))
            && self.event.is_none_or(|e| e == build.event)
            && self.branch.as_ref().is_none_or(|b| *b == build.branch)
    }

    fn status_texts(&self) -> Vec<String> {
        self.statuses.iter().map(|s| s.to_string()).collect()
    }
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Insert a build. (repo, number) must be unique.
    async fn create(&self, build: &Build) -> DbResult<Build>;

    async fn update(&self, build: &Build) -> DbResult<Build>;

    async fn get(&self, id: ResourceId) -> DbResult<Build>;

    async fn get_for_repo(&self, repo_id: ResourceId, number: i64) -> DbResult<Build>;

    async fn delete(&self, id: ResourceId) -> DbResult<()>;

    async fn count_for_repo(&self, repo_id: ResourceId, filter: &BuildFilter) -> DbResult<i64>;

    /// Newest first. `page` starts at 1.
    async fn list_for_repo(
        &self,
        repo_id: ResourceId,
        filter: &BuildFilter,
        page: i64,
        per_page: i64,
    ) -> DbResult<Vec<Build>>;

    /// Newest first across every repository of an organization.
    async fn list_for_org(
        &self,
        org: &str,
        filter: &BuildFilter,
        page: i64,
        per_page: i64,
    ) -> DbResult<Vec<Build>>;
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const FILTER_CLAUSE: &str = r#"
    (cardinality($2::text[]) = 0 OR b.status = ANY($2))
    AND ($3::text IS NULL OR b.event = $3)
    AND ($4::text IS NULL OR b.branch = $4)
"#;

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn create(&self, build: &Build) -> DbResult<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (
                id, repo_id, number, parent, event, event_action, status, error,
                created, enqueued, started, finished, title, message, commit_sha,
                sender, author, branch, git_ref, base_ref, head_ref, host, runtime,
                distribution, fork, approved_at, approved_by, pipeline_type, pipeline_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29)
            RETURNING *
            "#,
        )
        .bind(build.id.as_uuid())
        .bind(build.repo_id.as_uuid())
        .bind(build.number)
        .bind(build.parent)
        .bind(build.event.to_string())
        .bind(build.event_action.map(|a| a.to_string()))
        .bind(build.status.to_string())
        .bind(&build.error)
        .bind(build.created)
        .bind(build.enqueued)
        .bind(build.started)
        .bind(build.finished)
        .bind(&build.title)
        .bind(&build.message)
        .bind(&build.commit)
        .bind(&build.sender)
        .bind(&build.author)
        .bind(&build.branch)
        .bind(&build.git_ref)
        .bind(&build.base_ref)
        .bind(&build.head_ref)
        .bind(&build.host)
        .bind(&build.runtime)
        .bind(&build.distribution)
        .bind(build.fork)
        .bind(build.approved_at)
        .bind(&build.approved_by)
        .bind(build.pipeline_type.map(|t| t.to_string()))
        .bind(build.pipeline_id.map(Uuid::from))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::on_insert(e, format!("build {} for repo {}", build.number, build.repo_id)))?;
        row.try_into()
    }

    async fn update(&self, build: &Build) -> DbResult<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds SET
                status = $2, error = $3, enqueued = $4, started = $5, finished = $6,
                host = $7, runtime = $8, distribution = $9, approved_at = $10,
                approved_by = $11, pipeline_id = $12
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(build.id.as_uuid())
        .bind(build.status.to_string())
        .bind(&build.error)
        .bind(build.enqueued)
        .bind(build.started)
        .bind(build.finished)
        .bind(&build.host)
        .bind(&build.runtime)
        .bind(&build.distribution)
        .bind(build.approved_at)
        .bind(&build.approved_by)
        .bind(build.pipeline_id.map(Uuid::from))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("build {}", build.id)))?;
        row.try_into()
    }

    async fn get(&self, id: ResourceId) -> DbResult<Build> {
        let row = sqlx::query_as::<_, BuildRow>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        row.try_into()
    }

    async fn get_for_repo(&self, repo_id: ResourceId, number: i64) -> DbResult<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            "SELECT * FROM builds WHERE repo_id = $1 AND number = $2",
        )
        .bind(repo_id.as_uuid())
        .bind(number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("build {} for repo {}", number, repo_id)))?;
        row.try_into()
    }

    async fn delete(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("DELETE FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_for_repo(&self, repo_id: ResourceId, filter: &BuildFilter) -> DbResult<i64> {
        let query = format!(
            "SELECT COUNT(*) FROM builds b WHERE b.repo_id = $1 AND {}",
            FILTER_CLAUSE
        );
        let count: i64 = sqlx::query_scalar(&query)
            .bind(repo_id.as_uuid())
            .bind(filter.status_texts())
            .bind(filter.event.map(|e| e.to_string()))
            .bind(&filter.branch)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_for_repo(
        &self,
        repo_id: ResourceId,
        filter: &BuildFilter,
        page: i64,
        per_page: i64,
    ) -> DbResult<Vec<Build>> {
        let query = format!(
            "SELECT b.* FROM builds b WHERE b.repo_id = $1 AND {} ORDER BY b.number DESC LIMIT $5 OFFSET $6",
            FILTER_CLAUSE
        );
        let rows = sqlx::query_as::<_, BuildRow>(&query)
            .bind(repo_id.as_uuid())
            .bind(filter.status_texts())
            .bind(filter.event.map(|e| e.to_string()))
            .bind(&filter.branch)
            .bind(per_page)
            .bind((page.max(1) - 1) * per_page)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Build::try_from).collect()
    }

    async fn list_for_org(
        &self,
        org: &str,
        filter: &BuildFilter,
        page: i64,
        per_page: i64,
    ) -> DbResult<Vec<Build>> {
        let query = format!(
            r#"
            SELECT b.* FROM builds b JOIN repos r ON r.id = b.repo_id
            WHERE r.org = $1 AND {}
            ORDER BY b.created DESC NULLS LAST LIMIT $5 OFFSET $6
            "#,
            FILTER_CLAUSE
        );
        let rows = sqlx::query_as::<_, BuildRow>(&query)
            .bind(org)
            .bind(filter.status_texts())
            .bind(filter.event.map(|e| e.to_string()))
            .bind(&filter.branch)
            .bind(per_page)
            .bind((page.max(1) - 1) * per_page)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Build::try_from).collect()
    }
}
