//! Build endpoints scoped to a repository.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use drover_core::{Build, BuildStatus, BuildUpdate, Event, Repo};
use drover_db::BuildFilter;
use drover_scheduler::Admission;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::auth::{Caller, WorkerIdentity};
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_builds).post(create_build))
        .route(
            "/{number}",
            get(get_build).post(restart_build).put(update_build),
        )
        .route("/{number}/cancel", delete(cancel_build))
        .route("/{number}/approve", post(approve_build))
}

/// Outcome of a trigger, as returned to API and webhook callers.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AdmissionResponse {
    Queued { build: Build },
    PendingApproval { build: Build },
    Skipped { build: Build, message: String },
    Ignored { message: String },
}

impl AdmissionResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionResponse::Queued { .. } | AdmissionResponse::PendingApproval { .. } => {
                StatusCode::CREATED
            }
            AdmissionResponse::Skipped { .. } | AdmissionResponse::Ignored { .. } => StatusCode::OK,
        }
    }
}

impl From<Admission> for AdmissionResponse {
    fn from(admission: Admission) -> Self {
        match admission {
            Admission::Queued(build) => AdmissionResponse::Queued { build },
            Admission::PendingApproval(build) => AdmissionResponse::PendingApproval { build },
            Admission::Skipped { build, message } => AdmissionResponse::Skipped { build, message },
            Admission::Ignored(message) => AdmissionResponse::Ignored { message },
        }
    }
}

pub(crate) async fn load_repo(state: &AppState, org: &str, name: &str) -> Result<Repo, ApiError> {
    Ok(state.store.repos.get_for_org(org, name).await?)
}

#[derive(Debug, Deserialize)]
struct CreateBuildRequest {
    branch: String,
    commit: String,
    #[serde(default)]
    event: Option<Event>,
    #[serde(default, rename = "ref")]
    git_ref: Option<String>,
    #[serde(default)]
    message: String,
}

async fn create_build(
    State(state): State<AppState>,
    Path((org, name)): Path<(String, String)>,
    Caller(user): Caller,
    Json(req): Json<CreateBuildRequest>,
) -> Result<(StatusCode, Json<AdmissionResponse>), ApiError> {
    if req.branch.is_empty() || req.commit.is_empty() {
        return Err(ApiError::BadRequest(
            "branch and commit are required".to_string(),
        ));
    }

    let repo = load_repo(&state, &org, &name).await?;
    let git_ref = req
        .git_ref
        .unwrap_or_else(|| format!("refs/heads/{}", req.branch));
    let draft = Build {
        repo_id: repo.id,
        event: req.event.unwrap_or(Event::Push),
        branch: req.branch,
        commit: req.commit,
        git_ref,
        title: req.message.lines().next().unwrap_or_default().to_string(),
        message: req.message,
        author: user.name.clone(),
        ..Default::default()
    };

    info!(repo = %repo.full_name, user = %user.name, "Creating build");
    let response = AdmissionResponse::from(state.scheduler.create_build(draft, &repo, &user).await?);
    Ok((response.status(), Json(response)))
}

#[derive(Debug, Deserialize)]
struct ListBuildsQuery {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_per_page")]
    per_page: i64,
    status: Option<BuildStatus>,
    event: Option<Event>,
    branch: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    25
}

async fn list_builds(
    State(state): State<AppState>,
    Path((org, name)): Path<(String, String)>,
    Query(query): Query<ListBuildsQuery>,
) -> Result<Json<Vec<Build>>, ApiError> {
    if query.page < 1 || !(1..=100).contains(&query.per_page) {
        return Err(ApiError::BadRequest(
            "page must be positive and per_page between 1 and 100".to_string(),
        ));
    }

    let repo = load_repo(&state, &org, &name).await?;
    let filter = BuildFilter {
        statuses: query.status.into_iter().collect(),
        event: query.event,
        branch: query.branch,
    };
    let builds = state
        .store
        .builds
        .list_for_repo(repo.id, &filter, query.page, query.per_page)
        .await?;
    Ok(Json(builds))
}

async fn get_build(
    State(state): State<AppState>,
    Path((org, name, number)): Path<(String, String, i64)>,
) -> Result<Json<Build>, ApiError> {
    let repo = load_repo(&state, &org, &name).await?;
    let build = state.store.builds.get_for_repo(repo.id, number).await?;
    Ok(Json(build))
}

async fn restart_build(
    State(state): State<AppState>,
    Path((org, name, number)): Path<(String, String, i64)>,
    Caller(user): Caller,
) -> Result<(StatusCode, Json<AdmissionResponse>), ApiError> {
    let repo = load_repo(&state, &org, &name).await?;
    let response =
        AdmissionResponse::from(state.scheduler.restart_build(&repo, number, &user).await?);
    Ok((response.status(), Json(response)))
}

async fn update_build(
    State(state): State<AppState>,
    Path((org, name, number)): Path<(String, String, i64)>,
    WorkerIdentity(worker): WorkerIdentity,
    Json(update): Json<BuildUpdate>,
) -> Result<Json<Build>, ApiError> {
    let repo = load_repo(&state, &org, &name).await?;
    let build = state.scheduler.update(&repo, number, &update).await?;
    info!(
        repo = %repo.full_name,
        build = build.number,
        worker = %worker.hostname,
        status = %build.status,
        "Worker updated build"
    );
    Ok(Json(build))
}

async fn cancel_build(
    State(state): State<AppState>,
    Path((org, name, number)): Path<(String, String, i64)>,
    Caller(user): Caller,
) -> Result<Json<Build>, ApiError> {
    let repo = load_repo(&state, &org, &name).await?;
    let build = state.scheduler.cancel(&repo, number, &user).await?;
    Ok(Json(build))
}

async fn approve_build(
    State(state): State<AppState>,
    Path((org, name, number)): Path<(String, String, i64)>,
    Caller(user): Caller,
) -> Result<Json<Build>, ApiError> {
    let repo = load_repo(&state, &org, &name).await?;
    let build = state.scheduler.approve(&repo, number, &user).await?;
    Ok(Json(build))
}
