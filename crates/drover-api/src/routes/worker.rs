//! Endpoints workers call to claim builds and fetch their plans.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use drover_core::ResourceId;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::AppState;
use crate::auth::WorkerIdentity;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue/pop", post(pop_queue))
        .route("/builds/{id}/executable", get(pop_executable))
}

#[derive(Debug, Serialize)]
struct ClaimResponse {
    build_id: ResourceId,
}

/// Claim the oldest build waiting on any route the worker serves.
async fn pop_queue(
    State(state): State<AppState>,
    WorkerIdentity(worker): WorkerIdentity,
) -> Result<Response, ApiError> {
    match state.scheduler.claim(&worker.routes).await? {
        Some(build_id) => {
            info!(worker = %worker.hostname, build_id = %build_id, "Worker claimed build");
            Ok(Json(ClaimResponse { build_id }).into_response())
        }
        None => {
            debug!(worker = %worker.hostname, "No build waiting");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

/// Hand out the executable plan of a claimed build. A second call for the
/// same build is a 404.
async fn pop_executable(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    WorkerIdentity(worker): WorkerIdentity,
) -> Result<Response, ApiError> {
    let executable = state
        .scheduler
        .pop_executable(ResourceId::from_uuid(id))
        .await?;

    info!(worker = %worker.hostname, build_id = %executable.build_id, "Worker fetched executable");
    Ok(([(CONTENT_TYPE, "application/json")], executable.data).into_response())
}
