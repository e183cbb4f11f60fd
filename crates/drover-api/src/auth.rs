//! Request identities: users calling the API and workers claiming builds.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use drover_core::{User, Worker};

use crate::AppState;
use crate::error::ApiError;

pub const USER_HEADER: &str = "X-Drover-User";

/// The user named by the `X-Drover-User` header.
pub struct Caller(pub User);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let name = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", USER_HEADER)))?;

        let user = state.store.users.get_by_name(name).await.map_err(|e| {
            if e.is_not_found() {
                ApiError::Unauthorized(format!("unknown user {}", name))
            } else {
                e.into()
            }
        })?;

        if !user.active {
            return Err(ApiError::Unauthorized(format!("user {} is not active", name)));
        }
        Ok(Caller(user))
    }
}

/// A registered worker authenticated with a minted bearer token.
pub struct WorkerIdentity(pub Worker);

impl FromRequestParts<AppState> for WorkerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let hostname = state.minter.validate(token)?;
        let worker = state
            .store
            .workers
            .get_by_hostname(&hostname)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ApiError::Unauthorized(format!("unknown worker {}", hostname))
                } else {
                    e.into()
                }
            })?;

        if !worker.active {
            return Err(ApiError::Forbidden(format!("worker {} is not active", hostname)));
        }
        Ok(WorkerIdentity(worker))
    }
}
