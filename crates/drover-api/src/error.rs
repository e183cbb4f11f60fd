//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use drover_scheduler::SchedulerError;
use serde_json::json;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    TooManyRequests(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::Conflict(msg)
            | ApiError::TooManyRequests(msg) => msg,
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                msg
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<drover_core::Error> for ApiError {
    fn from(err: drover_core::Error) -> Self {
        match err {
            drover_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            drover_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            drover_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            drover_core::Error::Forbidden(msg) => ApiError::Forbidden(msg),
            drover_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<drover_db::DbError> for ApiError {
    fn from(err: drover_db::DbError) -> Self {
        match err {
            drover_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            drover_db::DbError::Duplicate(msg) | drover_db::DbError::Conflict(msg) => {
                ApiError::Conflict(msg)
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            SchedulerError::InvalidInput(msg) => ApiError::BadRequest(msg),
            SchedulerError::LimitExceeded(msg) => ApiError::TooManyRequests(msg),
            SchedulerError::NotFound(msg) => ApiError::NotFound(msg),
            SchedulerError::Conflict(msg) => ApiError::Conflict(msg),
            SchedulerError::Core(err) => err.into(),
            err if err.is_not_found() => ApiError::NotFound(err.to_string()),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_db::DbError;

    #[test]
    fn test_scheduler_errors_map_to_status_codes() {
        let cases = [
            (SchedulerError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (SchedulerError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (SchedulerError::LimitExceeded("x".into()), StatusCode::TOO_MANY_REQUESTS),
            (SchedulerError::Conflict("x".into()), StatusCode::CONFLICT),
            (SchedulerError::Compile("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                SchedulerError::Db {
                    context: "unable to get build".into(),
                    source: DbError::NotFound("build 1".into()),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                SchedulerError::Core(drover_core::Error::Forbidden("x".into())),
                StatusCode::FORBIDDEN,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_duplicate_rows_conflict() {
        let err = ApiError::from(DbError::Duplicate("repo octo/widgets".into()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
