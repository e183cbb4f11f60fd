//! API routes.

pub mod builds;
pub mod health;
pub mod webhooks;
pub mod worker;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .nest("/webhooks", webhooks::router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/repos/{org}/{repo}/builds", builds::router())
        .merge(worker::router())
}
