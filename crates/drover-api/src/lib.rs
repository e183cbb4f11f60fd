//! API server for Drover CI/CD.
//!
//! Provides the build REST API, worker endpoints and SCM webhooks.

pub mod auth;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
