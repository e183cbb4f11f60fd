//! Clients for external services.

pub mod github;

pub use github::GitHubScm;
