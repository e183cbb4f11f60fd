//! Remote worker records and the client used to reach them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::build::Build;
use crate::{ResourceId, Result};

/// A registered worker that claims builds from one or more routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: ResourceId,
    pub hostname: String,
    /// Base URL of the worker API.
    pub address: String,
    pub routes: Vec<String>,
    pub active: bool,
    pub last_checked_in: Option<DateTime<Utc>>,
}

/// An execution slot reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub id: i64,
    pub host: String,
    pub runtime: String,
    pub distribution: String,
    pub running: bool,
    pub build_id: Option<ResourceId>,
}

#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// List the executors of a worker.
    async fn list_executors(&self, worker: &Worker) -> Result<Vec<ExecutorInfo>>;

    /// Ask a worker to cancel the build running on one of its executors.
    ///
    /// Returns the build as the worker last saw it.
    async fn cancel_build(&self, worker: &Worker, executor_id: i64) -> Result<Build>;
}
