//! Step, service and log records created for every planned build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::build::{Build, BuildStatus};
use crate::pipeline::Container;
use crate::ResourceId;

/// A single step of a build, unique per (build, number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: ResourceId,
    pub build_id: ResourceId,
    pub repo_id: ResourceId,
    pub number: i64,
    pub name: String,
    pub image: String,
    /// Name of the stage the step belongs to, empty for step pipelines.
    pub stage: String,
    pub status: BuildStatus,
    pub error: Option<String>,
    pub exit_code: i32,
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub host: String,
    pub runtime: String,
    pub distribution: String,
    /// Commit status context the step reports as.
    pub report_as: Option<String>,
    /// Check identifier returned by the SCM for `report_as` steps.
    pub check_id: Option<i64>,
    pub environment: HashMap<String, String>,
}

impl Step {
    pub fn from_container(container: &Container, build: &Build, stage: &str) -> Self {
        Self {
            id: ResourceId::new(),
            build_id: build.id,
            repo_id: build.repo_id,
            number: container.number,
            name: container.name.clone(),
            image: container.image.clone(),
            stage: stage.to_string(),
            status: BuildStatus::Pending,
            error: None,
            exit_code: 0,
            created: Some(Utc::now()),
            started: None,
            finished: None,
            host: build.host.clone(),
            runtime: build.runtime.clone(),
            distribution: build.distribution.clone(),
            report_as: container.report_as.clone(),
            check_id: None,
            environment: HashMap::new(),
        }
    }

    /// Variables describing the step, exposed to the container running it.
    pub fn environment(&self) -> HashMap<String, String> {
        HashMap::from([
            ("DROVER_STEP_NAME".to_string(), self.name.clone()),
            ("DROVER_STEP_NUMBER".to_string(), self.number.to_string()),
            ("DROVER_STEP_IMAGE".to_string(), self.image.clone()),
            ("DROVER_STEP_STAGE".to_string(), self.stage.clone()),
            ("DROVER_STEP_STATUS".to_string(), self.status.to_string()),
            (
                "DROVER_STEP_REPORT_AS".to_string(),
                self.report_as.clone().unwrap_or_default(),
            ),
        ])
    }
}

/// A detached service container of a build, unique per (build, number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ResourceId,
    pub build_id: ResourceId,
    pub repo_id: ResourceId,
    pub number: i64,
    pub name: String,
    pub image: String,
    pub status: BuildStatus,
    pub error: Option<String>,
    pub exit_code: i32,
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub host: String,
    pub runtime: String,
    pub distribution: String,
    pub environment: HashMap<String, String>,
}

impl Service {
    pub fn from_container(container: &Container, build: &Build) -> Self {
        Self {
            id: ResourceId::new(),
            build_id: build.id,
            repo_id: build.repo_id,
            number: container.number,
            name: container.name.clone(),
            image: container.image.clone(),
            status: BuildStatus::Pending,
            error: None,
            exit_code: 0,
            created: Some(Utc::now()),
            started: None,
            finished: None,
            host: build.host.clone(),
            runtime: build.runtime.clone(),
            distribution: build.distribution.clone(),
            environment: HashMap::new(),
        }
    }

    pub fn environment(&self) -> HashMap<String, String> {
        HashMap::from([
            ("DROVER_SERVICE_NAME".to_string(), self.name.clone()),
            ("DROVER_SERVICE_NUMBER".to_string(), self.number.to_string()),
            ("DROVER_SERVICE_IMAGE".to_string(), self.image.clone()),
            ("DROVER_SERVICE_STATUS".to_string(), self.status.to_string()),
        ])
    }
}

/// Log output of one step or service. Created empty, filled by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub id: ResourceId,
    pub build_id: ResourceId,
    pub repo_id: ResourceId,
    pub step_id: Option<ResourceId>,
    pub service_id: Option<ResourceId>,
    pub data: Vec<u8>,
}

impl Log {
    pub fn for_step(step: &Step) -> Self {
        Self {
            id: ResourceId::new(),
            build_id: step.build_id,
            repo_id: step.repo_id,
            step_id: Some(step.id),
            service_id: None,
            data: Vec::new(),
        }
    }

    pub fn for_service(service: &Service) -> Self {
        Self {
            id: ResourceId::new(),
            build_id: service.build_id,
            repo_id: service.repo_id,
            step_id: None,
            service_id: Some(service.id),
            data: Vec::new(),
        }
    }
}
