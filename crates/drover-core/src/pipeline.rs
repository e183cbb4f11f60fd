//! Compiled pipeline records and the executable plan handed to workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;

/// Configuration language a pipeline is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineType {
    #[default]
    Kdl,
    Yaml,
}

impl std::fmt::Display for PipelineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineType::Kdl => write!(f, "kdl"),
            PipelineType::Yaml => write!(f, "yaml"),
        }
    }
}

impl std::str::FromStr for PipelineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kdl" => Ok(PipelineType::Kdl),
            "yaml" => Ok(PipelineType::Yaml),
            _ => Err(format!("Unknown pipeline type: {}", s)),
        }
    }
}

/// Compiled configuration cached per (repository, commit).
///
/// Written once when a commit is first built and never mutated, so
/// restarts recompile from the exact same source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: ResourceId,
    pub repo_id: ResourceId,
    pub commit: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub pipeline_type: PipelineType,
    pub version: String,
    /// Raw configuration bytes the plan was compiled from.
    pub data: Vec<u8>,
    pub created: DateTime<Utc>,
}

/// Serialized plan a worker claims exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildExecutable {
    pub id: ResourceId,
    pub build_id: ResourceId,
    pub data: Vec<u8>,
}

/// Hints used to pick the queue route for a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAffinity {
    pub flavor: Option<String>,
    pub platform: Option<String>,
}

/// A container the worker runs: a step or a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub number: i64,
    pub name: String,
    pub image: String,
    pub commands: Vec<String>,
    pub environment: HashMap<String, String>,
    pub report_as: Option<String>,
    pub detach: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStage {
    pub name: String,
    pub needs: Vec<String>,
    pub steps: Vec<Container>,
}

/// Worker-consumable output of the compiler.
///
/// Exactly one of `stages` and `steps` is populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutablePlan {
    pub id: String,
    pub version: String,
    pub worker: WorkerAffinity,
    pub environment: HashMap<String, String>,
    pub services: Vec<Container>,
    pub stages: Vec<PlanStage>,
    pub steps: Vec<Container>,
}

impl ExecutablePlan {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}
