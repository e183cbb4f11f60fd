//! Build records and the closed enums describing how a build was triggered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::pipeline::PipelineType;

/// Lifecycle status shared by builds, steps and services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Pending,
    #[serde(rename = "pending approval")]
    PendingApproval,
    Running,
    Success,
    Failure,
    Error,
    Killed,
    Canceled,
    Skipped,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::PendingApproval => "pending approval",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Error => "error",
            BuildStatus::Killed => "killed",
            BuildStatus::Canceled => "canceled",
            BuildStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success
                | BuildStatus::Failure
                | BuildStatus::Error
                | BuildStatus::Killed
                | BuildStatus::Canceled
                | BuildStatus::Skipped
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "pending approval" => Ok(BuildStatus::PendingApproval),
            "running" => Ok(BuildStatus::Running),
            "success" => Ok(BuildStatus::Success),
            "failure" => Ok(BuildStatus::Failure),
            "error" => Ok(BuildStatus::Error),
            "killed" => Ok(BuildStatus::Killed),
            "canceled" => Ok(BuildStatus::Canceled),
            "skipped" => Ok(BuildStatus::Skipped),
            _ => Err(format!("Unknown build status: {}", s)),
        }
    }
}

/// Kind of event that produced a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    #[default]
    Push,
    PullRequest,
    Tag,
    Deployment,
    Comment,
    Schedule,
    Delete,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Push => "push",
            Event::PullRequest => "pull_request",
            Event::Tag => "tag",
            Event::Deployment => "deployment",
            Event::Comment => "comment",
            Event::Schedule => "schedule",
            Event::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Event::Push),
            "pull_request" => Ok(Event::PullRequest),
            "tag" => Ok(Event::Tag),
            "deployment" => Ok(Event::Deployment),
            "comment" => Ok(Event::Comment),
            "schedule" => Ok(Event::Schedule),
            "delete" => Ok(Event::Delete),
            _ => Err(format!("Unknown event: {}", s)),
        }
    }
}

/// Sub-kind of an event, mostly pull request and comment actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Opened,
    Synchronize,
    Reopened,
    Edited,
    Labeled,
    Unlabeled,
    Closed,
    Created,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Opened => "opened",
            Action::Synchronize => "synchronize",
            Action::Reopened => "reopened",
            Action::Edited => "edited",
            Action::Labeled => "labeled",
            Action::Unlabeled => "unlabeled",
            Action::Closed => "closed",
            Action::Created => "created",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(Action::Opened),
            "synchronize" => Ok(Action::Synchronize),
            "reopened" => Ok(Action::Reopened),
            "edited" => Ok(Action::Edited),
            "labeled" => Ok(Action::Labeled),
            "unlabeled" => Ok(Action::Unlabeled),
            "closed" => Ok(Action::Closed),
            "created" => Ok(Action::Created),
            _ => Err(format!("Unknown event action: {}", s)),
        }
    }
}

/// Where a compile-and-publish request originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Webhook,
    Restart,
    Schedule,
    Create,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Webhook => write!(f, "webhook"),
            TriggerSource::Restart => write!(f, "restart"),
            TriggerSource::Schedule => write!(f, "schedule"),
            TriggerSource::Create => write!(f, "create"),
        }
    }
}

/// One execution attempt of a repository's pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: ResourceId,
    pub repo_id: ResourceId,
    /// Per-repository build number, taken from the repository counter.
    pub number: i64,
    /// Number of the build this one restarted, if any.
    pub parent: Option<i64>,
    pub event: Event,
    pub event_action: Option<Action>,
    pub status: BuildStatus,
    pub error: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub enqueued: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub title: String,
    pub message: String,
    pub commit: String,
    pub sender: String,
    pub author: String,
    pub branch: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub base_ref: String,
    pub head_ref: String,
    /// Route placeholder until a worker claims the build, then the worker hostname.
    pub host: String,
    pub runtime: String,
    pub distribution: String,
    /// Build came from a fork of the repository.
    pub fork: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub pipeline_type: Option<PipelineType>,
    pub pipeline_id: Option<ResourceId>,
}

impl Build {
    /// Clear everything a previous publish attempt may have written.
    ///
    /// Restarts reuse an old build as a template, so identity, timestamps
    /// and execution placement must not leak into the new build.
    pub fn reset_for_publish(&mut self) {
        self.id = ResourceId::new();
        self.number = 0;
        self.status = BuildStatus::Pending;
        self.error = None;
        self.created = None;
        self.enqueued = None;
        self.started = None;
        self.finished = None;
        self.host = String::new();
        self.runtime = String::new();
        self.distribution = String::new();
        self.approved_at = None;
        self.approved_by = None;
        self.pipeline_id = None;
    }

    /// Apply a partial update reported by a worker.
    pub fn apply(&mut self, update: &BuildUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(enqueued) = update.enqueued {
            self.enqueued = Some(enqueued);
        }
        if let Some(started) = update.started {
            self.started = Some(started);
        }
        if let Some(finished) = update.finished {
            self.finished = Some(finished);
        }
        if let Some(host) = &update.host {
            self.host = host.clone();
        }
        if let Some(runtime) = &update.runtime {
            self.runtime = runtime.clone();
        }
        if let Some(distribution) = &update.distribution {
            self.distribution = distribution.clone();
        }
    }
}

/// Partial build update sent by workers while they execute a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildUpdate {
    pub status: Option<BuildStatus>,
    pub error: Option<String>,
    pub enqueued: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub host: Option<String>,
    pub runtime: Option<String>,
    pub distribution: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_round_trip() {
        for status in [
            BuildStatus::Pending,
            BuildStatus::PendingApproval,
            BuildStatus::Running,
            BuildStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        let json = serde_json::to_string(&BuildStatus::PendingApproval).unwrap();
        assert_eq!(json, "\"pending approval\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!BuildStatus::Pending.is_terminal());
        assert!(!BuildStatus::PendingApproval.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
        assert!(BuildStatus::Killed.is_terminal());
        assert!(BuildStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_reset_for_publish_clears_previous_attempt() {
        let mut build = Build {
            number: 7,
            status: BuildStatus::Failure,
            error: Some("boom".to_string()),
            created: Some(Utc::now()),
            finished: Some(Utc::now()),
            host: "worker-1".to_string(),
            commit: "abc123".to_string(),
            ..Default::default()
        };
        let old_id = build.id;

        build.reset_for_publish();

        assert_ne!(build.id, old_id);
        assert_eq!(build.status, BuildStatus::Pending);
        assert!(build.error.is_none());
        assert!(build.finished.is_none());
        assert!(build.host.is_empty());
        assert_eq!(build.commit, "abc123");
    }

    #[test]
    fn test_apply_update_only_touches_present_fields() {
        let mut build = Build {
            host: "route".to_string(),
            ..Default::default()
        };
        build.apply(&BuildUpdate {
            status: Some(BuildStatus::Running),
            runtime: Some("docker".to_string()),
            ..Default::default()
        });

        assert_eq!(build.status, BuildStatus::Running);
        assert_eq!(build.runtime, "docker");
        assert_eq!(build.host, "route");
    }
}
