//! Repository and user records referenced by the build lifecycle.

use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::build::{Action, Event};
use crate::pipeline::PipelineType;

/// Who must approve builds coming from forks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    ForkAlways,
    #[default]
    ForkNoWrite,
    FirstTime,
    Never,
}

impl std::fmt::Display for ApprovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalPolicy::ForkAlways => write!(f, "fork-always"),
            ApprovalPolicy::ForkNoWrite => write!(f, "fork-no-write"),
            ApprovalPolicy::FirstTime => write!(f, "first-time"),
            ApprovalPolicy::Never => write!(f, "never"),
        }
    }
}

impl std::str::FromStr for ApprovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fork-always" => Ok(ApprovalPolicy::ForkAlways),
            "fork-no-write" => Ok(ApprovalPolicy::ForkNoWrite),
            "first-time" => Ok(ApprovalPolicy::FirstTime),
            "never" => Ok(ApprovalPolicy::Never),
            _ => Err(format!("Unknown approval policy: {}", s)),
        }
    }
}

/// Which superseded builds a repository lets a newer build cancel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCancelOptions {
    pub running: bool,
    pub pending: bool,
    pub default_branch: bool,
}

/// Permission level of a user on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Admin,
    Write,
    Read,
    None,
}

impl AccessLevel {
    pub fn can_write(&self) -> bool {
        matches!(self, AccessLevel::Admin | AccessLevel::Write)
    }
}

/// Bitmask of events a repository accepts builds for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowEvents(pub u64);

impl AllowEvents {
    pub const PUSH: u64 = 1 << 0;
    pub const PULL_OPENED: u64 = 1 << 1;
    pub const PULL_SYNCHRONIZE: u64 = 1 << 2;
    pub const PULL_EDITED: u64 = 1 << 3;
    pub const PULL_REOPENED: u64 = 1 << 4;
    pub const PULL_LABELED: u64 = 1 << 5;
    pub const PULL_UNLABELED: u64 = 1 << 6;
    pub const TAG: u64 = 1 << 7;
    pub const COMMENT_CREATED: u64 = 1 << 8;
    pub const COMMENT_EDITED: u64 = 1 << 9;
    pub const DEPLOYMENT: u64 = 1 << 10;
    pub const SCHEDULE: u64 = 1 << 11;
    pub const DELETE: u64 = 1 << 12;

    pub fn allows(&self, event: Event, action: Option<Action>) -> bool {
        let bit = match (event, action) {
            (Event::Push, _) => Self::PUSH,
            (Event::PullRequest, Some(Action::Opened)) => Self::PULL_OPENED,
            (Event::PullRequest, Some(Action::Synchronize)) => Self::PULL_SYNCHRONIZE,
            (Event::PullRequest, Some(Action::Edited)) => Self::PULL_EDITED,
            (Event::PullRequest, Some(Action::Reopened)) => Self::PULL_REOPENED,
            (Event::PullRequest, Some(Action::Labeled)) => Self::PULL_LABELED,
            (Event::PullRequest, Some(Action::Unlabeled)) => Self::PULL_UNLABELED,
            (Event::PullRequest, _) => return false,
            (Event::Tag, _) => Self::TAG,
            (Event::Comment, Some(Action::Edited)) => Self::COMMENT_EDITED,
            (Event::Comment, _) => Self::COMMENT_CREATED,
            (Event::Deployment, _) => Self::DEPLOYMENT,
            (Event::Schedule, _) => Self::SCHEDULE,
            (Event::Delete, _) => Self::DELETE,
        };
        self.0 & bit != 0
    }
}

impl Default for AllowEvents {
    fn default() -> Self {
        Self(Self::PUSH | Self::PULL_OPENED | Self::PULL_SYNCHRONIZE | Self::TAG)
    }
}

/// A repository builds run for. Owned elsewhere; the lifecycle only bumps
/// its counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: ResourceId,
    pub owner_id: ResourceId,
    pub org: String,
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
    /// Default branch.
    pub branch: String,
    /// Maximum builds allowed in `pending` or `running` at once.
    pub build_limit: i64,
    /// Highest build number handed out so far.
    pub counter: i64,
    pub active: bool,
    pub allow_events: AllowEvents,
    pub approve_build: ApprovalPolicy,
    pub auto_cancel: AutoCancelOptions,
    pub pipeline_type: PipelineType,
}

impl Repo {
    pub fn new(owner_id: ResourceId, org: &str, name: &str) -> Self {
        Self {
            id: ResourceId::new(),
            owner_id,
            org: org.to_string(),
            name: name.to_string(),
            full_name: format!("{}/{}", org, name),
            clone_url: String::new(),
            branch: "main".to_string(),
            build_limit: 10,
            counter: 0,
            active: true,
            allow_events: AllowEvents::default(),
            approve_build: ApprovalPolicy::default(),
            auto_cancel: AutoCancelOptions::default(),
            pipeline_type: PipelineType::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: ResourceId,
    pub name: String,
    /// SCM access token used on the user's behalf.
    #[serde(skip_serializing, default)]
    pub token: String,
    pub active: bool,
    pub admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_events_defaults() {
        let allow = AllowEvents::default();
        assert!(allow.allows(Event::Push, None));
        assert!(allow.allows(Event::PullRequest, Some(Action::Synchronize)));
        assert!(!allow.allows(Event::PullRequest, Some(Action::Labeled)));
        assert!(!allow.allows(Event::PullRequest, None));
        assert!(!allow.allows(Event::Comment, Some(Action::Created)));
    }

    #[test]
    fn test_access_level_write() {
        assert!(AccessLevel::Admin.can_write());
        assert!(AccessLevel::Write.can_write());
        assert!(!AccessLevel::Read.can_write());
    }
}
