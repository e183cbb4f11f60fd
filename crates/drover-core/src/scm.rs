//! Source-control provider interface.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::build::Build;
use crate::repo::{AccessLevel, Repo, User};
use crate::step::Step;

/// Head of a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub commit: String,
}

/// Pull request context needed before compiling a comment build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub commit: String,
    pub branch: String,
    pub base_ref: String,
    pub head_ref: String,
}

/// Operations the lifecycle needs from the source-control provider.
///
/// Every call is made on behalf of `owner`, normally the repository owner.
#[async_trait]
pub trait ScmClient: Send + Sync {
    /// Permission level the account `login` holds on `org/name`, looked up with `token`.
    async fn repo_access(&self, login: &str, token: &str, org: &str, name: &str)
    -> Result<AccessLevel>;

    /// Whether `sender` has contributed to `org/name` before.
    async fn repo_contributor(&self, owner: &User, sender: &str, org: &str, name: &str)
    -> Result<bool>;

    /// Paths changed by a commit.
    async fn changeset(&self, owner: &User, repo: &Repo, commit: &str) -> Result<Vec<String>>;

    /// Paths changed by a pull request.
    async fn changeset_pr(&self, owner: &User, repo: &Repo, number: i64) -> Result<Vec<String>>;

    /// Raw pipeline configuration at `commit`, retried with backoff by the implementation.
    async fn config_backoff(&self, owner: &User, repo: &Repo, commit: &str) -> Result<Bytes>;

    async fn get_branch(&self, owner: &User, repo: &Repo, branch: &str) -> Result<BranchInfo>;

    async fn get_pull_request(&self, owner: &User, repo: &Repo, number: i64)
    -> Result<PullRequestInfo>;

    /// Post the commit status reflecting the build state.
    async fn status(&self, owner: &User, build: &Build, repo: &Repo) -> Result<()>;

    /// Post the status of a `report_as` step.
    async fn step_status(&self, owner: &User, build: &Build, step: &Step, repo: &Repo)
    -> Result<()>;

    /// Register an external check for a step and return its identifier.
    async fn create_check(&self, owner: &User, build: &Build, context: &str, repo: &Repo)
    -> Result<i64>;
}
