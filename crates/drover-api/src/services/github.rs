//! GitHub implementation of the SCM client.

use async_trait::async_trait;
use bytes::Bytes;
use drover_core::{
    AccessLevel, BranchInfo, Build, BuildStatus, Error, PullRequestInfo, Repo, Result, ScmClient,
    Step, User,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const PER_PAGE: usize = 100;
const CONFIG_ATTEMPTS: u32 = 5;

/// Talks to the GitHub REST API on behalf of repository owners.
pub struct GitHubScm {
    http: reqwest::Client,
    api_url: String,
    config_path: String,
    public_url: String,
    config_backoff: Duration,
}

impl GitHubScm {
    pub fn new(
        api_url: impl Into<String>,
        config_path: impl Into<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            config_path: config_path.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            config_backoff: Duration::from_secs(1),
        }
    }

    fn repo_url(&self, org: &str, name: &str, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_url,
            urlencoding::encode(org),
            urlencoding::encode(name),
            path
        )
    }

    fn authed(&self, req: RequestBuilder, token: &str) -> RequestBuilder {
        req.header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", "Drover-CI")
            .header("Accept", "application/vnd.github+json")
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        let response = self
            .authed(self.http.get(url), token)
            .send()
            .await
            .map_err(|e| Error::Scm(format!("request to {} failed: {}", url, e)))?;
        check(response, url)
            .await?
            .json()
            .await
            .map_err(|e| Error::Scm(format!("unable to parse response from {}: {}", url, e)))
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .authed(self.http.post(url), token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Scm(format!("request to {} failed: {}", url, e)))?;
        check(response, url)
            .await?
            .json()
            .await
            .map_err(|e| Error::Scm(format!("unable to parse response from {}: {}", url, e)))
    }

    async fn config(&self, token: &str, repo: &Repo, commit: &str) -> Result<Bytes> {
        let url = format!(
            "{}?ref={}",
            self.repo_url(
                &repo.org,
                &repo.name,
                &format!("/contents/{}", self.config_path)
            ),
            urlencoding::encode(commit)
        );
        let response = self
            .authed(self.http.get(&url), token)
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await
            .map_err(|e| Error::Scm(format!("request to {} failed: {}", url, e)))?;
        check(response, &url)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::Scm(format!("unable to read config from {}: {}", url, e)))
    }

    fn target_url(&self, build: &Build, repo: &Repo) -> String {
        format!("{}/{}/{}", self.public_url, repo.full_name, build.number)
    }

    async fn post_status(
        &self,
        owner: &User,
        repo: &Repo,
        commit: &str,
        status: &CommitStatus,
    ) -> Result<()> {
        let url = self.repo_url(&repo.org, &repo.name, &format!("/statuses/{}", commit));
        let _: serde_json::Value = self.post_json(&url, &owner.token, status).await?;
        Ok(())
    }
}

async fn check(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound(url.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Unauthorized(format!("{} ({}): {}", url, status, text))
        }
        _ => Error::Scm(format!("{} ({}): {}", url, status, text)),
    })
}

/// GitHub commit status state for a build status.
fn commit_state(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Pending | BuildStatus::PendingApproval | BuildStatus::Running => "pending",
        BuildStatus::Success | BuildStatus::Skipped => "success",
        BuildStatus::Failure => "failure",
        BuildStatus::Error | BuildStatus::Killed | BuildStatus::Canceled => "error",
    }
}

fn status_description(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Pending => "the build is pending",
        BuildStatus::PendingApproval => "the build needs approval from repository admins",
        BuildStatus::Running => "the build is running",
        BuildStatus::Success => "the build was successful",
        BuildStatus::Failure => "the build has failed",
        BuildStatus::Error => "the build has erred",
        BuildStatus::Killed => "the build was killed",
        BuildStatus::Canceled => "the build was canceled",
        BuildStatus::Skipped => "the build was skipped",
    }
}

#[derive(Debug, Serialize)]
struct CommitStatus {
    state: &'static str,
    target_url: String,
    description: String,
    context: String,
}

#[derive(Debug, Serialize)]
struct CheckRunRequest<'a> {
    name: &'a str,
    head_sha: &'a str,
    details_url: String,
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: String,
    #[serde(default)]
    role_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Contributor {
    #[serde(default)]
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangedFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    files: Vec<ChangedFile>,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    head: PullRequestRef,
    base: PullRequestRef,
}

fn access_level(permission: &PermissionResponse) -> AccessLevel {
    match permission.role_name.as_deref().unwrap_or(permission.permission.as_str()) {
        "admin" => AccessLevel::Admin,
        "maintain" | "write" => AccessLevel::Write,
        "triage" | "read" => AccessLevel::Read,
        _ => AccessLevel::None,
    }
}

#[async_trait]
impl ScmClient for GitHubScm {
    async fn repo_access(
        &self,
        login: &str,
        token: &str,
        org: &str,
        name: &str,
    ) -> Result<AccessLevel> {
        let url = self.repo_url(
            org,
            name,
            &format!("/collaborators/{}/permission", urlencoding::encode(login)),
        );
        let permission: PermissionResponse = self.get_json(&url, token).await?;
        Ok(access_level(&permission))
    }

    async fn repo_contributor(
        &self,
        owner: &User,
        sender: &str,
        org: &str,
        name: &str,
    ) -> Result<bool> {
        let mut page = 1;
        loop {
            let url = format!(
                "{}?per_page={}&page={}",
                self.repo_url(org, name, "/contributors"),
                PER_PAGE,
                page
            );
            let contributors: Vec<Contributor> = self.get_json(&url, &owner.token).await?;
            if contributors
                .iter()
                .any(|c| c.login.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(sender)))
            {
                return Ok(true);
            }
            if contributors.len() < PER_PAGE {
                return Ok(false);
            }
            page += 1;
        }
    }

    async fn changeset(&self, owner: &User, repo: &Repo, commit: &str) -> Result<Vec<String>> {
        let url = self.repo_url(
            &repo.org,
            &repo.name,
            &format!("/commits/{}", urlencoding::encode(commit)),
        );
        let response: CommitResponse = self.get_json(&url, &owner.token).await?;
        Ok(response.files.into_iter().map(|f| f.filename).collect())
    }

    async fn changeset_pr(&self, owner: &User, repo: &Repo, number: i64) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}?per_page={}&page={}",
                self.repo_url(&repo.org, &repo.name, &format!("/pulls/{}/files", number)),
                PER_PAGE,
                page
            );
            let batch: Vec<ChangedFile> = self.get_json(&url, &owner.token).await?;
            let done = batch.len() < PER_PAGE;
            files.extend(batch.into_iter().map(|f| f.filename));
            if done {
                return Ok(files);
            }
            page += 1;
        }
    }

    async fn config_backoff(&self, owner: &User, repo: &Repo, commit: &str) -> Result<Bytes> {
        let mut attempt = 1;
        loop {
            match self.config(&owner.token, repo, commit).await {
                Ok(raw) => return Ok(raw),
                Err(e) if attempt >= CONFIG_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(
                        repo = %repo.full_name,
                        commit = %commit,
                        attempt,
                        error = %e,
                        "Unable to fetch pipeline configuration, retrying"
                    );
                    tokio::time::sleep(self.config_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn get_branch(&self, owner: &User, repo: &Repo, branch: &str) -> Result<BranchInfo> {
        let url = self.repo_url(
            &repo.org,
            &repo.name,
            &format!("/branches/{}", urlencoding::encode(branch)),
        );
        let response: BranchResponse = self.get_json(&url, &owner.token).await?;
        Ok(BranchInfo {
            name: response.name,
            commit: response.commit.sha,
        })
    }

    async fn get_pull_request(
        &self,
        owner: &User,
        repo: &Repo,
        number: i64,
    ) -> Result<PullRequestInfo> {
        let url = self.repo_url(&repo.org, &repo.name, &format!("/pulls/{}", number));
        let response: PullRequestResponse = self.get_json(&url, &owner.token).await?;
        Ok(PullRequestInfo {
            commit: response.head.sha,
            branch: response.base.git_ref.clone(),
            base_ref: response.base.git_ref,
            head_ref: response.head.git_ref,
        })
    }

    async fn status(&self, owner: &User, build: &Build, repo: &Repo) -> Result<()> {
        let status = CommitStatus {
            state: commit_state(build.status),
            target_url: self.target_url(build, repo),
            description: status_description(build.status).to_string(),
            context: format!("drover/{}", build.event),
        };
        debug!(repo = %repo.full_name, build = build.number, state = status.state, "Posting commit status");
        self.post_status(owner, repo, &build.commit, &status).await
    }

    async fn step_status(&self, owner: &User, build: &Build, step: &Step, repo: &Repo) -> Result<()> {
        let Some(report_as) = step.report_as.as_deref() else {
            return Ok(());
        };
        let status = CommitStatus {
            state: commit_state(step.status),
            target_url: self.target_url(build, repo),
            description: format!("step {}: {}", step.name, status_description(step.status)),
            context: format!("drover/{}", report_as),
        };
        self.post_status(owner, repo, &build.commit, &status).await
    }

    async fn create_check(
        &self,
        owner: &User,
        build: &Build,
        context: &str,
        repo: &Repo,
    ) -> Result<i64> {
        let url = self.repo_url(&repo.org, &repo.name, "/check-runs");
        let request = CheckRunRequest {
            name: context,
            head_sha: &build.commit,
            details_url: self.target_url(build, repo),
            status: "queued",
        };
        let response: CheckRunResponse = self.post_json(&url, &owner.token, &request).await?;
        Ok(response.id)
    }
}
