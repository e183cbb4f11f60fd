//! Webhook endpoints for Git providers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use drover_core::{Action, Build, Event, TriggerSource};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::builds::AdmissionResponse;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<AdmissionResponse>), ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !state.webhook_secret.is_empty() {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(&state.webhook_secret, &body, signature) {
            warn!(event = %event_type, delivery = %delivery, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid webhook signature".to_string()));
        }
    }

    info!(event = %event_type, delivery = %delivery, "Received GitHub webhook");

    let (org, name, draft) = match parse_delivery(event_type, &body)? {
        Delivery::Build { org, name, draft } => (org, name, draft),
        Delivery::Ignored(message) => {
            info!(event = %event_type, reason = %message, "Ignoring webhook");
            return Ok((StatusCode::OK, Json(AdmissionResponse::Ignored { message })));
        }
    };

    let repo = match state.store.repos.get_for_org(&org, &name).await {
        Ok(repo) => repo,
        Err(e) if e.is_not_found() => {
            warn!(repo = %format!("{}/{}", org, name), "Webhook for unknown repository");
            return Ok((
                StatusCode::OK,
                Json(AdmissionResponse::Ignored {
                    message: format!("{}/{} is not registered", org, name),
                }),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let admission = state
        .scheduler
        .admit(draft, &repo, TriggerSource::Webhook, "")
        .await?;
    Ok((StatusCode::OK, Json(admission.into())))
}

/// A webhook delivery turned into a build draft for `org/name`.
#[derive(Debug)]
pub(crate) enum Delivery {
    Build { org: String, name: String, draft: Build },
    Ignored(String),
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    full_name: String,
    owner: Account,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct HeadCommit {
    #[serde(default)]
    message: String,
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    before: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    head_commit: Option<HeadCommit>,
    repository: RepositoryPayload,
    sender: Account,
}

#[derive(Debug, Deserialize)]
struct HeadRepo {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
    repo: Option<HeadRepo>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    title: String,
    head: PullRequestRef,
    base: PullRequestRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    number: i64,
    pull_request: PullRequest,
    repository: RepositoryPayload,
    sender: Account,
}

pub(crate) fn parse_delivery(event_type: &str, body: &[u8]) -> Result<Delivery, ApiError> {
    match event_type {
        "push" => {
            let payload: PushPayload = serde_json::from_slice(body)
                .map_err(|e| ApiError::BadRequest(format!("invalid push payload: {}", e)))?;
            Ok(push_delivery(payload))
        }
        "pull_request" => {
            let payload: PullRequestPayload = serde_json::from_slice(body).map_err(|e| {
                ApiError::BadRequest(format!("invalid pull_request payload: {}", e))
            })?;
            Ok(pull_request_delivery(payload))
        }
        "ping" => Ok(Delivery::Ignored("pong".to_string())),
        other => Ok(Delivery::Ignored(format!("unsupported event {}", other))),
    }
}

fn push_delivery(payload: PushPayload) -> Delivery {
    let (event, branch) = if let Some(tag) = payload.git_ref.strip_prefix("refs/tags/") {
        (Event::Tag, tag.to_string())
    } else if let Some(branch) = payload.git_ref.strip_prefix("refs/heads/") {
        (Event::Push, branch.to_string())
    } else {
        return Delivery::Ignored(format!("unsupported ref {}", payload.git_ref));
    };

    let (event, commit) = if payload.deleted {
        (Event::Delete, payload.before)
    } else {
        (event, payload.after)
    };

    let (message, author) = match payload.head_commit {
        Some(head) => {
            let author = head
                .author
                .map(|a| a.username.unwrap_or(a.name))
                .unwrap_or_else(|| payload.sender.login.clone());
            (head.message, author)
        }
        None => (String::new(), payload.sender.login.clone()),
    };

    Delivery::Build {
        org: payload.repository.owner.login,
        name: payload.repository.name,
        draft: Build {
            event,
            branch,
            commit,
            git_ref: payload.git_ref,
            title: message.lines().next().unwrap_or_default().to_string(),
            message,
            sender: payload.sender.login,
            author,
            ..Default::default()
        },
    }
}

fn pull_request_delivery(payload: PullRequestPayload) -> Delivery {
    let Ok(action) = payload.action.parse::<Action>() else {
        return Delivery::Ignored(format!(
            "unsupported pull_request action {}",
            payload.action
        ));
    };

    let pr = payload.pull_request;
    let fork = pr
        .head
        .repo
        .as_ref()
        .is_none_or(|r| r.full_name != payload.repository.full_name);

    Delivery::Build {
        org: payload.repository.owner.login,
        name: payload.repository.name,
        draft: Build {
            event: Event::PullRequest,
            event_action: Some(action),
            commit: pr.head.sha,
            branch: pr.base.git_ref.clone(),
            base_ref: pr.base.git_ref,
            head_ref: pr.head.git_ref,
            git_ref: format!("refs/pull/{}/head", payload.number),
            message: pr.title.clone(),
            title: pr.title,
            sender: payload.sender.login.clone(),
            author: payload.sender.login,
            fork,
            ..Default::default()
        },
    }
}

fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
