//! System configuration parsing (`drover.kdl`).
//!
//! ```kdl
//! server addr="0.0.0.0:8080" public-url="https://drover.example.com"
//! database url="postgres://drover@localhost/drover"
//! queue channel="drover" {
//!     route "drover:large"
//! }
//! scheduler compile-attempts=5 retry-backoff-ms=1000 enqueue-workers=4
//! worker auth-secret="change-me" token-ttl-secs=60 cancel-timeout-secs=30
//! scm api-url="https://api.github.com" token="..." webhook-secret="..."
//! ```

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::kdl_ext::{all_string_args, first_string_arg, int_prop, string_prop};
use crate::{ConfigError, ConfigResult};

/// System-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerSettings,
    pub worker: WorkerConfig,
    pub scm: ScmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
    /// Address builds and commit statuses link back to.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base route name; flavor and platform are appended to it.
    pub channel: String,
    pub routes: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            channel: "drover".to_string(),
            routes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Attempts allowed for webhook and schedule builds.
    pub compile_attempts: u32,
    /// Backoff unit; attempt `n` waits `n` units.
    pub retry_backoff: Duration,
    pub enqueue_workers: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            compile_attempts: 5,
            retry_backoff: Duration::from_secs(1),
            enqueue_workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Secret used to mint worker-to-worker tokens.
    pub auth_secret: String,
    pub token_ttl: Duration,
    pub cancel_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            auth_secret: String::new(),
            token_ttl: Duration::from_secs(60),
            cancel_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScmConfig {
    pub api_url: String,
    pub token: String,
    pub webhook_secret: String,
    /// Path of the pipeline file inside repositories.
    pub config_path: String,
    pub clone_image: String,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: String::new(),
            webhook_secret: String::new(),
            config_path: ".drover.kdl".to_string(),
            clone_image: "alpine/git:latest".to_string(),
        }
    }
}

impl SystemConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        parse_system_config(&text)
    }
}

/// Parse system configuration from KDL text. Missing nodes keep defaults.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                if let Some(addr) = string_prop(node, "addr") {
                    config.server.addr = addr;
                }
                if let Some(url) = string_prop(node, "public-url") {
                    config.server.public_url = url;
                }
            }
            "database" => {
                config.database.url = string_prop(node, "url");
            }
            "queue" => {
                if let Some(channel) = string_prop(node, "channel") {
                    config.queue.channel = channel;
                }
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        if child.name().value() == "route" {
                            config.queue.routes.extend(all_string_args(child));
                        }
                    }
                }
            }
            "scheduler" => {
                if let Some(n) = positive_prop(node, "compile-attempts")? {
                    config.scheduler.compile_attempts = n as u32;
                }
                if let Some(ms) = non_negative_prop(node, "retry-backoff-ms")? {
                    config.scheduler.retry_backoff = Duration::from_millis(ms as u64);
                }
                if let Some(n) = positive_prop(node, "enqueue-workers")? {
                    config.scheduler.enqueue_workers = n as usize;
                }
            }
            "worker" => {
                if let Some(secret) = string_prop(node, "auth-secret") {
                    config.worker.auth_secret = secret;
                }
                if let Some(secs) = positive_prop(node, "token-ttl-secs")? {
                    config.worker.token_ttl = Duration::from_secs(secs as u64);
                }
                if let Some(secs) = positive_prop(node, "cancel-timeout-secs")? {
                    config.worker.cancel_timeout = Duration::from_secs(secs as u64);
                }
            }
            "scm" => {
                if let Some(url) = string_prop(node, "api-url") {
                    config.scm.api_url = url;
                }
                if let Some(token) = string_prop(node, "token") {
                    config.scm.token = token;
                }
                if let Some(secret) = string_prop(node, "webhook-secret") {
                    config.scm.webhook_secret = secret;
                }
                if let Some(path) = string_prop(node, "config-path") {
                    config.scm.config_path = path;
                }
                if let Some(image) = string_prop(node, "clone-image") {
                    config.scm.clone_image = image;
                }
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "section".to_string(),
                    message: format!(
                        "unknown section '{}'{}",
                        other,
                        first_string_arg(node)
                            .map(|a| format!(" ({})", a))
                            .unwrap_or_default()
                    ),
                });
            }
        }
    }

    Ok(config)
}

fn positive_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<i128>> {
    match int_prop(node, name) {
        Some(n) if n < 1 || n > u32::MAX as i128 => Err(ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("expected a positive integer, got {}", n),
        }),
        other => Ok(other),
    }
}

fn non_negative_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<i128>> {
    match int_prop(node, name) {
        Some(n) if n < 0 || n > u32::MAX as i128 => Err(ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("expected a non-negative integer, got {}", n),
        }),
        other => Ok(other),
    }
}
