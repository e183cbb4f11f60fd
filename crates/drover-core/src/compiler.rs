//! Pipeline compiler interface.
//!
//! The compiler is a black box turning raw configuration into an
//! executable plan. Per-build customization travels in a
//! [`CompileContext`] so a single shared compiler serves every request.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::build::Build;
use crate::pipeline::{ExecutablePlan, Pipeline};
use crate::repo::{Repo, User};

/// Server facts the compiler may expose to pipelines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileMetadata {
    pub server_address: String,
    pub version: String,
}

/// Everything a compile call depends on besides the raw configuration.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    pub build: Build,
    pub repo: Option<Repo>,
    pub user: Option<User>,
    pub commit: String,
    pub files: Vec<String>,
    pub metadata: CompileMetadata,
    pub comment: String,
}

impl CompileContext {
    pub fn new(build: Build) -> Self {
        let commit = build.commit.clone();
        Self {
            build,
            commit,
            ..Default::default()
        }
    }

    pub fn with_repo(mut self, repo: Repo) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = commit.into();
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_metadata(mut self, metadata: CompileMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// Output of a successful compile.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub plan: ExecutablePlan,
    /// Record to cache for (repo, commit) when none exists yet.
    pub pipeline: Pipeline,
}

pub trait Compiler: Send + Sync {
    fn compile(&self, raw: &[u8], ctx: &CompileContext) -> Result<Compiled>;
}
