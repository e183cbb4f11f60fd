//! Core domain types and traits for the Drover CI/CD server.
//!
//! This crate contains:
//! - Resource identifiers and the shared error type
//! - Build, step, service and log records
//! - Repository, user and worker records
//! - Compiled pipeline and executable plan types
//! - Collaborator traits (SCM, compiler, queue, remote worker)

pub mod build;
pub mod compiler;
pub mod error;
pub mod id;
pub mod pipeline;
pub mod queue;
pub mod repo;
pub mod scm;
pub mod step;
pub mod worker;

pub use build::{Action, Build, BuildStatus, BuildUpdate, Event, TriggerSource};
pub use compiler::{CompileContext, CompileMetadata, Compiled, Compiler};
pub use error::{Error, Result};
pub use id::ResourceId;
pub use pipeline::{BuildExecutable, Container, ExecutablePlan, Pipeline, PipelineType, PlanStage, WorkerAffinity};
pub use queue::QueueService;
pub use repo::{AccessLevel, AllowEvents, ApprovalPolicy, AutoCancelOptions, Repo, User};
pub use scm::{BranchInfo, PullRequestInfo, ScmClient};
pub use step::{Log, Service, Step};
pub use worker::{ExecutorInfo, Worker, WorkerClient};
