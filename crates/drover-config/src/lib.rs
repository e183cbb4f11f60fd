//! KDL configuration parsing for Drover CI/CD.
//!
//! This crate handles:
//! - System configuration (drover.kdl)
//! - Pipeline definitions (.drover.kdl)
//! - Compiling pipeline definitions into executable plans

pub mod compiler;
pub mod error;
pub mod pipeline;
pub mod rules;
pub mod system;

mod kdl_ext;

pub use compiler::KdlCompiler;
pub use error::{ConfigError, ConfigResult};
pub use pipeline::{PipelineDefinition, parse_pipeline};
pub use system::{
    DatabaseConfig, QueueConfig, SchedulerSettings, ScmConfig, ServerConfig, SystemConfig,
    WorkerConfig, parse_system_config,
};
