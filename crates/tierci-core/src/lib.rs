//! tierci Core Library
//!
//! Leaf layer of the tierci workspace:
//! - `exec`: the [`CommandRunner`] seam every external tool is reached through
//! - `build`: host build, cross-compile matrix, static checks
//! - `tier`: the fixed test tiers and their instrumentation policy
//! - `coverage`: profile parsing, merging and rendering
//! - `config`: the run configuration captured once per invocation

pub mod build;
pub mod config;
pub mod coverage;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod git;
pub mod obs;
pub mod telemetry;
pub mod tier;

pub use build::{
    default_targets, BuildOrchestrator, CrossCompileReport, CrossTarget, TargetOutcome,
    TargetStatus,
};
pub use config::{PipelineConfig, PipelineSwitches, SystemHarnessConfig, DEFAULT_TIMEOUT_SECS};
pub use coverage::{
    CoverageAggregator, CoverageMode, CoverageProfile, CoverageReport, CoverageSummary,
    ProfileSource,
};
pub use error::{BuildError, CoreError, CoverageError, ExecError, ExecResult, Result};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use git::{build_id, capture_head_sha};
pub use telemetry::init_tracing;
pub use tier::{TestTier, TierSpec};

/// tierci version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
