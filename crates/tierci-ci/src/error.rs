//! Error types for tier execution and pipeline composition.

use compose_env_manager::EnvError;
use thiserror::Error;
use tierci_core::{BuildError, CoreError, CoverageError, ExecError};

/// Errors that stop a stage from producing an exit status of its own.
#[derive(Error, Debug)]
pub enum CiError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error("environment: {0}")]
    Environment(#[from] EnvError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A remote execution step could not be completed
    #[error("remote {step} failed: {detail}")]
    Bridge { step: String, detail: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CiError {
    pub fn bridge(step: impl Into<String>, detail: impl Into<String>) -> Self {
        CiError::Bridge {
            step: step.into(),
            detail: detail.into(),
        }
    }

    /// Exit status to surface; 1 when the failure carries none.
    pub fn exit_code(&self) -> i32 {
        match self {
            CiError::Build(e) => e.exit_code(),
            CiError::Coverage(e) => e.exit_code(),
            CiError::Environment(e) => e.exit_code(),
            CiError::Core(e) => e.exit_code(),
            _ => 1,
        }
    }
}

/// Result type for tierci-ci operations
pub type Result<T> = std::result::Result<T, CiError>;
