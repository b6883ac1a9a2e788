//! Error taxonomy for the tierci core library.
//!
//! Each component owns a focused error enum; [`CoreError`] is the umbrella
//! used where several of them meet (configuration, git capture).

use std::path::PathBuf;

/// Errors raised while spawning or supervising an external process.
///
/// A process that runs and exits non-zero is *not* an `ExecError`; it is a
/// normal [`crate::exec::CommandOutput`] with a non-zero `exit_code`.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command has an empty program name")]
    EmptyCommand,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("io error while waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal build or check failures. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{step} failed with exit code {exit_code}: {detail}")]
    Failed {
        step: String,
        exit_code: i32,
        detail: String,
    },

    #[error("formatting violations in {} file(s): {}", files.len(), files.join(", "))]
    Unformatted { files: Vec<String> },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Exit status to surface for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Failed { exit_code, .. } if *exit_code != 0 => *exit_code,
            _ => 1,
        }
    }
}

/// Coverage aggregation and rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("no coverage profiles found in {}", dir.display())]
    NoProfiles { dir: PathBuf },

    #[error("{}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("no coverage profiles to merge")]
    EmptyMerge,

    #[error("coverage mode mismatch: expected {expected}, found {found} in {origin}")]
    ModeMismatch {
        expected: String,
        found: String,
        origin: String,
    },

    #[error("coverage renderer exited with code {exit_code}: {stderr}")]
    Render { exit_code: i32, stderr: String },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoverageError {
    /// Exit status to surface; the renderer's own code when it ran.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoverageError::Render { exit_code, .. } if *exit_code != 0 => *exit_code,
            _ => 1,
        }
    }
}

/// Umbrella error for core operations that span components.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Exit status to surface; passes through wrapped build and coverage codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Build(e) => e.exit_code(),
            CoreError::Coverage(e) => e.exit_code(),
            _ => 1,
        }
    }
}

/// Result type for exec operations.
pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
