//! Error types for compose-env-manager

use thiserror::Error;
use tierci_core::ExecError;

/// Errors that can occur while provisioning an environment.
///
/// Teardown never produces these; see [`crate::cleanup::CleanupReport`].
#[derive(Error, Debug)]
pub enum EnvError {
    /// Requested service is not part of the configured environment
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// A compose command exited non-zero
    #[error("docker-compose {action} failed with exit code {exit_code}: {detail}")]
    ComposeFailed {
        action: String,
        exit_code: i32,
        detail: String,
    },

    /// Services did not report running in time
    #[error("services not ready after {waited_secs}s: {}", pending.join(", "))]
    NotReady {
        pending: Vec<String>,
        waited_secs: u64,
    },

    /// Malformed parameters file
    #[error("invalid parameters line {line}: {content}")]
    InvalidParams { line: usize, content: String },

    /// Container runtime could not be invoked
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvError {
    /// Exit status to surface for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            EnvError::ComposeFailed { exit_code, .. } if *exit_code != 0 => *exit_code,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_lists_services() {
        let err = EnvError::NotReady {
            pending: vec!["redis".to_string(), "logstash".to_string()],
            waited_secs: 60,
        };
        let msg = err.to_string();
        assert!(msg.contains("redis, logstash"));
        assert!(msg.contains("60s"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_compose_failed_exit_code() {
        let err = EnvError::ComposeFailed {
            action: "up".to_string(),
            exit_code: 14,
            detail: "pull access denied".to_string(),
        };
        assert_eq!(err.exit_code(), 14);
    }
}
