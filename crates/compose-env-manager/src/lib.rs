//! compose-env-manager: containerized service environments for tierci
//!
//! Integration and system tiers run against live service dependencies
//! (a cache, search indexes, a log relay) provisioned with
//! `docker-compose`. This crate owns that environment:
//!
//! - `services`: the service set and the endpoints tests reach them at
//! - `params`: the `KEY=VALUE` parameters file handed to the tests
//! - `compose`: command builders for `docker-compose` / `docker`
//! - `cleanup`: best-effort teardown outcomes
//! - `manager`: the [`EnvironmentManager`] state machine

pub mod cleanup;
pub mod compose;
pub mod error;
pub mod manager;
pub mod params;
pub mod services;

pub use cleanup::{CleanupOutcome, CleanupReport, CleanupStep};
pub use compose::{ComposeProject, DockerCli};
pub use error::EnvError;
pub use manager::{EnvConfig, EnvironmentManager, EnvironmentState};
pub use params::EnvironmentParams;
pub use services::{default_services, ServiceSpec};

/// Result type for compose-env-manager operations
pub type Result<T> = std::result::Result<T, EnvError>;
