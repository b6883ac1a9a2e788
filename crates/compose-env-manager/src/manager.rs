//! Lifecycle owner of the shared service environment.
//!
//! [`EnvironmentManager`] is the only component that provisions or tears
//! down containers. Its state lives behind a `tokio::sync::Mutex` held for
//! the whole of `start`/`stop`, so the two can never interleave.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use tierci_core::{CommandRunner, CommandSpec};

use crate::cleanup::{CleanupOutcome, CleanupReport};
use crate::compose::{ComposeProject, DockerCli};
use crate::error::EnvError;
use crate::params::EnvironmentParams;
use crate::services::{default_services, ServiceSpec};
use crate::Result;

/// Lifecycle of the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvironmentState::Stopped => "stopped",
            EnvironmentState::Starting => "starting",
            EnvironmentState::Running => "running",
            EnvironmentState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Environment manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Compose project the services belong to
    pub project: ComposeProject,

    /// Services in start order
    pub services: Vec<ServiceSpec>,

    /// Static extra parameters (credentials and the like)
    pub extras: Vec<(String, String)>,

    /// Where the parameters file is written
    pub params_path: PathBuf,

    /// Name filter for the residual container sweep
    pub unit_name: String,

    /// Give up waiting for readiness after this long
    pub ready_timeout_secs: u64,

    /// First readiness poll delay; doubles up to `max_backoff_ms`
    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    /// Pass `--no-cache` to image builds
    pub no_cache: bool,
}

impl EnvConfig {
    /// Defaults for `unit_name`: the default service set, parameters at
    /// `<build_dir>/test.env`.
    pub fn new(
        unit_name: impl Into<String>,
        project: ComposeProject,
        build_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project,
            services: default_services(),
            extras: Vec::new(),
            params_path: build_dir.into().join("test.env"),
            unit_name: unit_name.into(),
            ready_timeout_secs: 300,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            no_cache: false,
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

/// Owner of the shared containerized environment.
pub struct EnvironmentManager {
    runner: Arc<dyn CommandRunner>,
    config: EnvConfig,
    state: Mutex<EnvironmentState>,
}

impl EnvironmentManager {
    pub fn new(runner: Arc<dyn CommandRunner>, config: EnvConfig) -> Self {
        Self {
            runner,
            config,
            state: Mutex::new(EnvironmentState::Stopped),
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub async fn state(&self) -> EnvironmentState {
        *self.state.lock().await
    }

    /// Write the parameters file for every configured service.
    pub fn write_environment(&self) -> Result<PathBuf> {
        let params = EnvironmentParams::from_services(&self.config.services, &self.config.extras);
        params.write(&self.config.params_path)?;
        Ok(self.config.params_path.clone())
    }

    /// Write parameters, then build the service images.
    #[instrument(skip(self), fields(project = %self.config.project.name))]
    pub async fn build_image(&self) -> Result<()> {
        self.write_environment()?;
        let spec = self.config.project.build(self.config.no_cache).streaming();
        self.run_checked("build", &spec).await?;
        info!("service images built");
        Ok(())
    }

    /// Stop everything, then provision `services` and wait until they run.
    ///
    /// An empty list means every configured service. Unknown names are
    /// rejected before anything is touched.
    #[instrument(skip(self), fields(project = %self.config.project.name))]
    pub async fn start(&self, services: &[String]) -> Result<()> {
        let requested = self.resolve_services(services)?;

        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;

        *state = EnvironmentState::Starting;
        info!(services = ?requested, "starting environment");

        match self.provision(&requested).await {
            Ok(()) => {
                *state = EnvironmentState::Running;
                info!("environment running");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "environment start failed; tearing down");
                self.stop_locked(&mut state).await;
                Err(e)
            }
        }
    }

    /// Best-effort teardown plus residual sweep. Never fails.
    #[instrument(skip(self), fields(project = %self.config.project.name))]
    pub async fn stop(&self) -> CleanupReport {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await
    }

    /// `docker-compose logs` for the project.
    pub async fn logs(&self) -> Result<String> {
        let output = self.run_checked("logs", &self.config.project.logs()).await?;
        Ok(output)
    }

    fn resolve_services(&self, services: &[String]) -> Result<Vec<String>> {
        if services.is_empty() {
            return Ok(self.config.service_names());
        }
        for name in services {
            if self.config.service(name).is_none() {
                return Err(EnvError::UnknownService(name.clone()));
            }
        }
        Ok(services.to_vec())
    }

    async fn provision(&self, services: &[String]) -> Result<()> {
        self.write_environment()?;
        let up = self.config.project.up(services);
        self.run_checked("up", &up).await?;
        self.wait_ready(services).await
    }

    /// Poll the running-service list with exponential backoff.
    async fn wait_ready(&self, services: &[String]) -> Result<()> {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.ready_timeout_secs);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms.max(1));
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms.max(1));

        loop {
            let pending = self.pending_services(services).await;
            if pending.is_empty() {
                debug!(waited_ms = started.elapsed().as_millis() as u64, "all services ready");
                return Ok(());
            }
            if Instant::now() + backoff > deadline {
                return Err(EnvError::NotReady {
                    pending,
                    waited_secs: self.config.ready_timeout_secs,
                });
            }
            let backoff_ms = backoff.as_millis() as u64;
            debug!(pending = ?pending, backoff_ms, "waiting for services");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    /// Requested services not yet reported running. A failed poll counts as
    /// nothing running.
    async fn pending_services(&self, services: &[String]) -> Vec<String> {
        let running = match self.runner.run(&self.config.project.ps_running()).await {
            Ok(output) if output.success() => output.stdout_lines(),
            Ok(output) => {
                debug!(detail = %output.diagnostic(), "readiness poll failed");
                Vec::new()
            }
            Err(e) => {
                debug!(error = %e, "readiness poll failed");
                Vec::new()
            }
        };
        services
            .iter()
            .filter(|s| !running.contains(s))
            .cloned()
            .collect()
    }

    async fn stop_locked(&self, state: &mut EnvironmentState) -> CleanupReport {
        *state = EnvironmentState::Stopping;
        let mut report = CleanupReport::default();

        let project = &self.config.project;
        let stop = self.runner.run(&project.stop()).await;
        report.record("compose stop", CleanupOutcome::from_result(&stop));
        let rm = self.runner.run(&project.rm()).await;
        report.record("compose rm", CleanupOutcome::from_result(&rm));

        self.sweep(&mut report).await;

        *state = EnvironmentState::Stopped;
        info!(
            removed = report.removed(),
            failures = report.failures().count(),
            "environment stopped"
        );
        report
    }

    /// Remove exited containers left behind by interrupted runs.
    async fn sweep(&self, report: &mut CleanupReport) {
        let listed = self
            .runner
            .run(&DockerCli::ps_exited(&self.config.unit_name))
            .await;
        let ids = match listed {
            Ok(output) if output.success() => output.stdout_lines(),
            other => {
                report.record("sweep list", CleanupOutcome::from_result(&other));
                return;
            }
        };
        if ids.is_empty() {
            report.record("sweep", CleanupOutcome::Absent);
            return;
        }
        for id in ids {
            let result = self.runner.run(&DockerCli::rm_force(&id)).await;
            let outcome = CleanupOutcome::from_result(&result);
            report.record(format!("docker rm {id}"), outcome);
        }
    }

    async fn run_checked(&self, action: &str, spec: &CommandSpec) -> Result<String> {
        debug!(command = %spec, "compose");
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(EnvError::ComposeFailed {
                action: action.to_string(),
                exit_code: output.exit_code,
                detail: output.diagnostic(),
            });
        }
        Ok(output.stdout)
    }
}
