//! Remote execution bridge for the containerized integration tier.
//!
//! The tier is launched detached in a fresh container, then attached to
//! synchronously. The status reported is always the remote process's own
//! exit code, read back after termination, never the attach command's.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use compose_env_manager::{CleanupOutcome, ComposeProject, DockerCli};
use serde::{Deserialize, Serialize};
use tierci_core::{CommandRunner, TestTier};
use tracing::{debug, info, warn};

use crate::error::{CiError, Result};

/// Identifier of a launched remote instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHandle {
    pub id: String,
}

/// Two-phase remote execution: launch detached, then await the result.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Start `command` detached inside a fresh instance of `service`.
    async fn launch(&self, service: &str, command: &[String]) -> Result<RemoteHandle>;

    /// Block until the instance terminates; return its process exit code.
    async fn await_result(&self, handle: &RemoteHandle) -> Result<i32>;

    /// Copy `remote` out of the instance into the local directory `local_dir`.
    async fn copy_artifact(
        &self,
        handle: &RemoteHandle,
        remote: &Path,
        local_dir: &Path,
    ) -> Result<()>;

    /// Remove the instance. Best-effort.
    async fn remove(&self, handle: &RemoteHandle) -> CleanupOutcome;
}

/// What the bridge runs and where the artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Compose service the instance is created from.
    pub service: String,

    /// Command run inside the instance.
    pub command: Vec<String>,

    /// Coverage profile path inside the instance.
    pub remote_artifact: PathBuf,

    /// Local coverage directory the artifact is copied into.
    pub local_dir: PathBuf,
}

impl BridgeConfig {
    /// Run the integration tier of `tierci` inside `service`, with the
    /// unit's sources mounted at `remote_root`.
    pub fn integration(
        service: impl Into<String>,
        remote_root: &Path,
        coverage_dir: &Path,
        local_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service: service.into(),
            command: vec!["tierci".to_string(), "integration-tests".to_string()],
            remote_artifact: remote_root
                .join(coverage_dir)
                .join(TestTier::Integration.profile_file_name()),
            local_dir: local_dir.into(),
        }
    }
}

impl BridgeConfig {
    /// Where the copied artifact lands locally.
    pub fn local_artifact(&self) -> Option<PathBuf> {
        self.remote_artifact
            .file_name()
            .map(|name| self.local_dir.join(name))
    }
}

/// Result of one bridged run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeOutcome {
    /// The remote process's exit code.
    pub exit_code: i32,

    /// Whether the coverage artifact reached the local directory.
    pub artifact_copied: bool,

    /// Outcome of removing the remote instance.
    pub removal: CleanupOutcome,
}

impl BridgeOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Drives a [`RemoteBackend`] through launch, await, copy and remove.
pub struct RemoteBridge {
    backend: Arc<dyn RemoteBackend>,
    config: BridgeConfig,
}

impl RemoteBridge {
    pub fn new(backend: Arc<dyn RemoteBackend>, config: BridgeConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<BridgeOutcome> {
        let config = &self.config;
        // a failed copy must not leave an earlier run's artifact behind
        if let Some(local) = config.local_artifact() {
            match std::fs::remove_file(&local) {
                Ok(()) => debug!(path = %local.display(), "removed stale artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let handle = self.backend.launch(&config.service, &config.command).await?;
        info!(instance = %handle.id, service = %config.service, "remote tier launched");

        let exit_code = match self.backend.await_result(&handle).await {
            Ok(code) => code,
            Err(e) => {
                let removal = self.backend.remove(&handle).await;
                debug!(removal = ?removal, "instance removed after await failure");
                return Err(e);
            }
        };

        let artifact_copied = match self
            .backend
            .copy_artifact(&handle, &config.remote_artifact, &config.local_dir)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                if exit_code == 0 {
                    warn!(error = %e, "coverage artifact not copied from passing run");
                } else {
                    debug!(error = %e, "coverage artifact not copied");
                }
                false
            }
        };

        let removal = self.backend.remove(&handle).await;
        info!(
            instance = %handle.id,
            exit_code = exit_code,
            artifact_copied = artifact_copied,
            "remote tier finished"
        );

        Ok(BridgeOutcome {
            exit_code,
            artifact_copied,
            removal,
        })
    }
}

/// [`RemoteBackend`] on `docker-compose run -d` and the docker CLI.
pub struct ComposeBackend {
    runner: Arc<dyn CommandRunner>,
    project: ComposeProject,
}

impl ComposeBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, project: ComposeProject) -> Self {
        Self { runner, project }
    }
}

#[async_trait]
impl RemoteBackend for ComposeBackend {
    async fn launch(&self, service: &str, command: &[String]) -> Result<RemoteHandle> {
        let output = self
            .runner
            .run(&self.project.run_detached(service, command))
            .await?;
        if !output.success() {
            return Err(CiError::bridge("launch", output.diagnostic()));
        }
        // compose may print pull/creation progress before the id
        let id = output
            .stdout_lines()
            .pop()
            .ok_or_else(|| CiError::bridge("launch", "no container id on stdout"))?;
        Ok(RemoteHandle { id })
    }

    async fn await_result(&self, handle: &RemoteHandle) -> Result<i32> {
        let attached = self.runner.run(&DockerCli::attach(&handle.id)).await?;
        debug!(attach_exit = attached.exit_code, "detached from instance");

        let output = self
            .runner
            .run(&DockerCli::inspect_exit_code(&handle.id))
            .await?;
        if !output.success() {
            return Err(CiError::bridge("inspect", output.diagnostic()));
        }
        let raw = output.stdout.trim();
        raw.parse::<i32>().map_err(|e| {
            let reason = format!("bad exit code {raw:?}: {e}");
            CiError::bridge("inspect", reason)
        })
    }

    async fn copy_artifact(
        &self,
        handle: &RemoteHandle,
        remote: &Path,
        local_dir: &Path,
    ) -> Result<()> {
        std::fs::create_dir_all(local_dir)?;
        let output = self
            .runner
            .run(&DockerCli::cp(&handle.id, remote, local_dir))
            .await?;
        if !output.success() {
            return Err(CiError::bridge("copy", output.diagnostic()));
        }
        Ok(())
    }

    async fn remove(&self, handle: &RemoteHandle) -> CleanupOutcome {
        let result = self.runner.run(&DockerCli::rm(&handle.id)).await;
        let outcome = CleanupOutcome::from_result(&result);
        if let CleanupOutcome::Failed { reason } = &outcome {
            tierci_core::obs::emit_cleanup_failed("remove instance", reason);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tierci_core::fakes::{Reply, ScriptedRunner};

    fn backend(fake: Arc<ScriptedRunner>) -> ComposeBackend {
        ComposeBackend::new(fake, ComposeProject::new("beat", "latest", "."))
    }

    #[test]
    fn test_integration_bridge_config() {
        let config = BridgeConfig::integration(
            "beat",
            Path::new("/go/src/beat"),
            Path::new("build/coverage"),
            "/host/build/coverage",
        );
        assert_eq!(config.command, vec!["tierci", "integration-tests"]);
        assert_eq!(
            config.remote_artifact,
            PathBuf::from("/go/src/beat/build/coverage/integration.cov")
        );
        assert_eq!(
            config.local_artifact(),
            Some(PathBuf::from("/host/build/coverage/integration.cov"))
        );
    }

    #[tokio::test]
    async fn test_compose_backend_reads_remote_status_not_attach() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(
            ScriptedRunner::new()
                .on_contains(" run -d", Reply::ok("Creating network\nf00dcafe\n"))
                .on(&["docker", "attach"], Reply::ok(""))
                .on(&["docker", "inspect"], Reply::ok("3\n")),
        );
        let bridge = RemoteBridge::new(
            Arc::new(backend(fake.clone())),
            BridgeConfig::integration(
                "beat",
                Path::new("/src"),
                Path::new("build/coverage"),
                dir.path(),
            ),
        );
        let outcome = bridge.run().await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.artifact_copied);
        assert_eq!(outcome.removal, CleanupOutcome::Removed);

        let lines = fake.command_lines();
        assert!(lines[0].ends_with("run -d beat tierci integration-tests"));
        assert_eq!(lines[1], "docker attach f00dcafe");
        assert_eq!(
            lines[2],
            "docker inspect --format {{.State.ExitCode}} f00dcafe"
        );
        let copy = "docker cp f00dcafe:/src/build/coverage/integration.cov ";
        assert!(lines[3].starts_with(copy));
        assert_eq!(lines[4], "docker rm f00dcafe");
    }

    #[tokio::test]
    async fn test_launch_without_id_fails() {
        let fake = Arc::new(ScriptedRunner::new());
        let err = backend(fake).launch("beat", &[]).await.unwrap_err();
        assert!(err.to_string().contains("no container id"));
    }

    #[tokio::test]
    async fn test_unparsable_inspect_is_error() {
        let fake = Arc::new(
            ScriptedRunner::new().on(&["docker", "inspect"], Reply::ok("<no value>")),
        );
        let handle = RemoteHandle {
            id: "x".to_string(),
        };
        assert!(backend(fake).await_result(&handle).await.is_err());
    }
}
