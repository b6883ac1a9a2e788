//! Command builders for `docker-compose` and the `docker` CLI.
//!
//! Nothing here runs a process; every builder returns a [`CommandSpec`]
//! for the manager (or the remote bridge) to hand to a `CommandRunner`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tierci_core::CommandSpec;

/// Compose program name.
pub const COMPOSE: &str = "docker-compose";

/// Container CLI program name.
pub const DOCKER: &str = "docker";

/// A compose project: name, compose files, and the directory commands run in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeProject {
    /// `-p` project name; scopes every container the project creates.
    pub name: String,

    /// `-f` files, in override order.
    pub files: Vec<PathBuf>,

    /// Working directory for compose invocations.
    pub work_dir: PathBuf,
}

impl ComposeProject {
    /// Base testing environment, the named variant, then the unit's own file.
    pub fn new(
        name: impl Into<String>,
        testing_environment: &str,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let envs = Path::new("..").join("testing").join("environments");
        Self {
            name: name.into(),
            files: vec![
                envs.join("base.yml"),
                envs.join(format!("{testing_environment}.yml")),
                PathBuf::from("docker-compose.yml"),
            ],
            work_dir: work_dir.into(),
        }
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }

    fn base(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(COMPOSE)
            .args(["-p", self.name.as_str()])
            .current_dir(&self.work_dir);
        for file in &self.files {
            spec = spec.arg("-f").arg(file.display().to_string());
        }
        spec
    }

    /// `up -d <services...>`
    pub fn up(&self, services: &[String]) -> CommandSpec {
        self.base()
            .args(["up", "-d"])
            .args(services.iter().cloned())
    }

    /// Services currently in the running state, one per line.
    pub fn ps_running(&self) -> CommandSpec {
        self.base()
            .args(["ps", "--services", "--filter", "status=running"])
    }

    pub fn stop(&self) -> CommandSpec {
        self.base().arg("stop")
    }

    pub fn rm(&self) -> CommandSpec {
        self.base().args(["rm", "-f"])
    }

    /// `build --pull --force-rm [--no-cache]`
    pub fn build(&self, no_cache: bool) -> CommandSpec {
        let spec = self.base().args(["build", "--pull", "--force-rm"]);
        if no_cache {
            spec.arg("--no-cache")
        } else {
            spec
        }
    }

    pub fn logs(&self) -> CommandSpec {
        self.base().args(["logs", "--no-color"])
    }

    /// `run -d <service> <command...>`: detached, prints the container id.
    pub fn run_detached(&self, service: &str, command: &[String]) -> CommandSpec {
        self.base()
            .args(["run", "-d", service])
            .args(command.iter().cloned())
    }
}

/// Builders for plain `docker` invocations against single containers.
pub struct DockerCli;

impl DockerCli {
    /// Ids of exited containers whose name contains `name`.
    pub fn ps_exited(name: &str) -> CommandSpec {
        CommandSpec::new(DOCKER).args([
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            "status=exited".to_string(),
            "--filter".to_string(),
            format!("name={name}"),
            "--format".to_string(),
            "{{.ID}}".to_string(),
        ])
    }

    pub fn rm_force(id: &str) -> CommandSpec {
        CommandSpec::new(DOCKER).args(["rm", "-f", id])
    }

    pub fn rm(id: &str) -> CommandSpec {
        CommandSpec::new(DOCKER).args(["rm", id])
    }

    /// Attach to a running container, streaming its output to ours.
    pub fn attach(id: &str) -> CommandSpec {
        CommandSpec::new(DOCKER).args(["attach", id]).streaming()
    }

    /// Exit status of the container's main process.
    pub fn inspect_exit_code(id: &str) -> CommandSpec {
        CommandSpec::new(DOCKER).args(["inspect", "--format", "{{.State.ExitCode}}", id])
    }

    /// Copy `remote` out of container `id` into `local`.
    pub fn cp(id: &str, remote: &Path, local: &Path) -> CommandSpec {
        CommandSpec::new(DOCKER).args([
            "cp".to_string(),
            format!("{id}:{}", remote.display()),
            local.display().to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ComposeProject {
        ComposeProject::new("metricbeat", "latest", "/src/metricbeat")
    }

    #[test]
    fn test_default_files() {
        let p = project();
        assert_eq!(
            p.files,
            vec![
                PathBuf::from("../testing/environments/base.yml"),
                PathBuf::from("../testing/environments/latest.yml"),
                PathBuf::from("docker-compose.yml"),
            ]
        );
    }

    #[test]
    fn test_up_command_line() {
        let spec = project().up(&["redis".to_string(), "logstash".to_string()]);
        assert_eq!(
            spec.command_line(),
            "docker-compose -p metricbeat -f ../testing/environments/base.yml \
             -f ../testing/environments/latest.yml -f docker-compose.yml up -d redis logstash"
        );
        assert_eq!(spec.cwd, Some(PathBuf::from("/src/metricbeat")));
    }

    #[test]
    fn test_build_no_cache() {
        let p = project().with_files(vec![PathBuf::from("docker-compose.yml")]);
        assert_eq!(
            p.build(false).command_line(),
            "docker-compose -p metricbeat -f docker-compose.yml build --pull --force-rm"
        );
        assert!(p.build(true).command_line().ends_with("--no-cache"));
    }

    #[test]
    fn test_docker_cli_builders() {
        assert_eq!(
            DockerCli::ps_exited("metricbeat").command_line(),
            "docker ps -a --filter status=exited --filter name=metricbeat --format {{.ID}}"
        );
        let remote = Path::new("/go/src/build/coverage/integration.cov");
        assert_eq!(
            DockerCli::cp("abc", remote, Path::new("build/coverage")).command_line(),
            "docker cp abc:/go/src/build/coverage/integration.cov build/coverage"
        );
        assert!(DockerCli::attach("abc").inherit_output);
    }
}
