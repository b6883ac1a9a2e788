//! Build Orchestrator
//!
//! Host builds, the cross-compile matrix, static checks, and the
//! maintainer-side formatting and cleanup helpers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::BuildError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

/// One (OS, Arch) cross-compile target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrossTarget {
    pub os: String,
    pub arch: String,
}

impl CrossTarget {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// `<unit>-<os>-<arch>`, with `.exe` on windows.
    pub fn artifact_name(&self, unit: &str) -> String {
        let suffix = if self.os == "windows" { ".exe" } else { "" };
        format!("{unit}-{}-{}{suffix}", self.os, self.arch)
    }
}

impl std::fmt::Display for CrossTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Cartesian product of OS and arch lists, without duplicates.
pub fn default_targets(os_list: &[String], arch_list: &[String]) -> Vec<CrossTarget> {
    let mut seen = BTreeSet::new();
    let mut targets = Vec::new();
    for os in os_list {
        for arch in arch_list {
            let target = CrossTarget::new(os, arch);
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }
    }
    targets
}

/// Outcome of compiling one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Built,
    Failed { exit_code: i32, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: CrossTarget,
    pub artifact: PathBuf,
    pub status: TargetStatus,
}

impl TargetOutcome {
    pub fn is_built(&self) -> bool {
        matches!(self.status, TargetStatus::Built)
    }

    /// 0 when built, otherwise the compiler's exit code (never 0).
    pub fn exit_code(&self) -> i32 {
        match &self.status {
            TargetStatus::Built => 0,
            TargetStatus::Failed { exit_code, .. } if *exit_code != 0 => *exit_code,
            TargetStatus::Failed { .. } => 1,
        }
    }
}

/// Per-target results of a cross-compile run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossCompileReport {
    pub outcomes: Vec<TargetOutcome>,
}

impl CrossCompileReport {
    /// Every target built.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(TargetOutcome::is_built)
    }

    pub fn built(&self) -> Vec<&TargetOutcome> {
        self.outcomes.iter().filter(|o| o.is_built()).collect()
    }

    pub fn failed(&self) -> Vec<&TargetOutcome> {
        self.outcomes.iter().filter(|o| !o.is_built()).collect()
    }
}

/// Compiles and statically checks the target unit.
pub struct BuildOrchestrator {
    runner: Arc<dyn CommandRunner>,
    config: PipelineConfig,
}

impl BuildOrchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>, config: PipelineConfig) -> Self {
        Self { runner, config }
    }

    fn go(&self) -> CommandSpec {
        CommandSpec::new("go").current_dir(&self.config.source_dir)
    }

    async fn run_step(&self, step: &str, spec: CommandSpec) -> Result<CommandOutput, BuildError> {
        debug!(step = step, command = %spec, "build step");
        let output = self.runner.run(&spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(BuildError::Failed {
                step: step.to_string(),
                exit_code: output.exit_code,
                detail: output.diagnostic(),
            })
        }
    }

    /// Compile for the host platform. Any error is fatal.
    pub async fn build(&self) -> Result<PathBuf, BuildError> {
        let artifact = self.config.resolve(&self.config.unit_name);
        let spec = self
            .go()
            .arg("build")
            .arg("-o")
            .arg(artifact.display().to_string());
        self.run_step("go build", spec).await?;
        info!(artifact = %artifact.display(), "build complete");
        Ok(artifact)
    }

    /// Compile every target; one target's failure does not stop the others.
    pub async fn crosscompile(
        &self,
        targets: &[CrossTarget],
    ) -> Result<CrossCompileReport, BuildError> {
        let bin_dir = self.config.bin_path();
        std::fs::create_dir_all(&bin_dir)?;

        let mut report = CrossCompileReport::default();
        for target in targets {
            let artifact = bin_dir.join(target.artifact_name(&self.config.unit_name));
            let spec = self
                .go()
                .arg("build")
                .arg("-o")
                .arg(artifact.display().to_string())
                .env("GOOS", &target.os)
                .env("GOARCH", &target.arch);

            let status = match self.runner.run(&spec).await {
                Ok(output) if output.success() => {
                    info!(target = %target, artifact = %artifact.display(), "cross-compiled");
                    TargetStatus::Built
                }
                Ok(output) => {
                    warn!(target = %target, exit_code = output.exit_code, "cross-compile failed");
                    TargetStatus::Failed {
                        exit_code: output.exit_code,
                        detail: output.diagnostic(),
                    }
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "cross-compile could not run");
                    TargetStatus::Failed {
                        exit_code: 1,
                        detail: e.to_string(),
                    }
                }
            };
            report.outcomes.push(TargetOutcome {
                target: target.clone(),
                artifact,
                status,
            });
        }

        Ok(report)
    }

    /// Formatting compliance, then static analysis. Never rewrites source.
    pub async fn check(&self) -> Result<(), BuildError> {
        let files = self.source_files()?;
        if !files.is_empty() {
            let spec = CommandSpec::new("gofmt")
                .arg("-l")
                .args(files)
                .current_dir(&self.config.source_dir);
            let output = self.run_step("gofmt -l", spec).await?;
            let unformatted = output.stdout_lines();
            if !unformatted.is_empty() {
                return Err(BuildError::Unformatted { files: unformatted });
            }
        }

        let spec = self
            .go()
            .arg("vet")
            .args(self.config.packages.iter().cloned());
        self.run_step("go vet", spec).await?;
        info!("check passed");
        Ok(())
    }

    /// Rewrite formatting in place. Returns the files gofmt touched.
    pub async fn fmt(&self) -> Result<Vec<String>, BuildError> {
        self.rewrite(&["-l", "-w"]).await
    }

    /// Like [`Self::fmt`], also applying gofmt's simplifications.
    pub async fn simplify(&self) -> Result<Vec<String>, BuildError> {
        self.rewrite(&["-l", "-s", "-w"]).await
    }

    async fn rewrite(&self, flags: &[&str]) -> Result<Vec<String>, BuildError> {
        let files = self.source_files()?;
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let spec = CommandSpec::new("gofmt")
            .args(flags.iter().copied())
            .args(files)
            .current_dir(&self.config.source_dir);
        let output = self.run_step("gofmt -w", spec).await?;
        Ok(output.stdout_lines())
    }

    /// Compile the coverage-instrumented test binary the system tier runs.
    pub async fn build_test_binary(&self) -> Result<PathBuf, BuildError> {
        let artifact = self.config.test_binary_path();
        let packages = self.config.packages_comma_separated();
        let spec = self
            .go()
            .args(["test", "-c", "-race", "-covermode=atomic"])
            .arg(format!("-coverpkg={packages}"))
            .arg("-o")
            .arg(artifact.display().to_string());
        self.run_step("go test -c", spec).await?;
        info!(artifact = %artifact.display(), "test binary built");
        Ok(artifact)
    }

    /// Remove build outputs. Absent paths are skipped.
    pub fn clean(&self) -> Result<Vec<PathBuf>, BuildError> {
        let unit = &self.config.unit_name;
        let mut removed = Vec::new();

        let build_dir = self.config.build_path();
        if build_dir.exists() {
            std::fs::remove_dir_all(&build_dir)?;
            removed.push(build_dir);
        }

        for name in [
            unit.to_string(),
            format!("{unit}.test"),
            format!("{unit}.exe"),
            format!("{unit}.test.exe"),
        ] {
            let path = self.config.resolve(name);
            if path.is_file() {
                std::fs::remove_file(&path)?;
                removed.push(path);
            }
        }

        info!(removed = removed.len(), "clean complete");
        Ok(removed)
    }

    /// Go sources under the source tree, relative to it, sorted.
    pub fn source_files(&self) -> Result<Vec<String>, BuildError> {
        let root = &self.config.source_dir;
        let build_dir = self.config.build_path();
        let mut files = Vec::new();
        collect_go_files(root, &build_dir, &mut files)?;
        files.sort();
        Ok(files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap_or(p).display().to_string())
            .collect())
    }
}

fn collect_go_files(
    dir: &Path,
    build_dir: &Path,
    files: &mut Vec<PathBuf>,
) -> Result<(), BuildError> {
    if !dir.is_dir() || dir == build_dir {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().unwrap_or_default().to_string_lossy();

        // Vendored and hidden trees are not ours to format.
        if name.starts_with('.') || name == "vendor" {
            continue;
        }

        if path.is_dir() {
            collect_go_files(&path, build_dir, files)?;
        } else if path.extension().map(|e| e == "go").unwrap_or(false) {
            files.push(path);
        }
    }

    Ok(())
}
