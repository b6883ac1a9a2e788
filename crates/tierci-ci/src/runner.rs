//! Tier execution.
//!
//! [`TierRunner`] runs one [`TestTier`] to completion and reports its
//! aggregate status. A failing tier is a normal [`TierOutcome`], not an
//! error; whatever profile it wrote stays on disk for aggregation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tierci_core::{
    BuildOrchestrator, CommandRunner, CommandSpec, PipelineConfig, TestTier, TierSpec,
};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::stage::Stage;

/// Aggregate status of one tier run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierOutcome {
    pub tier: TestTier,

    /// Exit code (0 = every selected test passed).
    pub exit_code: i32,

    /// Coverage profile, when the tier left one behind.
    pub profile: Option<PathBuf>,

    /// Short reason for a failure.
    pub detail: Option<String>,

    pub duration_ms: u64,
}

impl TierOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of one executed pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Failure description, if any.
    pub detail: Option<String>,
}

impl StageResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    pub fn ok(stage: Stage, duration_ms: u64) -> Self {
        Self {
            stage,
            exit_code: 0,
            duration_ms,
            detail: None,
        }
    }

    pub fn failed(
        stage: Stage,
        exit_code: i32,
        detail: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            stage,
            // a failure must never read as success
            exit_code: if exit_code == 0 { 1 } else { exit_code },
            duration_ms,
            detail: Some(detail.into()),
        }
    }

    pub fn from_tier(stage: Stage, outcome: &TierOutcome) -> Self {
        Self {
            stage,
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration_ms,
            detail: outcome.detail.clone(),
        }
    }
}

/// Runs test tiers for the configured unit.
pub struct TierRunner {
    runner: Arc<dyn CommandRunner>,
    config: PipelineConfig,
    build: BuildOrchestrator,
}

impl TierRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, config: PipelineConfig) -> Self {
        let build = BuildOrchestrator::new(runner.clone(), config.clone());
        Self {
            runner,
            config,
            build,
        }
    }

    /// Create the coverage directory.
    pub fn prepare(&self) -> Result<PathBuf> {
        let dir = self.config.coverage_path();
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove a profile left by an earlier run of the same tier.
    fn discard_profile(&self, spec: &TierSpec) -> Result<()> {
        match std::fs::remove_file(&spec.profile_path) {
            Ok(()) => {
                debug!(path = %spec.profile_path.display(), "removed stale profile");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// `go test` invocation for a coverage-collecting tier.
    pub fn go_test_command(&self, spec: &TierSpec) -> CommandSpec {
        let mut cmd = CommandSpec::new("go")
            .arg("test")
            .current_dir(&self.config.source_dir)
            .streaming();
        if !spec.tags.is_empty() {
            cmd = cmd.arg(format!("-tags={}", spec.tags.join(",")));
        }
        if spec.race {
            cmd = cmd.arg("-race");
        }
        cmd.arg(format!("-covermode={}", spec.coverage_mode.as_str()))
            .arg(format!("-coverprofile={}", spec.profile_path.display()))
            .arg("-timeout")
            .arg(format!("{}s", spec.timeout_secs))
            .args(self.config.packages.iter().cloned())
    }

    /// Run `tier` to completion.
    pub async fn run_tier(&self, tier: TestTier) -> Result<TierOutcome> {
        let spec = TierSpec::for_tier(tier, &self.config);
        info!(tier = %tier, race = spec.race, "running tier");
        let start = Instant::now();
        if tier != TestTier::Benchmark {
            self.discard_profile(&spec)?;
        }

        let (exit_code, detail) = match tier {
            TestTier::Unit | TestTier::Integration => {
                self.prepare()?;
                let output = self.runner.run(&self.go_test_command(&spec)).await?;
                let code = output.exit_code;
                let detail = (!output.success())
                    .then(|| format!("{tier} tests exited with code {code}"));
                (code, detail)
            }
            TestTier::System => self.run_system(&spec).await?,
            TestTier::Benchmark => {
                debug!("benchmark tier is inert");
                (0, None)
            }
        };

        let path = &spec.profile_path;
        let profile = path.exists().then(|| path.clone());
        let outcome = TierOutcome {
            tier,
            exit_code,
            profile,
            detail,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        if outcome.success() {
            info!(tier = %tier, duration_ms = outcome.duration_ms, "tier passed");
        } else {
            warn!(tier = %tier, exit_code = outcome.exit_code, "tier failed");
        }
        Ok(outcome)
    }

    /// Quick unit run without coverage; `-race` follows the configuration.
    pub async fn run_unit_quick(&self) -> Result<TierOutcome> {
        let start = Instant::now();
        let mut cmd = CommandSpec::new("go")
            .arg("test")
            .current_dir(&self.config.source_dir)
            .streaming();
        if self.config.race_detector {
            cmd = cmd.arg("-race");
        }
        let cmd = cmd.args(self.config.packages.iter().cloned());
        let output = self.runner.run(&cmd).await?;
        Ok(TierOutcome {
            tier: TestTier::Unit,
            exit_code: output.exit_code,
            profile: None,
            detail: (!output.success()).then(|| "unit tests failed".to_string()),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Ensure the isolated Python environment exists and is up to date.
    pub async fn ensure_python_env(&self) -> Result<Option<(i32, String)>> {
        let system = &self.config.system;
        let env_dir = self.config.resolve(&system.python_env);

        if !env_dir.join("bin").exists() {
            let create = CommandSpec::new("virtualenv")
                .arg(env_dir.display().to_string())
                .current_dir(&self.config.source_dir);
            let output = self.runner.run(&create).await?;
            if !output.success() {
                let detail = format!("virtualenv: {}", output.diagnostic());
                return Ok(Some((output.exit_code, detail)));
            }
        }

        let pip = env_dir.join("bin").join("pip");
        for requirements in &system.requirements {
            let install = CommandSpec::new(pip.display().to_string())
                .args(["install", "-q", "-U", "-r"])
                .arg(requirements.display().to_string())
                .current_dir(&self.config.source_dir);
            let output = self.runner.run(&install).await?;
            if !output.success() {
                let detail = format!("pip install: {}", output.diagnostic());
                return Ok(Some((output.exit_code, detail)));
            }
        }
        Ok(None)
    }

    /// System tier: instrumented binary, Python harness, coverage conversion.
    async fn run_system(&self, spec: &TierSpec) -> Result<(i32, Option<String>)> {
        let system = &self.config.system;
        self.prepare()?;
        self.build.build_test_binary().await?;

        if let Some((code, detail)) = self.ensure_python_env().await? {
            return Ok((code, Some(detail)));
        }

        let env_bin = self.config.resolve(&system.python_env).join("bin");
        let harness = CommandSpec::new(env_bin.join("nosetests").display().to_string())
            .arg("-w")
            .arg(system.tests_dir.display().to_string())
            .arg(format!("--process-timeout={}", spec.timeout_secs))
            .arg("--with-timer")
            .current_dir(&self.config.source_dir)
            .streaming();
        let harness_out = self.runner.run(&harness).await?;

        // Convert whatever the harness left behind, even after a failure.
        let convert = CommandSpec::new(&system.python)
            .arg(system.converter_script.display().to_string())
            .arg("-o")
            .arg(spec.profile_path.display().to_string())
            .arg(self.config.resolve(&system.run_dir).display().to_string())
            .current_dir(&self.config.source_dir);
        let converted = self.runner.run(&convert).await?;

        if !harness_out.success() {
            if !converted.success() {
                warn!(detail = %converted.diagnostic(), "system coverage conversion failed");
            }
            let code = harness_out.exit_code;
            let detail = format!("system tests exited with code {code}");
            return Ok((code, Some(detail)));
        }
        if !converted.success() {
            return Ok((
                converted.exit_code,
                Some(format!("coverage conversion: {}", converted.diagnostic())),
            ));
        }
        Ok((0, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tierci_core::fakes::{Reply, ScriptedRunner};

    fn runner_for(fake: Arc<ScriptedRunner>, dir: &std::path::Path) -> TierRunner {
        let config = PipelineConfig::new("beat", dir);
        TierRunner::new(fake, config)
    }

    #[test]
    fn test_stage_result_failed_never_zero() {
        let result = StageResult::failed(Stage::Check, 0, "gofmt", 5);
        assert_eq!(result.exit_code, 1);
        assert!(!result.passed());
        assert!(StageResult::ok(Stage::Build, 1).passed());
    }

    #[tokio::test]
    async fn test_unit_tier_command() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(ScriptedRunner::new());
        let tiers = runner_for(fake.clone(), dir.path());
        let outcome = tiers.run_tier(TestTier::Unit).await.unwrap();
        assert!(outcome.success());
        let line = &fake.command_lines()[0];
        assert!(line.starts_with("go test -covermode=atomic -coverprofile="));
        assert!(line.ends_with("unit.cov -timeout 90s ./..."));
        assert!(!line.contains("-race"));
        assert!(dir.path().join("build").join("coverage").is_dir());
    }

    #[tokio::test]
    async fn test_integration_tier_uses_tags_and_race() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(
            ScriptedRunner::new().on(&["go", "test"], Reply::fail(1, "FAIL")),
        );
        let tiers = runner_for(fake.clone(), dir.path());
        let outcome = tiers.run_tier(TestTier::Integration).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.profile.is_none());
        let line = &fake.command_lines()[0];
        let expected = "go test -tags=integration -race -covermode=atomic";
        assert!(line.starts_with(expected));
    }

    #[tokio::test]
    async fn test_failed_tier_keeps_partial_profile() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(ScriptedRunner::new().on_with(
            &["go", "test"],
            Reply::fail(2, ""),
            |spec| {
                let path = spec
                    .args
                    .iter()
                    .find_map(|a| a.strip_prefix("-coverprofile="))
                    .unwrap();
                std::fs::write(path, "mode: atomic\n").unwrap();
            },
        ));
        let tiers = runner_for(fake, dir.path());
        let outcome = tiers.run_tier(TestTier::Unit).await.unwrap();
        assert_eq!(outcome.exit_code, 2);
        assert!(outcome.profile.unwrap().ends_with("unit.cov"));
    }

    #[tokio::test]
    async fn test_stale_profile_is_not_reported_as_this_run() {
        let dir = tempdir().unwrap();
        let coverage = dir.path().join("build").join("coverage");
        std::fs::create_dir_all(&coverage).unwrap();
        let stale = "mode: atomic\nold.go:1.1,2.1 1 9\n";
        std::fs::write(coverage.join("integration.cov"), stale).unwrap();

        let fake = Arc::new(
            ScriptedRunner::new().on(&["go", "test"], Reply::fail(1, "build failed")),
        );
        let tiers = runner_for(fake, dir.path());
        let outcome = tiers.run_tier(TestTier::Integration).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.profile.is_none());
        assert!(!coverage.join("integration.cov").exists());
    }

    #[tokio::test]
    async fn test_benchmark_is_inert() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(ScriptedRunner::new());
        let tiers = runner_for(fake.clone(), dir.path());
        assert!(tiers.run_tier(TestTier::Benchmark).await.unwrap().success());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_quick_unit_race_toggle() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(ScriptedRunner::new());
        let mut config = PipelineConfig::new("beat", dir.path());
        config.race_detector = true;
        let tiers = TierRunner::new(fake.clone(), config);
        tiers.run_unit_quick().await.unwrap();
        assert_eq!(
            fake.command_lines(),
            vec!["go test -race ./...".to_string()]
        );
    }

    #[tokio::test]
    async fn test_system_tier_sequence() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(ScriptedRunner::new());
        let tiers = runner_for(fake.clone(), dir.path());
        let outcome = tiers.run_tier(TestTier::System).await.unwrap();
        assert!(outcome.success());

        let lines = fake.command_lines();
        assert!(lines[0].starts_with("go test -c -race -covermode=atomic"));
        assert!(lines[1].starts_with("virtualenv "));
        let pip = "bin/pip install -q -U -r tests/system/requirements.txt";
        assert!(lines[2].contains(pip));
        let harness = "bin/nosetests -w tests/system --process-timeout=90 --with-timer";
        assert!(lines[3].contains(harness));
        let convert = "python dev-tools/aggregate_coverage.py -o ";
        assert!(lines[4].starts_with(convert));
        assert!(lines[4].contains("system.cov"));
    }

    #[tokio::test]
    async fn test_system_tier_skips_virtualenv_when_present() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("build/python-env/bin")).unwrap();
        let fake = Arc::new(ScriptedRunner::new());
        let tiers = runner_for(fake.clone(), dir.path());
        tiers.run_tier(TestTier::System).await.unwrap();
        assert_eq!(fake.count_containing("virtualenv"), 0);
    }

    #[tokio::test]
    async fn test_system_harness_failure_still_converts() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(
            ScriptedRunner::new().on_contains("nosetests", Reply::fail(4, "")),
        );
        let tiers = runner_for(fake.clone(), dir.path());
        let outcome = tiers.run_tier(TestTier::System).await.unwrap();
        assert_eq!(outcome.exit_code, 4);
        assert_eq!(fake.count_containing("aggregate_coverage.py"), 1);
    }
}
