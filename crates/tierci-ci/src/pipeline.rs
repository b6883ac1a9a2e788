//! Pipeline composition: fixed stage order, switch gating, environment
//! lifecycle, and run recording.

use std::sync::Arc;
use std::time::Instant;

use compose_env_manager::EnvironmentManager;
use serde::{Deserialize, Serialize};
use tierci_core::coverage::clear_profiles;
use tierci_core::{
    git, obs, BuildOrchestrator, CommandRunner, CoverageAggregator, PipelineConfig, TestTier,
};
use tracing::{info, warn, Instrument};

use crate::bridge::RemoteBridge;
use crate::error::Result;
use crate::runner::{StageResult, TierRunner};
use crate::spec::RunRecord;
use crate::stage::Stage;

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,

    /// Stages the run was planned with, in order.
    pub plan: Vec<Stage>,

    /// Results of executed stages, in order.
    pub stages: Vec<StageResult>,

    /// Whether every planned stage ran and passed.
    pub success: bool,

    /// First failing stage.
    pub failed_stage: Option<Stage>,

    /// 0 on success, otherwise the failing stage's exit code.
    pub exit_code: i32,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn from_stages(
        run_id: String,
        plan: Vec<Stage>,
        stages: Vec<StageResult>,
        duration_ms: u64,
    ) -> Self {
        let failed = stages.iter().find(|s| !s.passed());
        let success = failed.is_none() && stages.len() == plan.len();
        let exit_code = match failed {
            Some(stage) => stage.exit_code,
            None if success => 0,
            None => 1,
        };
        Self {
            run_id,
            failed_stage: failed.map(|s| s.stage),
            plan,
            stages,
            success,
            exit_code,
            duration_ms,
        }
    }

    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    /// Executed stage names, in order.
    pub fn executed(&self) -> Vec<Stage> {
        self.stages.iter().map(|s| s.stage).collect()
    }
}

/// Runs stage plans strictly in sequence, stopping at the first failure.
pub struct Composer {
    runner: Arc<dyn CommandRunner>,
    config: PipelineConfig,
    build: BuildOrchestrator,
    tiers: TierRunner,
    coverage: CoverageAggregator,
    environment: Arc<EnvironmentManager>,
    bridge: RemoteBridge,
    services: Vec<String>,
}

impl Composer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: PipelineConfig,
        environment: Arc<EnvironmentManager>,
        bridge: RemoteBridge,
    ) -> Self {
        let build = BuildOrchestrator::new(runner.clone(), config.clone());
        let tiers = TierRunner::new(runner.clone(), config.clone());
        let coverage = CoverageAggregator::new(
            runner.clone(),
            config.coverage_path(),
            config.source_dir.clone(),
        );
        Self {
            runner,
            config,
            build,
            tiers,
            coverage,
            environment,
            bridge,
            services: Vec::new(),
        }
    }

    /// Services provisioned for the environment; empty means all.
    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// unit → integration → (system) → benchmark → coverage report.
    pub async fn testsuite(&self) -> PipelineResult {
        self.run_plan(&Stage::testsuite_plan(self.config.switches))
            .await
    }

    /// build → check → testsuite.
    pub async fn ci(&self) -> PipelineResult {
        self.run_plan(&Stage::ci_plan(self.config.switches)).await
    }

    /// Stages that run against the containerized environment.
    fn needs_environment(&self, stage: Stage) -> bool {
        match stage {
            Stage::IntegrationEnvironment => true,
            Stage::System => self.config.switches.use_environment,
            _ => false,
        }
    }

    /// Run `plan` in order. The environment is provisioned before the first
    /// stage needing it, kept up for the rest of the run, and always
    /// stopped at the end. A plan ending in a coverage report starts from
    /// an empty coverage directory.
    pub async fn run_plan(&self, plan: &[Stage]) -> PipelineResult {
        let start = Instant::now();
        let build_id = git::build_id(self.runner.as_ref(), &self.config.source_dir).await;
        let mut record = RunRecord::begin(plan, self.config.switches, build_id);
        let run_id = record.run_id.to_string();
        info!(run_id = %run_id, plan = ?plan, "starting pipeline");

        let mut results = Vec::new();
        let mut environment_touched = false;

        // the report must only merge profiles produced by this run
        if plan.contains(&Stage::CoverageReport) {
            if let Err(e) = clear_profiles(&self.config.coverage_path()) {
                warn!(error = %e, "stale coverage profiles not cleared");
            }
        }

        for &stage in plan {
            let span = obs::stage_span(&run_id, stage.name());

            if self.needs_environment(stage) && !environment_touched {
                environment_touched = true;
                if let Err(e) = self.provision_environment().instrument(span.clone()).await {
                    let result = StageResult::failed(stage, e.exit_code(), e.to_string(), 0);
                    obs::emit_stage_finished(stage.name(), result.exit_code, 0);
                    results.push(result);
                    break;
                }
            }

            let result = self.run_stage(stage).instrument(span).await;
            let passed = result.passed();
            results.push(result);
            if !passed {
                break;
            }
        }

        if environment_touched {
            let report = self.environment.stop().await;
            if !report.is_clean() {
                warn!(failures = report.failures().count(), "environment teardown incomplete");
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let result = PipelineResult::from_stages(run_id, plan.to_vec(), results, duration_ms);

        record.finish(&result.stages, result.success);
        match record.write(&self.config.build_path()) {
            Ok(path) => info!(path = %path.display(), "run record written"),
            Err(e) => warn!(error = %e, "run record not written"),
        }

        obs::emit_pipeline_finished(
            &result.run_id,
            result.stages.len(),
            result.success,
            duration_ms,
        );
        result
    }

    async fn provision_environment(&self) -> Result<()> {
        self.environment.build_image().await?;
        self.environment.start(&self.services).await?;
        Ok(())
    }

    /// Execute one stage, folding errors into a failed [`StageResult`].
    pub async fn run_stage(&self, stage: Stage) -> StageResult {
        obs::emit_stage_started(stage.name());
        let start = Instant::now();

        let mut result = match self.execute(stage).await {
            Ok(result) => result,
            Err(e) => {
                warn!(stage = %stage, error = %e, "stage aborted");
                StageResult::failed(stage, e.exit_code(), e.to_string(), 0)
            }
        };
        result.duration_ms = start.elapsed().as_millis() as u64;

        obs::emit_stage_finished(stage.name(), result.exit_code, result.duration_ms);
        result
    }

    async fn execute(&self, stage: Stage) -> Result<StageResult> {
        match stage {
            Stage::Build => {
                self.build.build().await?;
                Ok(StageResult::ok(stage, 0))
            }
            Stage::Check => {
                self.build.check().await?;
                Ok(StageResult::ok(stage, 0))
            }
            Stage::Unit => self.tier(stage, TestTier::Unit).await,
            Stage::Integration => self.tier(stage, TestTier::Integration).await,
            Stage::System => self.tier(stage, TestTier::System).await,
            Stage::Benchmark => self.tier(stage, TestTier::Benchmark).await,
            Stage::IntegrationEnvironment => {
                self.tiers.prepare()?;
                let outcome = self.bridge.run().await?;
                if outcome.success() {
                    Ok(StageResult::ok(stage, 0))
                } else {
                    let code = outcome.exit_code;
                    Ok(StageResult::failed(
                        stage,
                        code,
                        format!("remote integration tests exited with code {code}"),
                        0,
                    ))
                }
            }
            Stage::CoverageReport => {
                let report = self.coverage.report().await?;
                info!(
                    percent = report.summary.percent(),
                    html = %report.html_path.display(),
                    "coverage report ready"
                );
                Ok(StageResult::ok(stage, 0))
            }
        }
    }

    async fn tier(&self, stage: Stage, tier: TestTier) -> Result<StageResult> {
        let outcome = self.tiers.run_tier(tier).await?;
        Ok(StageResult::from_tier(stage, &outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_result_counts() {
        let result = PipelineResult::from_stages(
            "run123".to_string(),
            vec![Stage::Unit, Stage::Integration],
            vec![
                StageResult::ok(Stage::Unit, 100),
                StageResult::ok(Stage::Integration, 200),
            ],
            300,
        );

        assert_eq!(result.passed_count(), 2);
        assert_eq!(result.failed_count(), 0);
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.failed_stage, None);
    }

    #[test]
    fn test_pipeline_result_with_failures() {
        let result = PipelineResult::from_stages(
            "run123".to_string(),
            vec![Stage::Unit, Stage::Integration, Stage::Benchmark],
            vec![
                StageResult::ok(Stage::Unit, 100),
                StageResult::failed(Stage::Integration, 7, "FAIL", 200),
            ],
            300,
        );

        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert!(!result.success);
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.failed_stage, Some(Stage::Integration));
    }

    #[test]
    fn test_incomplete_run_is_not_success() {
        let result = PipelineResult::from_stages(
            "run123".to_string(),
            vec![Stage::Unit, Stage::Benchmark],
            vec![StageResult::ok(Stage::Unit, 1)],
            1,
        );
        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
    }
}
