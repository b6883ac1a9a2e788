//! Pipeline stages and the fixed order they run in.

use serde::{Deserialize, Serialize};
use tierci_core::{PipelineSwitches, TestTier};

/// One step of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Host build of the target unit
    Build,

    /// Formatting and static analysis
    Check,

    Unit,

    /// Integration tier on the host
    Integration,

    /// Integration tier inside the containerized environment
    IntegrationEnvironment,

    System,

    /// Inert placeholder
    Benchmark,

    /// Merge every tier profile and render the report
    CoverageReport,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Check => "check",
            Stage::Unit => "unit",
            Stage::Integration => "integration",
            Stage::IntegrationEnvironment => "integration_environment",
            Stage::System => "system",
            Stage::Benchmark => "benchmark",
            Stage::CoverageReport => "coverage_report",
        }
    }

    /// The test tier this stage executes, if any.
    pub fn tier(&self) -> Option<TestTier> {
        match self {
            Stage::Unit => Some(TestTier::Unit),
            Stage::Integration | Stage::IntegrationEnvironment => Some(TestTier::Integration),
            Stage::System => Some(TestTier::System),
            Stage::Benchmark => Some(TestTier::Benchmark),
            _ => None,
        }
    }

    /// unit → integration (containerized when the environment switch is
    /// set) → system (when enabled) → benchmark → coverage report.
    pub fn testsuite_plan(switches: PipelineSwitches) -> Vec<Stage> {
        let mut plan = vec![Stage::Unit];
        plan.push(if switches.use_environment {
            Stage::IntegrationEnvironment
        } else {
            Stage::Integration
        });
        if switches.run_system_tests {
            plan.push(Stage::System);
        }
        plan.push(Stage::Benchmark);
        plan.push(Stage::CoverageReport);
        plan
    }

    /// build → check → testsuite.
    pub fn ci_plan(switches: PipelineSwitches) -> Vec<Stage> {
        let mut plan = vec![Stage::Build, Stage::Check];
        plan.extend(Self::testsuite_plan(switches));
        plan
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
