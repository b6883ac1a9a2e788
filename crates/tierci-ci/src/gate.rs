//! Pass/fail verdict for a finished pipeline.

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineResult;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Pipeline gate rules.
pub struct PipelineGate;

impl PipelineGate {
    /// Every planned stage must have run and exited zero.
    pub fn evaluate(result: &PipelineResult) -> GateVerdict {
        let mut violations = Vec::new();

        for stage in &result.stages {
            if !stage.passed() {
                let mut violation = format!(
                    "stage '{}' exited with code {}",
                    stage.stage, stage.exit_code
                );
                if let Some(detail) = &stage.detail {
                    violation.push_str(": ");
                    violation.push_str(detail);
                }
                violations.push(violation);
            }
        }

        for planned in &result.plan {
            if !result.stages.iter().any(|s| s.stage == *planned) {
                violations.push(format!("stage '{planned}' did not run"));
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All stages passed".to_string()
        } else {
            match &result.failed_stage {
                Some(stage) => format!(
                    "Pipeline failed at stage '{stage}' with {} violation(s)",
                    violations.len()
                ),
                None => format!("Gate failed with {} violation(s)", violations.len()),
            }
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
