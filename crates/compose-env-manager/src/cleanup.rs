//! Best-effort teardown bookkeeping.
//!
//! Every teardown step yields a [`CleanupOutcome`]; a failed step is logged
//! and recorded, never escalated.

use serde::{Deserialize, Serialize};
use tierci_core::exec::CommandOutput;
use tierci_core::{obs, ExecError};

/// Result of one cleanup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// The step removed or stopped something.
    Removed,
    /// Nothing was there to clean up.
    Absent,
    /// The step failed; the reason is kept for diagnosis.
    Failed { reason: String },
}

impl CleanupOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CleanupOutcome::Failed { .. })
    }

    /// Classify a finished command.
    pub fn from_output(output: &CommandOutput) -> Self {
        if output.success() {
            CleanupOutcome::Removed
        } else if is_absent(&output.stderr) {
            CleanupOutcome::Absent
        } else {
            CleanupOutcome::Failed {
                reason: output.diagnostic(),
            }
        }
    }

    /// Classify a command run, including spawn failures.
    pub fn from_result(result: &Result<CommandOutput, ExecError>) -> Self {
        match result {
            Ok(output) => Self::from_output(output),
            Err(e) => CleanupOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

const ABSENT_MARKERS: &[&str] = &[
    "no such",
    "not found",
    "no container",
    "no resource",
    "is not running",
];

/// Container runtimes report "already gone" through stderr text.
fn is_absent(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    ABSENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// One step of a teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStep {
    pub step: String,
    #[serde(flatten)]
    pub outcome: CleanupOutcome,
}

/// Ordered outcomes of a full teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub steps: Vec<CleanupStep>,
}

impl CleanupReport {
    /// Record a step, logging it at `warn` when it failed.
    pub fn record(&mut self, step: impl Into<String>, outcome: CleanupOutcome) {
        let step = step.into();
        if let CleanupOutcome::Failed { reason } = &outcome {
            obs::emit_cleanup_failed(&step, reason);
        }
        self.steps.push(CleanupStep { step, outcome });
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanupStep> {
        self.steps.iter().filter(|s| s.outcome.is_failed())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Number of steps that actually removed something.
    pub fn removed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == CleanupOutcome::Removed)
            .count()
    }
}
