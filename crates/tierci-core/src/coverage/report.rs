//! Rendering a unified profile into reports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::aggregate::{self, MERGED_PROFILE};
use super::profile::CoverageProfile;
use crate::error::CoverageError;
use crate::exec::{CommandRunner, CommandSpec};

/// File name of the rendered HTML report.
pub const HTML_REPORT: &str = "full.html";

/// Statement coverage for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub statements: u64,
    pub covered: u64,
}

impl FileCoverage {
    pub fn percent(&self) -> f64 {
        if self.statements == 0 {
            0.0
        } else {
            self.covered as f64 * 100.0 / self.statements as f64
        }
    }
}

/// Per-file and total statement coverage of a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub files: BTreeMap<String, FileCoverage>,
    pub total: FileCoverage,
}

impl CoverageSummary {
    pub fn from_profile(profile: &CoverageProfile) -> Self {
        let mut summary = CoverageSummary::default();
        for (key, counts) in &profile.blocks {
            let statements = counts.statements as u64;
            let covered = if counts.count > 0 { statements } else { 0 };

            let file = summary.files.entry(key.file.clone()).or_default();
            file.statements += statements;
            file.covered += covered;
            summary.total.statements += statements;
            summary.total.covered += covered;
        }
        summary
    }

    pub fn percent(&self) -> f64 {
        self.total.percent()
    }
}

/// Everything `coverage-report` produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Unified profile.
    pub merged_path: PathBuf,
    /// Rendered browsable report.
    pub html_path: PathBuf,
    pub summary: CoverageSummary,
}

/// Collects, merges and renders coverage for one coverage directory.
pub struct CoverageAggregator {
    runner: Arc<dyn CommandRunner>,
    coverage_dir: PathBuf,
    work_dir: PathBuf,
}

impl CoverageAggregator {
    pub fn new(runner: Arc<dyn CommandRunner>, coverage_dir: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            runner,
            coverage_dir,
            work_dir,
        }
    }

    pub fn coverage_dir(&self) -> &Path {
        &self.coverage_dir
    }

    /// Write the unified profile and render it. Input profiles are untouched.
    pub async fn render(&self, profile: &CoverageProfile) -> Result<CoverageReport, CoverageError> {
        let merged_path = self.coverage_dir.join(MERGED_PROFILE);
        let html_path = self.coverage_dir.join(HTML_REPORT);
        profile.write(&merged_path)?;

        let spec = CommandSpec::new("go")
            .args(["tool", "cover"])
            .arg(format!("-html={}", merged_path.display()))
            .arg("-o")
            .arg(html_path.display().to_string())
            .current_dir(&self.work_dir);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(CoverageError::Render {
                exit_code: output.exit_code,
                stderr: output.diagnostic(),
            });
        }

        let summary = CoverageSummary::from_profile(profile);
        info!(
            event = "coverage.rendered",
            html = %html_path.display(),
            percent = summary.percent(),
            "coverage report written"
        );

        Ok(CoverageReport {
            merged_path,
            html_path,
            summary,
        })
    }

    /// Collect every tier profile, merge, and render.
    pub async fn report(&self) -> Result<CoverageReport, CoverageError> {
        let profiles = aggregate::collect(&self.coverage_dir)?;
        let merged = aggregate::merge(&profiles)?;
        self.render(&merged).await
    }
}
