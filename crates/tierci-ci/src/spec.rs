//! Run identity and the persisted run record.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tierci_core::PipelineSwitches;
use uuid::Uuid;

use crate::error::Result;
use crate::runner::StageResult;
use crate::stage::Stage;

/// File name of the run record inside the build directory.
pub const RUN_RECORD_FILE: &str = "pipeline-run.json";

/// Everything needed to identify and audit one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// HEAD commit of the source tree, when it is a git work tree.
    pub build_id: Option<String>,

    /// Switches the run was planned with.
    pub switches: PipelineSwitches,

    /// Ordered stage plan.
    pub plan: Vec<Stage>,

    /// SHA-256 digest of the ordered stage names (deterministic).
    pub plan_digest: String,

    /// Results of the stages that executed.
    pub stages: Vec<StageResult>,

    pub success: Option<bool>,
}

impl RunRecord {
    pub fn begin(plan: &[Stage], switches: PipelineSwitches, build_id: Option<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            build_id,
            switches,
            plan: plan.to_vec(),
            plan_digest: compute_plan_digest(plan),
            stages: Vec::new(),
            success: None,
        }
    }

    pub fn finish(&mut self, stages: &[StageResult], success: bool) {
        self.stages = stages.to_vec();
        self.success = Some(success);
        self.finished_at = Some(Utc::now());
    }

    pub fn path_in(build_dir: &Path) -> PathBuf {
        build_dir.join(RUN_RECORD_FILE)
    }

    /// Write as pretty JSON, creating the build directory if needed.
    pub fn write(&self, build_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(build_dir)?;
        let path = Self::path_in(build_dir);
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }
}

/// Compute deterministic digest of ordered stage names.
pub fn compute_plan_digest(plan: &[Stage]) -> String {
    let mut hasher = Sha256::new();
    for stage in plan {
        hasher.update(stage.name().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_plan_digest_order_sensitive() {
        let a = compute_plan_digest(&[Stage::Unit, Stage::Integration]);
        let b = compute_plan_digest(&[Stage::Integration, Stage::Unit]);
        assert_ne!(a, b);
        assert_eq!(a, compute_plan_digest(&[Stage::Unit, Stage::Integration]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_record_written_and_loaded() {
        let dir = tempdir().unwrap();
        let plan = [Stage::Unit, Stage::Benchmark];
        let commit = Some("abc123".to_string());
        let mut record = RunRecord::begin(&plan, PipelineSwitches::default(), commit);
        record.finish(&[StageResult::ok(Stage::Unit, 10)], false);

        let path = record.write(&dir.path().join("build")).unwrap();
        assert!(path.ends_with(RUN_RECORD_FILE));
        let loaded = RunRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.success, Some(false));
        assert_eq!(loaded.build_id.as_deref(), Some("abc123"));
    }
}
