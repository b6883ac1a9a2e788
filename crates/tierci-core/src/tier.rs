//! Test tiers and their instrumentation policy.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::coverage::CoverageMode;

/// The fixed set of test tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TestTier {
    Unit,
    Integration,
    System,
    Benchmark,
}

impl TestTier {
    pub const ALL: [TestTier; 4] = [
        TestTier::Unit,
        TestTier::Integration,
        TestTier::System,
        TestTier::Benchmark,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TestTier::Unit => "unit",
            TestTier::Integration => "integration",
            TestTier::System => "system",
            TestTier::Benchmark => "benchmark",
        }
    }

    /// Build tags selecting this tier's tests.
    pub fn build_tags(&self) -> &'static [&'static str] {
        match self {
            TestTier::Integration => &["integration"],
            _ => &[],
        }
    }

    /// Race detection is too slow for routine unit runs.
    pub fn race_detection(&self) -> bool {
        matches!(self, TestTier::Integration | TestTier::System)
    }

    /// File name of this tier's coverage profile.
    pub fn profile_file_name(&self) -> String {
        format!("{}.cov", self.name())
    }
}

impl std::fmt::Display for TestTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TestTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestTier::ALL
            .into_iter()
            .find(|t| t.name() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown test tier: {s}"))
    }
}

/// Resolved instrumentation for one tier run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    pub tier: TestTier,

    /// Build-tag filter.
    pub tags: Vec<String>,

    /// Race detector enabled.
    pub race: bool,

    /// Always atomic; see [`CoverageMode::Atomic`].
    pub coverage_mode: CoverageMode,

    /// Per-run timeout in seconds.
    pub timeout_secs: u64,

    /// Where this tier writes its coverage profile.
    pub profile_path: PathBuf,
}

impl TierSpec {
    pub fn for_tier(tier: TestTier, config: &PipelineConfig) -> Self {
        Self {
            tier,
            tags: tier.build_tags().iter().map(|t| t.to_string()).collect(),
            race: tier.race_detection(),
            coverage_mode: CoverageMode::Atomic,
            timeout_secs: config.timeout_secs,
            profile_path: config.coverage_path().join(tier.profile_file_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_names_round_trip_from_str() {
        for tier in TestTier::ALL {
            assert_eq!(tier.name().parse::<TestTier>().unwrap(), tier);
        }
        assert!("smoke".parse::<TestTier>().is_err());
    }

    #[test]
    fn test_race_only_for_integration_and_system() {
        assert!(!TestTier::Unit.race_detection());
        assert!(TestTier::Integration.race_detection());
        assert!(TestTier::System.race_detection());
        assert!(!TestTier::Benchmark.race_detection());
    }

    #[test]
    fn test_tier_spec_profile_path() {
        let config = PipelineConfig::new("beat", "/src");
        let spec = TierSpec::for_tier(TestTier::Integration, &config);
        assert_eq!(spec.tags, vec!["integration"]);
        assert!(spec.race);
        assert_eq!(spec.coverage_mode, CoverageMode::Atomic);
        assert_eq!(spec.timeout_secs, 90);
        assert_eq!(
            spec.profile_path,
            PathBuf::from("/src/build/coverage/integration.cov")
        );

        let unit = TierSpec::for_tier(TestTier::Unit, &config);
        assert!(unit.tags.is_empty());
        assert!(!unit.race);
    }
}
