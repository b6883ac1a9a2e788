//! Pipeline configuration, captured once per invocation.
//!
//! The CLI assembles a [`PipelineConfig`] from flags and environment
//! variables and injects it into every component. Nothing re-reads the
//! process environment afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default per-run timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 90;

/// Default cross-compile operating systems.
pub const DEFAULT_CROSS_OS: &[&str] = &[
    "linux", "darwin", "windows", "solaris", "freebsd", "netbsd", "openbsd",
];

/// Default cross-compile architectures.
pub const DEFAULT_CROSS_ARCH: &[&str] = &["amd64", "386"];

/// The two run-time switches that shape a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSwitches {
    /// Run the integration tier inside the containerized environment.
    pub use_environment: bool,

    /// Include the system tier.
    pub run_system_tests: bool,
}

/// External system-test harness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemHarnessConfig {
    /// Directory holding the harness's test scenarios.
    pub tests_dir: PathBuf,

    /// Requirement files installed into the isolated Python environment.
    pub requirements: Vec<PathBuf>,

    /// Isolated Python environment directory.
    pub python_env: PathBuf,

    /// Where the harness leaves its native coverage output.
    pub run_dir: PathBuf,

    /// Script converting the harness's coverage into a cover profile.
    pub converter_script: PathBuf,

    /// Python interpreter used to run the converter.
    pub python: String,
}

impl SystemHarnessConfig {
    fn with_build_dir(build_dir: &Path) -> Self {
        Self {
            tests_dir: PathBuf::from("tests/system"),
            requirements: vec![PathBuf::from("tests/system/requirements.txt")],
            python_env: build_dir.join("python-env"),
            run_dir: build_dir.join("system-tests").join("run"),
            converter_script: PathBuf::from("dev-tools/aggregate_coverage.py"),
            python: "python".to_string(),
        }
    }
}

/// Everything a run needs to know about the target unit and its layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the target unit (binary name, container name filter).
    pub unit_name: String,

    /// Repository import path of the target unit.
    pub import_path: String,

    /// Package patterns handed to the toolchain.
    pub packages: Vec<String>,

    /// Root of the target unit's source tree; commands run here.
    pub source_dir: PathBuf,

    /// Build output directory, relative to `source_dir`.
    pub build_dir: PathBuf,

    /// Coverage output directory, relative to `source_dir`.
    pub coverage_dir: PathBuf,

    /// Per-run timeout in seconds.
    pub timeout_secs: u64,

    /// Enable race detection for the quick `unit` run.
    pub race_detector: bool,

    /// Cross-compile OS list.
    pub cross_os: Vec<String>,

    /// Cross-compile architecture list.
    pub cross_arch: Vec<String>,

    /// System harness settings.
    pub system: SystemHarnessConfig,

    /// Run-shaping switches.
    pub switches: PipelineSwitches,
}

impl PipelineConfig {
    /// Defaults for a unit named `unit_name` rooted at `source_dir`.
    pub fn new(unit_name: impl Into<String>, source_dir: impl Into<PathBuf>) -> Self {
        let unit_name = unit_name.into();
        let build_dir = PathBuf::from("build");
        Self {
            import_path: format!("github.com/elastic/beats/{unit_name}"),
            unit_name,
            packages: vec!["./...".to_string()],
            source_dir: source_dir.into(),
            coverage_dir: build_dir.join("coverage"),
            system: SystemHarnessConfig::with_build_dir(&build_dir),
            build_dir,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            race_detector: false,
            cross_os: DEFAULT_CROSS_OS.iter().map(|s| s.to_string()).collect(),
            cross_arch: DEFAULT_CROSS_ARCH.iter().map(|s| s.to_string()).collect(),
            switches: PipelineSwitches::default(),
        }
    }

    /// Reject configurations no stage could run with.
    pub fn validate(&self) -> Result<()> {
        if self.unit_name.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "target unit name must not be empty".to_string(),
            ));
        }
        if self.packages.is_empty() {
            return Err(CoreError::InvalidConfig(
                "at least one package pattern is required".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a path relative to the source tree.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source_dir.join(path)
        }
    }

    pub fn build_path(&self) -> PathBuf {
        self.resolve(&self.build_dir)
    }

    pub fn coverage_path(&self) -> PathBuf {
        self.resolve(&self.coverage_dir)
    }

    /// `<build>/bin`, where cross-compiled artifacts land.
    pub fn bin_path(&self) -> PathBuf {
        self.build_path().join("bin")
    }

    /// Path of the coverage-instrumented test binary.
    pub fn test_binary_path(&self) -> PathBuf {
        self.resolve(format!("{}.test", self.unit_name))
    }

    /// Packages joined with commas, as `-coverpkg` expects.
    pub fn packages_comma_separated(&self) -> String {
        self.packages.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new("packetbeat", "/src/packetbeat");
        assert_eq!(config.import_path, "github.com/elastic/beats/packetbeat");
        assert_eq!(config.timeout_secs, 90);
        assert_eq!(config.cross_os.len(), 7);
        assert!(!config.switches.use_environment);
        assert!(!config.switches.run_system_tests);
        assert_eq!(
            config.coverage_path(),
            PathBuf::from("/src/packetbeat/build/coverage")
        );
        assert_eq!(
            config.system.python_env,
            PathBuf::from("build/python-env")
        );
        config.validate().expect("defaults should be valid");
    }

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        let config = PipelineConfig::new("beat", "/src");
        assert_eq!(config.resolve("/tmp/cov"), PathBuf::from("/tmp/cov"));
        assert_eq!(config.resolve("build"), PathBuf::from("/src/build"));
        assert_eq!(config.test_binary_path(), PathBuf::from("/src/beat.test"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::new("", ".");
        assert!(config.validate().is_err());

        config.unit_name = "beat".to_string();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());

        config.timeout_secs = 10;
        config.packages.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_coverpkg_list() {
        let mut config = PipelineConfig::new("beat", ".");
        config.packages = vec!["./a/...".to_string(), "./b/...".to_string()];
        assert_eq!(config.packages_comma_separated(), "./a/...,./b/...");
    }
}
