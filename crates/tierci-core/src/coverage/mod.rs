//! Coverage Aggregator
//!
//! Tier runs each leave one cover profile in the coverage directory.
//! This module merges them (summing counts on overlapping blocks) into a
//! unified `full.cov` and renders a report from it.

pub mod aggregate;
pub mod profile;
pub mod report;

pub use aggregate::{clear_profiles, collect, merge, profile_paths, MERGED_PROFILE};
pub use profile::{BlockCounts, BlockKey, CoverageMode, CoverageProfile, ProfileSource};
pub use report::{CoverageAggregator, CoverageReport, CoverageSummary, FileCoverage, HTML_REPORT};
