//! Cover-profile parsing and serialisation.
//!
//! Format (one header, then one line per block):
//!
//! ```text
//! mode: atomic
//! github.com/org/unit/pkg/file.go:12.34,15.2 3 7
//! ```
//!
//! A block is `file:startLine.startCol,endLine.endCol`, followed by its
//! statement count and execution count.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoverageError;
use crate::tier::TestTier;

/// Counter collection mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    Set,
    Count,
    /// Safe under concurrent execution; the only mode tiers produce.
    Atomic,
}

impl CoverageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageMode::Set => "set",
            CoverageMode::Count => "count",
            CoverageMode::Atomic => "atomic",
        }
    }
}

impl std::fmt::Display for CoverageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoverageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "set" => Ok(CoverageMode::Set),
            "count" => Ok(CoverageMode::Count),
            "atomic" => Ok(CoverageMode::Atomic),
            other => Err(format!("unknown coverage mode: {other}")),
        }
    }
}

/// Source file and position range of one block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    pub file: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl BlockKey {
    pub fn new(
        file: impl Into<String>,
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    ) -> Self {
        Self {
            file: file.into(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }
}

impl std::fmt::Display for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}.{},{}.{}",
            self.file, self.start_line, self.start_col, self.end_line, self.end_col
        )
    }
}

/// Statement and execution counts of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCounts {
    pub statements: u32,
    pub count: u64,
}

/// Which run produced a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    Tier(TestTier),
    /// Derived by merging other profiles.
    Merged,
    /// Loaded from a file not named after a tier.
    External,
}

impl ProfileSource {
    /// Infer the source from a profile's file stem (`unit.cov` -> unit).
    pub fn from_path(path: &Path) -> Self {
        path.file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<TestTier>().ok())
            .map(ProfileSource::Tier)
            .unwrap_or(ProfileSource::External)
    }
}

/// Per-block coverage counts collected under one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageProfile {
    pub mode: CoverageMode,
    pub source: ProfileSource,
    /// File the profile was read from, if any.
    pub origin: Option<PathBuf>,
    pub blocks: BTreeMap<BlockKey, BlockCounts>,
}

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+):(\d+)\.(\d+),(\d+)\.(\d+) (\d+) (\d+)$").expect("valid cover line regex")
    })
}

impl CoverageProfile {
    pub fn new(mode: CoverageMode, source: ProfileSource) -> Self {
        Self {
            mode,
            source,
            origin: None,
            blocks: BTreeMap::new(),
        }
    }

    /// Record a block; counts for an existing block are summed.
    pub fn add_block(&mut self, key: BlockKey, statements: u32, count: u64) {
        self.blocks
            .entry(key)
            .and_modify(|c| c.count += count)
            .or_insert(BlockCounts { statements, count });
    }

    /// Execution count of a block, if present.
    pub fn count(&self, key: &BlockKey) -> Option<u64> {
        self.blocks.get(key).map(|c| c.count)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Display label used in diagnostics.
    pub fn label(&self) -> String {
        match &self.origin {
            Some(path) => path.display().to_string(),
            None => match self.source {
                ProfileSource::Tier(t) => format!("<{t} profile>"),
                ProfileSource::Merged => "<merged profile>".to_string(),
                ProfileSource::External => "<profile>".to_string(),
            },
        }
    }

    /// Parse cover-profile text. `origin` is only used for error messages.
    pub fn parse(text: &str, origin: &Path, source: ProfileSource) -> Result<Self, CoverageError> {
        let parse_err = |line: usize, reason: String| CoverageError::Parse {
            path: origin.to_path_buf(),
            line,
            reason,
        };

        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());
        let (_, header) = lines
            .next()
            .ok_or_else(|| parse_err(1, "missing mode header".to_string()))?;
        let bad_header = || parse_err(1, format!("expected `mode:` header, got `{header}`"));
        let mode = header
            .trim()
            .strip_prefix("mode:")
            .ok_or_else(bad_header)?
            .parse::<CoverageMode>()
            .map_err(|e| parse_err(1, e))?;

        let mut profile = CoverageProfile::new(mode, source);
        profile.origin = Some(origin.to_path_buf());

        for (idx, line) in lines {
            let caps = line_pattern()
                .captures(line.trim())
                .ok_or_else(|| parse_err(idx + 1, format!("malformed block `{line}`")))?;
            let small = |i: usize| -> Result<u32, CoverageError> {
                caps[i]
                    .parse::<u32>()
                    .map_err(|e| parse_err(idx + 1, format!("`{}`: {e}", &caps[i])))
            };
            let hits = caps[7]
                .parse::<u64>()
                .map_err(|e| parse_err(idx + 1, format!("`{}`: {e}", &caps[7])))?;
            let key = BlockKey::new(&caps[1], small(2)?, small(3)?, small(4)?, small(5)?);
            profile.add_block(key, small(6)?, hits);
        }

        Ok(profile)
    }

    /// Read and parse a profile file, inferring its source from the name.
    pub fn load(path: &Path) -> Result<Self, CoverageError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path, ProfileSource::from_path(path))
    }

    /// Serialise back to cover-profile text, blocks in sorted order.
    pub fn to_profile_text(&self) -> String {
        let mut out = format!("mode: {}\n", self.mode);
        for (key, counts) in &self.blocks {
            out.push_str(&format!("{} {} {}\n", key, counts.statements, counts.count));
        }
        out
    }

    /// Write the profile to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<(), CoverageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_profile_text())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "mode: atomic\n\
        github.com/x/beat/main.go:10.2,12.16 2 1\n\
        github.com/x/beat/main.go:14.2,14.10 1 0\n\
        github.com/x/beat/util/u.go:3.1,4.2 1 5\n";

    #[test]
    fn test_parse_sample() {
        let source = ProfileSource::Tier(TestTier::Unit);
        let profile = CoverageProfile::parse(SAMPLE, Path::new("unit.cov"), source).unwrap();
        assert_eq!(profile.mode, CoverageMode::Atomic);
        assert_eq!(profile.blocks.len(), 3);
        let key = BlockKey::new("github.com/x/beat/util/u.go", 3, 1, 4, 2);
        assert_eq!(profile.count(&key), Some(5));
    }

    #[test]
    fn test_duplicate_blocks_in_one_file_are_summed() {
        let text = "mode: atomic\na.go:1.1,2.2 1 2\na.go:1.1,2.2 1 3\n";
        let profile =
            CoverageProfile::parse(text, Path::new("x.cov"), ProfileSource::External).unwrap();
        assert_eq!(profile.count(&BlockKey::new("a.go", 1, 1, 2, 2)), Some(5));
    }

    #[test]
    fn test_windows_style_path_with_colon() {
        let text = "mode: count\nC:/src/a.go:1.1,2.2 1 1\n";
        let profile =
            CoverageProfile::parse(text, Path::new("x.cov"), ProfileSource::External).unwrap();
        assert!(profile.blocks.keys().any(|k| k.file == "C:/src/a.go"));
    }

    #[test]
    fn test_missing_header_is_error() {
        let err = CoverageProfile::parse(
            "a.go:1.1,2.2 1 1\n",
            Path::new("bad.cov"),
            ProfileSource::External,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mode:"));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let err = CoverageProfile::parse(
            "mode: set\na.go:1.1,2.2 1 1\ngarbage\n",
            Path::new("bad.cov"),
            ProfileSource::External,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad.cov:3"));
    }

    #[test]
    fn test_oversized_statement_count_is_rejected() {
        let err = CoverageProfile::parse(
            "mode: atomic\na.go:1.1,2.2 4294967296 1\n",
            Path::new("big.cov"),
            ProfileSource::External,
        )
        .unwrap_err();
        assert!(err.to_string().contains("big.cov:2"), "{err}");
        assert!(err.to_string().contains("4294967296"), "{err}");

        let profile = CoverageProfile::parse(
            "mode: atomic\na.go:1.1,2.2 1 4294967296\n",
            Path::new("hits.cov"),
            ProfileSource::External,
        )
        .unwrap();
        assert_eq!(profile.blocks.values().next().unwrap().count, 4_294_967_296);
    }

    #[test]
    fn test_text_output_is_sorted() {
        let mut profile = CoverageProfile::new(CoverageMode::Atomic, ProfileSource::Merged);
        profile.add_block(BlockKey::new("b.go", 1, 1, 1, 5), 1, 1);
        profile.add_block(BlockKey::new("a.go", 9, 1, 9, 5), 2, 0);
        assert_eq!(
            profile.to_profile_text(),
            "mode: atomic\na.go:9.1,9.5 2 0\nb.go:1.1,1.5 1 1\n"
        );
    }

    #[test]
    fn test_source_from_path() {
        assert_eq!(
            ProfileSource::from_path(Path::new("/c/integration.cov")),
            ProfileSource::Tier(TestTier::Integration)
        );
        assert_eq!(
            ProfileSource::from_path(Path::new("/c/extra.cov")),
            ProfileSource::External
        );
    }
}
