//! Merging tier profiles into one unified profile.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::profile::{CoverageProfile, ProfileSource};
use crate::error::CoverageError;

/// File name of the unified profile; never treated as an input.
pub const MERGED_PROFILE: &str = "full.cov";

/// Merge profiles block by block.
///
/// Counts for a block present in several profiles are summed; blocks
/// present in only one are carried over. All inputs must share one mode.
pub fn merge(profiles: &[CoverageProfile]) -> Result<CoverageProfile, CoverageError> {
    let first = profiles.first().ok_or(CoverageError::EmptyMerge)?;

    let mut merged = CoverageProfile::new(first.mode, ProfileSource::Merged);
    for profile in profiles {
        if profile.mode != merged.mode {
            return Err(CoverageError::ModeMismatch {
                expected: merged.mode.to_string(),
                found: profile.mode.to_string(),
                origin: profile.label(),
            });
        }
        for (key, counts) in &profile.blocks {
            merged.add_block(key.clone(), counts.statements, counts.count);
        }
        debug!(profile = %profile.label(), blocks = profile.blocks.len(), "merged profile");
    }

    Ok(merged)
}

/// Paths of every `*.cov` in `dir` except the unified profile, sorted.
pub fn profile_paths(dir: &Path) -> Result<Vec<PathBuf>, CoverageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_cov = path.extension().map(|e| e == "cov").unwrap_or(false);
        let is_merged = path
            .file_name()
            .map(|n| n == MERGED_PROFILE)
            .unwrap_or(false);
        if path.is_file() && is_cov && !is_merged {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Delete every `*.cov` in `dir`, the unified profile included.
///
/// Returns the removed paths. A missing directory is already clear.
pub fn clear_profiles(dir: &Path) -> Result<Vec<PathBuf>, CoverageError> {
    let mut removed = profile_paths(dir)?;
    let merged = dir.join(MERGED_PROFILE);
    if merged.is_file() {
        removed.push(merged);
    }
    for path in &removed {
        std::fs::remove_file(path)?;
    }
    if !removed.is_empty() {
        debug!(dir = %dir.display(), count = removed.len(), "cleared coverage profiles");
    }
    Ok(removed)
}

/// Load every tier profile in `dir`. Fails when there are none.
pub fn collect(dir: &Path) -> Result<Vec<CoverageProfile>, CoverageError> {
    let paths = profile_paths(dir)?;
    if paths.is_empty() {
        return Err(CoverageError::NoProfiles {
            dir: dir.to_path_buf(),
        });
    }

    let profiles = paths
        .iter()
        .map(|p| CoverageProfile::load(p))
        .collect::<Result<Vec<_>, _>>()?;
    info!(dir = %dir.display(), count = profiles.len(), "collected coverage profiles");
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::profile::{BlockKey, CoverageMode};
    use crate::tier::TestTier;
    use tempfile::tempdir;

    fn key(name: &str) -> BlockKey {
        BlockKey::new(format!("pkg/{name}.go"), 1, 1, 2, 1)
    }

    fn profile(tier: TestTier, blocks: &[(&str, u64)]) -> CoverageProfile {
        let mut p = CoverageProfile::new(CoverageMode::Atomic, ProfileSource::Tier(tier));
        for (name, count) in blocks {
            p.add_block(key(name), 1, *count);
        }
        p
    }

    #[test]
    fn test_merge_sums_overlap_and_unions_disjoint() {
        let unit = profile(TestTier::Unit, &[("A", 2), ("B", 1)]);
        let integration = profile(TestTier::Integration, &[("A", 1), ("C", 3)]);

        let merged = merge(&[unit, integration]).unwrap();
        assert_eq!(merged.source, ProfileSource::Merged);
        assert_eq!(merged.blocks.len(), 3);
        assert_eq!(merged.count(&key("A")), Some(3));
        assert_eq!(merged.count(&key("B")), Some(1));
        assert_eq!(merged.count(&key("C")), Some(3));
    }

    #[test]
    fn test_merge_of_nothing_fails() {
        assert!(matches!(merge(&[]), Err(CoverageError::EmptyMerge)));
    }

    #[test]
    fn test_merge_rejects_mixed_modes() {
        let a = profile(TestTier::Unit, &[("A", 1)]);
        let mut b = profile(TestTier::System, &[("A", 1)]);
        b.mode = CoverageMode::Set;
        let err = merge(&[a, b]).unwrap_err();
        assert!(matches!(err, CoverageError::ModeMismatch { .. }));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = profile(TestTier::Unit, &[("A", 2), ("B", 1)]);
        let b = profile(TestTier::Integration, &[("A", 1), ("C", 3)]);
        let ab = merge(&[a.clone(), b.clone()]).unwrap();
        let ba = merge(&[b, a]).unwrap();
        assert_eq!(ab.to_profile_text(), ba.to_profile_text());
    }

    #[test]
    fn test_collect_skips_merged_profile_and_other_files() {
        let dir = tempdir().unwrap();
        let unit = "mode: atomic\na.go:1.1,2.1 1 1\n";
        let full = "mode: atomic\na.go:1.1,2.1 1 99\n";
        std::fs::write(dir.path().join("unit.cov"), unit).unwrap();
        std::fs::write(dir.path().join("full.cov"), full).unwrap();
        std::fs::write(dir.path().join("full.html"), "<html/>").unwrap();

        let profiles = collect(dir.path()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].source, ProfileSource::Tier(TestTier::Unit));
    }

    #[test]
    fn test_clear_profiles_removes_only_cover_profiles() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("system.cov"), "mode: atomic\n").unwrap();
        std::fs::write(dir.path().join("full.cov"), "mode: atomic\n").unwrap();
        std::fs::write(dir.path().join("full.html"), "<html/>").unwrap();

        let removed = clear_profiles(dir.path()).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!dir.path().join("system.cov").exists());
        assert!(!dir.path().join("full.cov").exists());
        assert!(dir.path().join("full.html").exists());

        assert!(clear_profiles(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_collect_empty_dir_fails() {
        let dir = tempdir().unwrap();
        let err = collect(dir.path()).unwrap_err();
        assert!(matches!(err, CoverageError::NoProfiles { .. }));

        let missing = dir.path().join("nope");
        assert!(matches!(
            collect(&missing),
            Err(CoverageError::NoProfiles { .. })
        ));
    }
}
