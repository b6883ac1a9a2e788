//! Git integration for stamping runs with the source revision.

use std::path::Path;

use crate::error::{CoreError, Result};
use crate::exec::{CommandRunner, CommandSpec};

/// Capture the HEAD commit SHA of the repository containing `repo_dir`.
///
/// Runs `git rev-parse HEAD`. Errors when git is unavailable, the
/// directory is not a work tree, or the output is empty.
pub async fn capture_head_sha(runner: &dyn CommandRunner, repo_dir: &Path) -> Result<String> {
    let spec = CommandSpec::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir);
    let output = runner
        .run(&spec)
        .await
        .map_err(|e| CoreError::GitError(format!("failed to run git: {e}")))?;

    if !output.success() {
        return Err(CoreError::GitError(format!(
            "git rev-parse HEAD failed: {}",
            output.diagnostic()
        )));
    }

    let sha = output.stdout.trim().to_string();
    if sha.is_empty() {
        return Err(CoreError::GitError(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }

    Ok(sha)
}

/// Build identifier for a run: the HEAD SHA, or `None` outside a work tree.
pub async fn build_id(runner: &dyn CommandRunner, repo_dir: &Path) -> Option<String> {
    capture_head_sha(runner, repo_dir).await.ok()
}
