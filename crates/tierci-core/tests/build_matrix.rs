//! Build orchestrator behaviour against a scripted toolchain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::tempdir;
use tierci_core::fakes::{Reply, ScriptedRunner};
use tierci_core::{BuildOrchestrator, CommandSpec, CrossTarget, PipelineConfig, TargetStatus};

/// Write an empty file at the `-o` path of a compile command.
fn touch_output(spec: &CommandSpec) {
    if let Some(idx) = spec.args.iter().position(|a| a == "-o") {
        let path = PathBuf::from(&spec.args[idx + 1]);
        std::fs::write(path, b"binary").unwrap();
    }
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.insert(path.clone(), std::fs::read(&path).unwrap());
            }
        }
    }
    files
}

#[tokio::test]
async fn partial_matrix_still_produces_other_artifacts() {
    let dir = tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .on_with(&["go", "build"], Reply::ok(""), touch_output)
            .on_contains("beat-darwin-amd64", Reply::fail(2, "cgo: unsupported")),
    );
    let orchestrator =
        BuildOrchestrator::new(runner.clone(), PipelineConfig::new("beat", dir.path()));

    let targets = vec![
        CrossTarget::new("linux", "amd64"),
        CrossTarget::new("darwin", "amd64"),
        CrossTarget::new("windows", "386"),
    ];
    let report = orchestrator.crosscompile(&targets).await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.failed().len(), 1);
    assert_eq!(
        report.failed()[0].target,
        CrossTarget::new("darwin", "amd64")
    );
    assert!(matches!(
        report.failed()[0].status,
        TargetStatus::Failed { exit_code: 2, .. }
    ));

    let bin = dir.path().join("build/bin");
    assert!(bin.join("beat-linux-amd64").is_file());
    assert!(bin.join("beat-windows-386.exe").is_file());
    assert!(!bin.join("beat-darwin-amd64").exists());

    // every target was attempted, with its own GOOS/GOARCH
    let calls = runner.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls[2].env.get("GOOS").map(String::as_str),
        Some("windows")
    );
    assert_eq!(calls[2].env.get("GOARCH").map(String::as_str), Some("386"));
}

#[tokio::test]
async fn spawn_failure_for_one_target_is_recorded_and_matrix_continues() {
    let dir = tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .on_with(&["go", "build"], Reply::ok(""), touch_output)
            .on_contains(
                "beat-linux-386",
                Reply::SpawnError("resource temporarily unavailable".to_string()),
            ),
    );
    let orchestrator =
        BuildOrchestrator::new(runner.clone(), PipelineConfig::new("beat", dir.path()));

    let targets = vec![
        CrossTarget::new("linux", "386"),
        CrossTarget::new("linux", "amd64"),
    ];
    let report = orchestrator.crosscompile(&targets).await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.built().len(), 1);
    assert_eq!(report.failed()[0].target, CrossTarget::new("linux", "386"));
    assert_eq!(report.failed()[0].exit_code(), 1);
    match &report.failed()[0].status {
        TargetStatus::Failed { detail, .. } => {
            assert!(detail.contains("temporarily unavailable"), "{detail}")
        }
        TargetStatus::Built => panic!("spawn failure must not read as built"),
    }
    assert!(dir.path().join("build/bin/beat-linux-amd64").is_file());
}

#[tokio::test]
async fn check_on_formatted_tree_leaves_files_untouched() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("pkg")).unwrap();
    std::fs::write(root.join("main.go"), "package main\n\nfunc main() {}\n").unwrap();
    std::fs::write(root.join("pkg/lib.go"), "package pkg\n\nvar X = 1\n").unwrap();
    let before = snapshot(root);

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = BuildOrchestrator::new(runner.clone(), PipelineConfig::new("beat", root));
    orchestrator
        .check()
        .await
        .expect("formatted tree should pass check");

    assert_eq!(snapshot(root), before);
    let lines = runner.command_lines();
    assert_eq!(lines[0], "gofmt -l main.go pkg/lib.go");
    assert!(!lines[0].contains("-w"));
    assert_eq!(lines[1], "go vet ./...");
}
