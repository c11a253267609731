//! End-to-end tests for `beadloom ctx` — the minimal project context flow.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn beadloom(project: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_beadloom"))
        .arg("--project")
        .arg(project)
        .args(args)
        .output()
        .expect("failed to execute beadloom")
}

/// Two nodes, one linked doc with a Specification section, one annotated
/// source file.
fn minimal_context_project(root: &Path) -> PathBuf {
    let project = root.join("proj");
    fs::create_dir_all(project.join(".beadloom").join("_graph")).unwrap();
    fs::create_dir_all(project.join("docs")).unwrap();
    fs::create_dir_all(project.join("src")).unwrap();
    fs::write(
        project.join(".beadloom/_graph/graph.yml"),
        "nodes:\n  - ref_id: PROJ-1\n    kind: feature\n    summary: Track filtering\n    docs:\n      - docs/spec.md\n  - ref_id: routing\n    kind: domain\n    summary: Routing domain\nedges:\n  - src: PROJ-1\n    dst: routing\n    kind: part_of\n",
    )
    .unwrap();
    fs::write(
        project.join("docs/spec.md"),
        "## Specification\n\nTrack filtering rules.\n",
    )
    .unwrap();
    fs::write(
        project.join("src/api.py"),
        "# beadloom:feature=PROJ-1\ndef list_tracks(): pass\n",
    )
    .unwrap();
    project
}

#[test]
fn ctx_json_bundle_shape() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_context_project(tmp.path());
    assert!(beadloom(&project, &["reindex"]).status.success());

    let output = beadloom(&project, &["ctx", "PROJ-1", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let bundle: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("ctx --json emits valid JSON");

    assert_eq!(bundle["version"], 2);
    assert_eq!(bundle["focus"]["ref_id"], "PROJ-1");

    let refs: Vec<&str> = bundle["graph"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["ref_id"].as_str().unwrap())
        .collect();
    assert!(refs.contains(&"PROJ-1"));
    assert!(refs.contains(&"routing"));

    assert_eq!(bundle["text_chunks"][0]["section"], "spec");
    assert_eq!(bundle["code_symbols"][0]["symbol_name"], "list_tracks");
}

#[test]
fn ctx_markdown_rendering() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_context_project(tmp.path());
    assert!(beadloom(&project, &["reindex"]).status.success());

    let output = beadloom(&project, &["ctx", "PROJ-1", "--markdown"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# PROJ-1 (feature)"));
    assert!(stdout.contains("Track filtering rules."));
    assert!(stdout.contains("list_tracks"));
}

#[test]
fn ctx_unknown_ref_fails_with_suggestions() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_context_project(tmp.path());
    assert!(beadloom(&project, &["reindex"]).status.success());

    let output = beadloom(&project, &["ctx", "PROJ-9", "--json"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "{stderr}");
    assert!(stderr.contains("PROJ-1"), "{stderr}");
}

#[test]
fn ctx_warns_when_files_newer_than_index() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_context_project(tmp.path());
    assert!(beadloom(&project, &["reindex"]).status.success());

    // Touch the source file with a clearly newer mtime.
    std::thread::sleep(std::time::Duration::from_millis(20));
    fs::write(
        project.join("src/api.py"),
        "# beadloom:feature=PROJ-1\ndef list_tracks(): pass\n\ndef extra(): pass\n",
    )
    .unwrap();

    let output = beadloom(&project, &["ctx", "PROJ-1", "--json"]);
    assert!(output.status.success());
    let bundle: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(bundle["warning"].is_string(), "expected stale-index warning");
}

#[test]
fn ctx_respects_max_nodes() {
    let tmp = tempfile::tempdir().unwrap();
    let project = tmp.path().join("proj");
    fs::create_dir_all(project.join(".beadloom/_graph")).unwrap();
    let mut shard = String::from("nodes:\n  - ref_id: hub\n    kind: domain\n    summary: Hub\n");
    let mut edges = String::from("edges:\n");
    for i in 0..10 {
        shard.push_str(&format!(
            "  - ref_id: n{i}\n    kind: feature\n    summary: N{i}\n"
        ));
        edges.push_str(&format!("  - src: n{i}\n    dst: hub\n    kind: part_of\n"));
    }
    fs::write(
        project.join(".beadloom/_graph/graph.yml"),
        format!("{shard}{edges}"),
    )
    .unwrap();
    assert!(beadloom(&project, &["reindex"]).status.success());

    let output = beadloom(&project, &["ctx", "hub", "--max-nodes", "3", "--json"]);
    assert!(output.status.success());
    let bundle: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(bundle["graph"]["nodes"].as_array().unwrap().len() <= 3);
}
