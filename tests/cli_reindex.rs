//! End-to-end tests for `beadloom reindex` through the compiled binary.

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

fn minimal_project(root: &Path) -> PathBuf {
    let project = root.join("proj");
    fs::create_dir_all(project.join(".beadloom").join("_graph")).unwrap();
    fs::create_dir_all(project.join("docs")).unwrap();
    project
}

fn write(project: &Path, rel: &str, content: &str) {
    let path = project.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn reindex_reports_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_project(tmp.path());
    write(
        &project,
        ".beadloom/_graph/graph.yml",
        "nodes:\n  - ref_id: F1\n    kind: feature\n    summary: Feature 1\n  - ref_id: F2\n    kind: feature\n    summary: Feature 2\nedges:\n  - src: F1\n    dst: F2\n    kind: depends_on\n",
    );
    write(&project, "docs/overview.md", "## Overview\n\nProject overview.\n");
    write(&project, "src/app.py", "# beadloom:feature=F1\ndef handler():\n    pass\n");

    let output = beadloom(&project, &["reindex"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Nodes:   2"), "{stdout}");
    assert!(stdout.contains("Edges:   1"), "{stdout}");
    assert!(stdout.contains("Docs:    1"), "{stdout}");
    assert!(stdout.contains("Symbols: 1"), "{stdout}");
    assert!(project.join(".beadloom/beadloom.db").is_file());
}

#[test]
fn reindex_empty_project_zero_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_project(tmp.path());

    let output = beadloom(&project, &["reindex"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Nodes:   0"), "{stdout}");
    assert!(stdout.contains("Docs:    0"), "{stdout}");
    assert!(stdout.contains("Symbols: 0"), "{stdout}");
}

#[test]
fn reindex_warns_on_edge_to_missing_node() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_project(tmp.path());
    write(
        &project,
        ".beadloom/_graph/bad_edge.yml",
        "nodes:\n  - ref_id: X1\n    kind: feature\n    summary: Existing\nedges:\n  - src: X1\n    dst: GHOST\n    kind: depends_on\n",
    );

    let output = beadloom(&project, &["reindex"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[warn]"), "{stdout}");
    assert!(stdout.contains("GHOST"), "{stdout}");
}

#[test]
fn reindex_warns_on_shared_doc_reference() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_project(tmp.path());
    write(
        &project,
        ".beadloom/_graph/conflict.yml",
        "nodes:\n  - ref_id: A1\n    kind: feature\n    summary: Alpha\n    docs:\n      - docs/shared.md\n  - ref_id: A2\n    kind: feature\n    summary: Beta\n    docs:\n      - docs/shared.md\n",
    );
    write(&project, "docs/shared.md", "## Shared\n\nShared content.\n");

    let output = beadloom(&project, &["reindex"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("[warn]"));
}

#[test]
fn second_incremental_reindex_reports_nothing_changed() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_project(tmp.path());
    write(
        &project,
        ".beadloom/_graph/graph.yml",
        "nodes:\n  - ref_id: F1\n    kind: feature\n    summary: F\n",
    );
    write(&project, "docs/spec.md", "## Spec\n\nContent.\n");

    assert!(beadloom(&project, &["reindex"]).status.success());
    let second = beadloom(&project, &["reindex"]);
    assert!(second.status.success());
    assert!(String::from_utf8_lossy(&second.stdout).contains("Nothing changed"));
}

#[test]
fn docs_dir_flag_overrides_default() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_project(tmp.path());
    write(&project, "docs/default.md", "## Default\n\nDefault.\n");
    let custom = project.join("documentation");
    fs::create_dir_all(&custom).unwrap();
    fs::write(custom.join("guide.md"), "## Guide\n\nCustom.\n").unwrap();

    let output = beadloom(
        &project,
        &["reindex", "--docs-dir", custom.to_str().unwrap()],
    );
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Docs:    1"));
}

#[test]
fn full_flag_rebuilds_after_manual_tampering() {
    let tmp = tempfile::tempdir().unwrap();
    let project = minimal_project(tmp.path());
    write(
        &project,
        ".beadloom/_graph/graph.yml",
        "nodes:\n  - ref_id: F1\n    kind: feature\n    summary: F\n",
    );
    write(&project, "src/app.py", "# beadloom:feature=F1\ndef handler(): pass\n");
    assert!(beadloom(&project, &["reindex"]).status.success());

    // Remove a derived row behind the driver's back; --full restores it.
    let conn = beadloom::core::store::open_db(&project.join(".beadloom/beadloom.db")).unwrap();
    conn.execute("DELETE FROM code_symbols", []).unwrap();
    drop(conn);

    assert!(beadloom(&project, &["reindex", "--full"]).status.success());
    let conn = beadloom::core::store::open_db(&project.join(".beadloom/beadloom.db")).unwrap();
    let count: i64 = conn
        .query_row("SELECT count(*) FROM code_symbols", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);
}
