//! RPC tool server over the compiled binary's stdio.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

fn project(root: &Path) -> PathBuf {
    let project = root.join("proj");
    fs::create_dir_all(project.join(".beadloom").join("_graph")).unwrap();
    fs::create_dir_all(project.join("docs")).unwrap();
    fs::write(
        project.join(".beadloom/_graph/graph.yml"),
        "nodes:\n  - ref_id: routing\n    kind: domain\n    summary: Routing domain\n  - ref_id: PROJ-1\n    kind: feature\n    summary: Feature one\nedges:\n  - src: PROJ-1\n    dst: routing\n    kind: part_of\n",
    )
    .unwrap();
    let reindex = Command::new(env!("CARGO_BIN_EXE_beadloom"))
        .arg("--project")
        .arg(&project)
        .arg("reindex")
        .output()
        .unwrap();
    assert!(reindex.status.success());
    project
}

fn serve(project: &Path, requests: &str) -> Vec<serde_json::Value> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_beadloom"))
        .arg("--project")
        .arg(project)
        .arg("mcp-serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn beadloom mcp-serve");
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(requests.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each response line is JSON"))
        .collect()
}

#[test]
fn list_tools_declares_thirteen() {
    let tmp = tempfile::tempdir().unwrap();
    let project = project(tmp.path());
    let responses = serve(&project, "{\"id\": 0, \"tool\": \"list_tools\"}\n");
    let tools = responses[0]["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 13);
}

#[test]
fn get_context_and_status_over_stdio() {
    let tmp = tempfile::tempdir().unwrap();
    let project = project(tmp.path());
    let responses = serve(
        &project,
        "{\"id\": 1, \"tool\": \"get_context\", \"arguments\": {\"ref_id\": \"PROJ-1\"}}\n\
         {\"id\": 2, \"tool\": \"get_status\", \"arguments\": {}}\n",
    );
    assert_eq!(responses[0]["id"], 1);
    assert_eq!(responses[0]["result"]["version"], 2);
    assert_eq!(responses[0]["result"]["focus"]["ref_id"], "PROJ-1");
    assert_eq!(responses[1]["result"]["nodes_count"], 2);
    assert_eq!(responses[1]["result"]["edges_count"], 1);
}

#[test]
fn unknown_ref_returns_error_with_suggestions() {
    let tmp = tempfile::tempdir().unwrap();
    let project = project(tmp.path());
    let responses = serve(
        &project,
        "{\"id\": 3, \"tool\": \"get_context\", \"arguments\": {\"ref_id\": \"PROJ-2\"}}\n",
    );
    let error = responses[0]["error"].as_str().unwrap();
    assert!(error.contains("not found"));
    assert!(error.contains("PROJ-1"));
}

#[test]
fn update_node_and_search_flow() {
    let tmp = tempfile::tempdir().unwrap();
    let project = project(tmp.path());
    let responses = serve(
        &project,
        "{\"id\": 1, \"tool\": \"update_node\", \"arguments\": {\"ref_id\": \"routing\", \"summary\": \"Request routing and dispatch\"}}\n\
         {\"id\": 2, \"tool\": \"search\", \"arguments\": {\"query\": \"routing\"}}\n",
    );
    assert_eq!(responses[0]["result"]["updated"], "routing");
    // The search index is rebuilt on reindex, not on update; summaries from
    // the original index still match.
    assert!(responses[1]["result"].is_array());
}
