//! Graph delta: structural diff between two graph states.
//!
//! One classifier serves both diff sources: YAML shards at a git ref
//! (via `git show` / `git ls-tree`) and stored snapshots. A node change is
//! any difference in summary, kind, source, or tag set; symbol add/remove
//! counts are carried when symbol sets are known.

use crate::core::error::BeadloomError;
use colored::Colorize;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Comparable per-node state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeState {
    pub kind: String,
    pub summary: String,
    pub source: String,
    pub tags: BTreeSet<String>,
    pub symbols: BTreeSet<String>,
}

/// A full comparable graph state.
#[derive(Debug, Clone, Default)]
pub struct GraphState {
    pub nodes: BTreeMap<String, NodeState>,
    pub edges: BTreeSet<(String, String, String)>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeChange {
    pub ref_id: String,
    pub kind: String,
    /// "added" | "removed" | "changed"
    pub change_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_source: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub old_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_tags: Vec<String>,
    pub symbols_added: usize,
    pub symbols_removed: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EdgeChange {
    pub src: String,
    pub dst: String,
    pub kind: String,
    /// "added" | "removed"
    pub change_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphDiff {
    pub since_ref: String,
    pub nodes: Vec<NodeChange>,
    pub edges: Vec<EdgeChange>,
}

impl GraphDiff {
    pub fn has_changes(&self) -> bool {
        !self.nodes.is_empty() || !self.edges.is_empty()
    }
}

/// Classify the delta from `prev` to `current`.
pub fn classify(prev: &GraphState, current: &GraphState, since_ref: &str) -> GraphDiff {
    let mut node_changes = Vec::new();

    let all_refs: BTreeSet<&String> = prev.nodes.keys().chain(current.nodes.keys()).collect();
    for ref_id in all_refs {
        match (prev.nodes.get(ref_id), current.nodes.get(ref_id)) {
            (None, Some(curr)) => node_changes.push(NodeChange {
                ref_id: ref_id.clone(),
                kind: curr.kind.clone(),
                change_type: "added".into(),
                old_summary: None,
                new_summary: None,
                old_source: None,
                new_source: None,
                old_tags: Vec::new(),
                new_tags: Vec::new(),
                symbols_added: 0,
                symbols_removed: 0,
            }),
            (Some(old), None) => node_changes.push(NodeChange {
                ref_id: ref_id.clone(),
                kind: old.kind.clone(),
                change_type: "removed".into(),
                old_summary: None,
                new_summary: None,
                old_source: None,
                new_source: None,
                old_tags: Vec::new(),
                new_tags: Vec::new(),
                symbols_added: 0,
                symbols_removed: 0,
            }),
            (Some(old), Some(curr)) => {
                let symbols_added = curr.symbols.difference(&old.symbols).count();
                let symbols_removed = old.symbols.difference(&curr.symbols).count();
                let changed = old.kind != curr.kind
                    || old.summary != curr.summary
                    || old.source != curr.source
                    || old.tags != curr.tags
                    || symbols_added > 0
                    || symbols_removed > 0;
                if changed {
                    node_changes.push(NodeChange {
                        ref_id: ref_id.clone(),
                        kind: curr.kind.clone(),
                        change_type: "changed".into(),
                        old_summary: Some(old.summary.clone()),
                        new_summary: Some(curr.summary.clone()),
                        old_source: (old.source != curr.source).then(|| old.source.clone()),
                        new_source: (old.source != curr.source).then(|| curr.source.clone()),
                        old_tags: old.tags.iter().cloned().collect(),
                        new_tags: curr.tags.iter().cloned().collect(),
                        symbols_added,
                        symbols_removed,
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }

    let mut edge_changes = Vec::new();
    for (src, dst, kind) in current.edges.difference(&prev.edges) {
        edge_changes.push(EdgeChange {
            src: src.clone(),
            dst: dst.clone(),
            kind: kind.clone(),
            change_type: "added".into(),
        });
    }
    for (src, dst, kind) in prev.edges.difference(&current.edges) {
        edge_changes.push(EdgeChange {
            src: src.clone(),
            dst: dst.clone(),
            kind: kind.clone(),
            change_type: "removed".into(),
        });
    }

    GraphDiff {
        since_ref: since_ref.to_string(),
        nodes: node_changes,
        edges: edge_changes,
    }
}

// ---------------------------------------------------------------------------
// YAML parsing (shared by the git path and the graph-dir path)
// ---------------------------------------------------------------------------

/// Parse one shard's YAML content into a partial graph state.
pub fn parse_yaml_state(content: &str) -> GraphState {
    let mut state = GraphState::default();
    let Ok(doc) = serde_yaml::from_str::<serde_yaml::Value>(content) else {
        return state;
    };

    if let Some(nodes) = doc.get("nodes").and_then(|n| n.as_sequence()) {
        for node in nodes {
            let get = |key: &str| {
                node.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            let ref_id = get("ref_id");
            if ref_id.is_empty() {
                continue;
            }
            let tags: BTreeSet<String> = node
                .get("tags")
                .and_then(|t| t.as_sequence())
                .map(|seq| {
                    seq.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            state.nodes.insert(
                ref_id,
                NodeState {
                    kind: get("kind"),
                    summary: get("summary"),
                    source: get("source"),
                    tags,
                    symbols: BTreeSet::new(),
                },
            );
        }
    }

    if let Some(edges) = doc.get("edges").and_then(|e| e.as_sequence()) {
        for edge in edges {
            let get = |key: &str| {
                edge.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            let (src, dst, kind) = (get("src"), get("dst"), get("kind"));
            if !src.is_empty() && !dst.is_empty() {
                state.edges.insert((src, dst, kind));
            }
        }
    }
    state
}

fn merge_state(into: &mut GraphState, other: GraphState) {
    into.nodes.extend(other.nodes);
    into.edges.extend(other.edges);
}

/// Current graph state from the on-disk YAML shards.
pub fn state_from_graph_dir(project_root: &Path) -> Result<GraphState, BeadloomError> {
    let graph_dir = project_root.join(".beadloom").join("_graph");
    let mut state = GraphState::default();
    if !graph_dir.is_dir() {
        return Ok(state);
    }
    let mut paths: Vec<_> = fs::read_dir(&graph_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().map(|e| e == "yml").unwrap_or(false)
                && p.file_name().map(|n| n != "rules.yml").unwrap_or(false)
        })
        .collect();
    paths.sort();
    for path in paths {
        let content = fs::read_to_string(&path)?;
        merge_state(&mut state, parse_yaml_state(&content));
    }
    Ok(state)
}

// ---------------------------------------------------------------------------
// Git access
// ---------------------------------------------------------------------------

fn git_ref_valid(project_root: &Path, git_ref: &str) -> bool {
    Command::new("git")
        .args(["rev-parse", "--verify", git_ref])
        .current_dir(project_root)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git_show(project_root: &Path, rel_path: &str, git_ref: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["show", &format!("{git_ref}:{rel_path}")])
        .current_dir(project_root)
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).to_string())
}

fn git_graph_files(project_root: &Path, git_ref: &str) -> Vec<String> {
    let output = Command::new("git")
        .args(["ls-tree", "-r", "--name-only", git_ref, ".beadloom/_graph/"])
        .current_dir(project_root)
        .output();
    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.ends_with(".yml") && !l.ends_with("rules.yml"))
        .map(str::to_string)
        .collect()
}

/// Compare the current graph YAML with its state at a git ref.
pub fn compute_diff(project_root: &Path, since: &str) -> Result<GraphDiff, BeadloomError> {
    if !git_ref_valid(project_root, since) {
        return Err(BeadloomError::NotFound(format!("invalid git ref: '{since}'")));
    }

    let current = state_from_graph_dir(project_root)?;

    let mut prev = GraphState::default();
    for rel_path in git_graph_files(project_root, since) {
        if let Some(content) = git_show(project_root, &rel_path, since) {
            merge_state(&mut prev, parse_yaml_state(&content));
        }
    }

    Ok(classify(&prev, &current, since))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Human-readable rendering with +/~/- markers and a summary line.
pub fn render_diff(diff: &GraphDiff) -> String {
    if !diff.has_changes() {
        return format!("No graph changes since {}.", diff.since_ref);
    }

    let mut lines = Vec::new();
    lines.push(format!("Graph diff (since {}):", diff.since_ref).bold().to_string());
    lines.push(String::new());

    if !diff.nodes.is_empty() {
        lines.push("Nodes:".bold().to_string());
        for node in &diff.nodes {
            match node.change_type.as_str() {
                "added" => lines.push(format!(
                    "  {} ({})",
                    format!("+ {}", node.ref_id).green(),
                    node.kind
                )),
                "removed" => lines.push(format!(
                    "  {} ({})",
                    format!("- {}", node.ref_id).red(),
                    node.kind
                )),
                _ => {
                    lines.push(format!(
                        "  {} ({})",
                        format!("~ {}", node.ref_id).yellow(),
                        node.kind
                    ));
                    if node.old_summary != node.new_summary {
                        if let (Some(old), Some(new)) = (&node.old_summary, &node.new_summary) {
                            lines.push(format!("    {}", old.dimmed()));
                            lines.push(format!("    {}", new.bold()));
                        }
                    }
                    if node.symbols_added > 0 || node.symbols_removed > 0 {
                        lines.push(format!(
                            "    symbols: +{} -{}",
                            node.symbols_added, node.symbols_removed
                        ));
                    }
                }
            }
        }
        lines.push(String::new());
    }

    if !diff.edges.is_empty() {
        lines.push("Edges:".bold().to_string());
        for edge in &diff.edges {
            let arrow = format!("{} --[{}]--> {}", edge.src, edge.kind, edge.dst);
            match edge.change_type.as_str() {
                "added" => lines.push(format!("  {}", format!("+ {arrow}").green())),
                _ => lines.push(format!("  {}", format!("- {arrow}").red())),
            }
        }
        lines.push(String::new());
    }

    let count = |items: &[NodeChange], t: &str| items.iter().filter(|n| n.change_type == t).count();
    let edge_count =
        |items: &[EdgeChange], t: &str| items.iter().filter(|e| e.change_type == t).count();
    lines.push(format!(
        "{} added, {} changed, {} removed nodes; {} added, {} removed edges",
        count(&diff.nodes, "added"),
        count(&diff.nodes, "changed"),
        count(&diff.nodes, "removed"),
        edge_count(&diff.edges, "added"),
        edge_count(&diff.edges, "removed"),
    ));
    lines.join("\n")
}

/// JSON wire form.
pub fn diff_to_json(diff: &GraphDiff) -> Value {
    json!({
        "since_ref": diff.since_ref,
        "has_changes": diff.has_changes(),
        "nodes": diff.nodes,
        "edges": diff.edges,
    })
}
