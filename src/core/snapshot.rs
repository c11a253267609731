//! Architecture snapshots: immutable captures of the graph for diffing.
//!
//! A snapshot stores the full node set (with source, tags, and per-node
//! symbol names) and edge set as JSON, plus a headline symbol count.

use crate::core::diff::{classify, GraphDiff, GraphState, NodeState};
use crate::core::error::BeadloomError;
use crate::core::code_indexer::annotation_refs;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub id: i64,
    pub label: Option<String>,
    pub created_at: String,
    pub symbols_count: i64,
}

/// The live graph as a comparable state, with per-node symbol sets from
/// annotated code symbols.
pub fn state_from_store(conn: &Connection) -> Result<GraphState, BeadloomError> {
    let mut state = GraphState::default();

    let nodes: Vec<(String, String, String, Option<String>, String)> = {
        let mut stmt =
            conn.prepare("SELECT ref_id, kind, summary, source, extra FROM nodes ORDER BY ref_id")?;
        let mapped = stmt.query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })?;
        mapped.collect::<Result<_, _>>()?
    };
    for (ref_id, kind, summary, source, extra_raw) in nodes {
        let extra: Map<String, Value> = serde_json::from_str(&extra_raw).unwrap_or_default();
        let tags: BTreeSet<String> = crate::core::model::extra_tags(&extra).into_iter().collect();
        state.nodes.insert(
            ref_id,
            NodeState {
                kind,
                summary,
                source: source.unwrap_or_default(),
                tags,
                symbols: BTreeSet::new(),
            },
        );
    }

    let symbols: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT symbol_name, annotations FROM code_symbols")?;
        let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        mapped.collect::<Result<_, _>>()?
    };
    for (name, raw) in symbols {
        let Ok(annotations) = serde_json::from_str::<BTreeMap<String, String>>(&raw) else {
            continue;
        };
        for candidate in annotation_refs(&annotations) {
            if let Some(node) = state.nodes.get_mut(&candidate) {
                node.symbols.insert(name.clone());
            }
        }
    }

    let edges: Vec<(String, String, String)> = {
        let mut stmt = conn.prepare("SELECT src_ref_id, dst_ref_id, kind FROM edges")?;
        let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        mapped.collect::<Result<_, _>>()?
    };
    for edge in edges {
        state.edges.insert(edge);
    }

    Ok(state)
}

fn state_to_json(state: &GraphState) -> (Value, Value) {
    let nodes: Vec<Value> = state
        .nodes
        .iter()
        .map(|(ref_id, node)| {
            json!({
                "ref_id": ref_id,
                "kind": node.kind,
                "summary": node.summary,
                "source": node.source,
                "tags": node.tags,
                "symbols": node.symbols,
            })
        })
        .collect();
    let edges: Vec<Value> = state
        .edges
        .iter()
        .map(|(src, dst, kind)| json!({ "src": src, "dst": dst, "kind": kind }))
        .collect();
    (Value::Array(nodes), Value::Array(edges))
}

fn state_from_json(nodes_json: &str, edges_json: &str) -> GraphState {
    let mut state = GraphState::default();
    if let Ok(Value::Array(nodes)) = serde_json::from_str::<Value>(nodes_json) {
        for node in nodes {
            let get = |key: &str| node.get(key).and_then(Value::as_str).unwrap_or("").to_string();
            let ref_id = get("ref_id");
            if ref_id.is_empty() {
                continue;
            }
            let string_set = |key: &str| -> BTreeSet<String> {
                node.get(key)
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default()
            };
            state.nodes.insert(
                ref_id,
                NodeState {
                    kind: get("kind"),
                    summary: get("summary"),
                    source: get("source"),
                    tags: string_set("tags"),
                    symbols: string_set("symbols"),
                },
            );
        }
    }
    if let Ok(Value::Array(edges)) = serde_json::from_str::<Value>(edges_json) {
        for edge in edges {
            let get = |key: &str| edge.get(key).and_then(Value::as_str).unwrap_or("").to_string();
            let (src, dst, kind) = (get("src"), get("dst"), get("kind"));
            if !src.is_empty() && !dst.is_empty() {
                state.edges.insert((src, dst, kind));
            }
        }
    }
    state
}

/// Capture the current graph into a new snapshot; returns its id.
pub fn save_snapshot(conn: &Connection, label: Option<&str>) -> Result<i64, BeadloomError> {
    let state = state_from_store(conn)?;
    let (nodes_json, edges_json) = state_to_json(&state);
    let symbols_count: i64 = conn.query_row("SELECT count(*) FROM code_symbols", [], |r| r.get(0))?;
    conn.execute(
        "INSERT INTO graph_snapshots (label, created_at, nodes_json, edges_json, symbols_count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            label,
            Utc::now().to_rfc3339(),
            serde_json::to_string(&nodes_json)?,
            serde_json::to_string(&edges_json)?,
            symbols_count,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All snapshots, newest first.
pub fn list_snapshots(conn: &Connection) -> Result<Vec<SnapshotInfo>, BeadloomError> {
    let mut stmt = conn.prepare(
        "SELECT id, label, created_at, symbols_count FROM graph_snapshots ORDER BY id DESC",
    )?;
    let rows: Vec<SnapshotInfo> = stmt
        .query_map([], |r| {
            Ok(SnapshotInfo {
                id: r.get(0)?,
                label: r.get(1)?,
                created_at: r.get(2)?,
                symbols_count: r.get(3)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}

/// Diff the live store state against a stored snapshot.
pub fn compute_diff_from_snapshot(
    conn: &Connection,
    snapshot_id: i64,
) -> Result<GraphDiff, BeadloomError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT nodes_json, edges_json FROM graph_snapshots WHERE id = ?1",
            [snapshot_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((nodes_json, edges_json)) = row else {
        return Err(BeadloomError::NotFound(format!(
            "snapshot {snapshot_id} does not exist"
        )));
    };
    let prev = state_from_json(&nodes_json, &edges_json);
    let current = state_from_store(conn)?;
    Ok(classify(&prev, &current, &format!("snapshot {snapshot_id}")))
}
