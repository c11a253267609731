//! Context assembler: BFS subgraph traversal and context bundle assembly.
//!
//! Traversal is undirected with an edge-kind priority order; the bundle is
//! versioned (currently 2) and size-bounded by `max_nodes` / `max_chunks`.

use crate::core::error::BeadloomError;
use crate::core::model::edge_priority;
use crate::core::code_indexer::annotation_refs;
use crate::core::store::meta_get;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

pub const DEFAULT_DEPTH: usize = 2;
pub const DEFAULT_MAX_NODES: usize = 20;
pub const DEFAULT_MAX_CHUNKS: usize = 10;

const MAX_SUGGESTIONS: usize = 5;

/// Levenshtein edit distance between two strings.
fn levenshtein(s: &str, t: &str) -> usize {
    let s: Vec<char> = s.chars().collect();
    let t: Vec<char> = t.chars().collect();
    if t.is_empty() {
        return s.len();
    }
    if s.is_empty() {
        return t.len();
    }

    let mut prev: Vec<usize> = (0..=t.len()).collect();
    for (i, cs) in s.iter().enumerate() {
        let mut curr = vec![i + 1];
        for (j, ct) in t.iter().enumerate() {
            let cost = usize::from(cs != ct);
            curr.push(
                (curr[j] + 1)
                    .min(prev[j + 1] + 1)
                    .min(prev[j] + cost),
            );
        }
        prev = curr;
    }
    prev[t.len()]
}

/// Suggest existing ref_ids similar to a missing one.
///
/// Prefix matching (both directions, case-insensitive) first, then
/// Levenshtein distance within `max(len/2, 3)`, deduplicated, capped at 5.
/// An existing ref_id yields no suggestions.
pub fn suggest_ref_id(conn: &Connection, ref_id: &str) -> Result<Vec<String>, BeadloomError> {
    let exists: Option<String> = conn
        .query_row("SELECT ref_id FROM nodes WHERE ref_id = ?1", [ref_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_some() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare("SELECT ref_id FROM nodes")?;
    let all_ids: Vec<String> = stmt
        .query_map([], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    if all_ids.is_empty() {
        return Ok(Vec::new());
    }

    let query_lower = ref_id.to_lowercase();
    let prefix_matches: Vec<&String> = all_ids
        .iter()
        .filter(|rid| {
            let rid_lower = rid.to_lowercase();
            rid_lower.starts_with(&query_lower) || query_lower.starts_with(&rid_lower)
        })
        .collect();

    let mut scored: Vec<(&String, usize)> = all_ids
        .iter()
        .map(|rid| (rid, levenshtein(ref_id, rid)))
        .collect();
    scored.sort_by_key(|(_, dist)| *dist);
    let max_dist = (ref_id.len() / 2).max(3);
    let lev_matches: Vec<&String> = scored
        .into_iter()
        .filter(|(_, dist)| *dist <= max_dist)
        .map(|(rid, _)| rid)
        .collect();

    let mut seen = HashSet::new();
    let mut combined = Vec::new();
    for rid in prefix_matches.into_iter().chain(lev_matches) {
        if seen.insert(rid.clone()) {
            combined.push(rid.clone());
        }
        if combined.len() == MAX_SUGGESTIONS {
            break;
        }
    }
    Ok(combined)
}

fn ref_not_found(conn: &Connection, ref_id: &str) -> BeadloomError {
    let suggestions = suggest_ref_id(conn, ref_id).unwrap_or_default();
    BeadloomError::RefNotFound {
        ref_id: ref_id.to_string(),
        suggestions,
    }
}

fn fetch_node(conn: &Connection, ref_id: &str) -> Result<Option<Value>, BeadloomError> {
    let row = conn
        .query_row(
            "SELECT ref_id, kind, summary FROM nodes WHERE ref_id = ?1",
            [ref_id],
            |r| {
                Ok(json!({
                    "ref_id": r.get::<_, String>(0)?,
                    "kind": r.get::<_, String>(1)?,
                    "summary": r.get::<_, String>(2)?,
                }))
            },
        )
        .optional()?;
    Ok(row)
}

/// BFS traversal from focus nodes, expanding by edge priority.
///
/// Returns `(nodes, edges)`. Every encountered edge is recorded
/// (deduplicated on the full triple) even when the neighbor is not
/// expanded; nodes stop being added once `max_nodes` is reached.
pub fn bfs_subgraph(
    conn: &Connection,
    focus_ref_ids: &[String],
    depth: usize,
    max_nodes: usize,
) -> Result<(Vec<Value>, Vec<Value>), BeadloomError> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut nodes: Vec<Value> = Vec::new();
    let mut edges: Vec<Value> = Vec::new();
    let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    for rid in focus_ref_ids {
        if !visited.contains(rid) && visited.len() < max_nodes {
            if let Some(node) = fetch_node(conn, rid)? {
                visited.insert(rid.clone());
                nodes.push(node);
                queue.push_back((rid.clone(), 0));
            }
        }
    }

    while let Some((current, current_depth)) = queue.pop_front() {
        if current_depth >= depth {
            continue;
        }

        // (neighbor, src, dst, kind) over both edge directions.
        let mut neighbors: Vec<(String, String, String, String)> = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT src_ref_id, dst_ref_id, kind FROM edges WHERE src_ref_id = ?1",
            )?;
            let rows = stmt.query_map([&current], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (src, dst, kind) = row?;
                neighbors.push((dst.clone(), src, dst, kind));
            }
        }
        {
            let mut stmt = conn.prepare(
                "SELECT src_ref_id, dst_ref_id, kind FROM edges WHERE dst_ref_id = ?1",
            )?;
            let rows = stmt.query_map([&current], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (src, dst, kind) = row?;
                neighbors.push((src.clone(), src, dst, kind));
            }
        }

        // Stable sort: priority order, ties keep insertion order.
        neighbors.sort_by_key(|(_, _, _, kind)| edge_priority(kind));

        for (neighbor, src, dst, kind) in neighbors {
            let edge_key = (src.clone(), dst.clone(), kind.clone());
            if seen_edges.insert(edge_key) {
                edges.push(json!({ "src": src, "dst": dst, "kind": kind }));
            }

            if visited.contains(&neighbor) {
                continue;
            }
            if visited.len() >= max_nodes {
                break;
            }
            if let Some(node) = fetch_node(conn, &neighbor)? {
                visited.insert(neighbor.clone());
                nodes.push(node);
                queue.push_back((neighbor, current_depth + 1));
            }
        }
    }

    Ok((nodes, edges))
}

/// Chunks for the subgraph refs, ordered by section priority then
/// chunk_index, capped at `max_chunks`.
pub fn collect_chunks(
    conn: &Connection,
    ref_ids: &BTreeSet<String>,
    max_chunks: usize,
) -> Result<Vec<Value>, BeadloomError> {
    if ref_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ref_ids.len()].join(",");
    let sql = format!(
        "SELECT d.path, c.section, c.heading, c.content
         FROM chunks c JOIN docs d ON c.doc_id = d.id
         WHERE d.ref_id IN ({placeholders})
         ORDER BY CASE c.section
             WHEN 'spec' THEN 1
             WHEN 'invariants' THEN 2
             WHEN 'constraints' THEN 3
             WHEN 'api' THEN 4
             WHEN 'tests' THEN 5
             ELSE 6 END,
           c.chunk_index
         LIMIT ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = ref_ids
        .iter()
        .map(|r| Box::new(r.clone()) as Box<dyn rusqlite::ToSql>)
        .collect();
    params.push(Box::new(max_chunks as i64));
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())), |r| {
        Ok(json!({
            "doc_path": r.get::<_, String>(0)?,
            "section": r.get::<_, String>(1)?,
            "heading": r.get::<_, String>(2)?,
            "content": r.get::<_, String>(3)?,
        }))
    })?;
    let mut chunks = Vec::new();
    for row in rows {
        chunks.push(row?);
    }
    Ok(chunks)
}

/// Code symbols whose annotations map to any subgraph ref, deduplicated on
/// `(file_path, symbol_name)`.
fn collect_code_symbols(
    conn: &Connection,
    ref_ids: &BTreeSet<String>,
) -> Result<Vec<Value>, BeadloomError> {
    if ref_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT file_path, symbol_name, kind, line_start, line_end, annotations
         FROM code_symbols ORDER BY file_path, line_start",
    )?;
    let rows: Vec<(String, String, String, i64, i64, String)> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })?
        .collect::<Result<_, _>>()?;

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut symbols = Vec::new();
    for (file_path, symbol_name, kind, line_start, line_end, raw) in rows {
        let Ok(annotations) = serde_json::from_str::<BTreeMap<String, String>>(&raw) else {
            continue;
        };
        let matches = annotation_refs(&annotations)
            .iter()
            .any(|r| ref_ids.contains(r));
        if !matches {
            continue;
        }
        if seen.insert((file_path.clone(), symbol_name.clone())) {
            symbols.push(json!({
                "file_path": file_path,
                "symbol_name": symbol_name,
                "kind": kind,
                "line_start": line_start,
                "line_end": line_end,
            }));
        }
    }
    Ok(symbols)
}

/// Stale sync-state pairs within the subgraph.
fn stale_docs(conn: &Connection, ref_ids: &BTreeSet<String>) -> Result<Vec<Value>, BeadloomError> {
    if ref_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ref_ids.len()].join(",");
    let sql = format!(
        "SELECT doc_path, code_path FROM sync_state
         WHERE ref_id IN ({placeholders}) AND status = 'stale'
         ORDER BY doc_path, code_path"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(ref_ids.iter()),
        |r| {
            Ok(json!({
                "doc_path": r.get::<_, String>(0)?,
                "code_path": r.get::<_, String>(1)?,
            }))
        },
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn matcher_hits_subgraph(
    matcher: &Value,
    refs: &BTreeSet<String>,
    kinds: &BTreeMap<String, String>,
    tags: &BTreeMap<String, Vec<String>>,
) -> bool {
    if let Some(ref_id) = matcher.get("ref_id").and_then(Value::as_str) {
        if refs.contains(ref_id) {
            return true;
        }
    }
    if let Some(kind) = matcher.get("kind").and_then(Value::as_str) {
        if kinds.values().any(|k| k == kind) {
            return true;
        }
    }
    if let Some(tag) = matcher.get("tag").and_then(Value::as_str) {
        if tags.values().any(|t| t.iter().any(|v| v == tag)) {
            return true;
        }
    }
    false
}

/// Enabled rules whose matchers could apply to at least one subgraph node.
///
/// A deny rule matches when its `from` or `to` matcher selects a subgraph
/// node; a require rule matches when its `for` matcher does. Constraint
/// shape: `{rule, description, type, severity, definition}`.
pub fn collect_constraints(
    conn: &Connection,
    ref_ids: &BTreeSet<String>,
) -> Result<Vec<Value>, BeadloomError> {
    if ref_ids.is_empty() {
        return Ok(Vec::new());
    }

    // Subgraph node kinds and tags for matcher evaluation.
    let mut kinds: BTreeMap<String, String> = BTreeMap::new();
    let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for ref_id in ref_ids {
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT kind, extra FROM nodes WHERE ref_id = ?1",
                [ref_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if let Some((kind, extra_raw)) = row {
            kinds.insert(ref_id.clone(), kind);
            let extra: Map<String, Value> =
                serde_json::from_str(&extra_raw).unwrap_or_default();
            tags.insert(ref_id.clone(), crate::core::model::extra_tags(&extra));
        }
    }

    let mut stmt = conn.prepare(
        "SELECT name, description, rule_type, severity, rule_json FROM rules
         WHERE enabled = 1 ORDER BY name",
    )?;
    let rows: Vec<(String, String, String, String, String)> = stmt
        .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })?
        .collect::<Result<_, _>>()?;

    let mut constraints = Vec::new();
    for (name, description, rule_type, severity, rule_json) in rows {
        let Ok(definition) = serde_json::from_str::<Value>(&rule_json) else {
            continue;
        };
        let relevant = match rule_type.as_str() {
            "deny" => {
                let from = definition.get("from").cloned().unwrap_or(Value::Null);
                let to = definition.get("to").cloned().unwrap_or(Value::Null);
                matcher_hits_subgraph(&from, ref_ids, &kinds, &tags)
                    || matcher_hits_subgraph(&to, ref_ids, &kinds, &tags)
            }
            "require" => {
                let for_matcher = definition.get("for").cloned().unwrap_or(Value::Null);
                matcher_hits_subgraph(&for_matcher, ref_ids, &kinds, &tags)
            }
            _ => false,
        };
        if relevant {
            constraints.push(json!({
                "rule": name,
                "description": description,
                "type": rule_type,
                "severity": severity,
                "definition": definition,
            }));
        }
    }
    Ok(constraints)
}

/// Build a full context bundle for the given focus ref_ids.
///
/// The bundle is version 2: focus node (with activity/tests extras),
/// subgraph, ordered text chunks, code symbols, routes, sync status, and
/// the architecture constraints that could apply to the subgraph.
///
/// Fails with `RefNotFound` (including suggestions) when any focus ref is
/// missing.
pub fn build_context(
    conn: &Connection,
    ref_ids: &[String],
    depth: usize,
    max_nodes: usize,
    max_chunks: usize,
) -> Result<Value, BeadloomError> {
    for rid in ref_ids {
        if fetch_node(conn, rid)?.is_none() {
            return Err(ref_not_found(conn, rid));
        }
    }

    let (nodes, edges) = bfs_subgraph(conn, ref_ids, depth, max_nodes)?;
    let subgraph_refs: BTreeSet<String> = nodes
        .iter()
        .filter_map(|n| n.get("ref_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    let text_chunks = collect_chunks(conn, &subgraph_refs, max_chunks)?;
    let code_symbols = collect_code_symbols(conn, &subgraph_refs)?;
    let constraints = collect_constraints(conn, &subgraph_refs)?;
    let stale = stale_docs(conn, &subgraph_refs)?;

    // Focus: first ref, enriched with the activity/tests/routes extras.
    let (focus_kind, focus_summary, focus_extra): (String, String, String) = conn.query_row(
        "SELECT kind, summary, extra FROM nodes WHERE ref_id = ?1",
        [&ref_ids[0]],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    let extra: Map<String, Value> = serde_json::from_str(&focus_extra).unwrap_or_default();
    let mut focus = Map::new();
    focus.insert("ref_id".into(), json!(ref_ids[0]));
    focus.insert("kind".into(), json!(focus_kind));
    focus.insert("summary".into(), json!(focus_summary));
    for key in ["activity", "tests"] {
        if let Some(value) = extra.get(key) {
            focus.insert(key.to_string(), value.clone());
        }
    }

    // Routes across the subgraph.
    let mut routes = Vec::new();
    for ref_id in &subgraph_refs {
        let raw: Option<String> = conn
            .query_row("SELECT extra FROM nodes WHERE ref_id = ?1", [ref_id], |r| {
                r.get(0)
            })
            .optional()?;
        let node_extra: Map<String, Value> = raw
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
            .unwrap_or_default();
        if let Some(Value::Array(node_routes)) = node_extra.get("routes") {
            routes.extend(node_routes.iter().cloned());
        }
    }

    let last_reindex = meta_get(conn, "last_reindex_at")?;

    Ok(json!({
        "version": 2,
        "focus": focus,
        "graph": { "nodes": nodes, "edges": edges },
        "text_chunks": text_chunks,
        "code_symbols": code_symbols,
        "routes": routes,
        "sync_status": {
            "stale_docs": stale,
            "last_reindex": last_reindex,
        },
        "constraints": constraints,
        "warning": Value::Null,
    }))
}
