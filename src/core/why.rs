//! Impact analysis: bidirectional BFS from a target node.
//!
//! Upstream follows outgoing edges (what the node depends on); downstream
//! follows incoming edges (what depends on the node). Both record the
//! traversing edge kind and are bounded by depth and node caps.

use crate::core::context::suggest_ref_id;
use crate::core::error::BeadloomError;
use colored::Colorize;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};

pub const DEFAULT_DEPTH: usize = 3;
pub const DEFAULT_MAX_NODES: usize = 50;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub ref_id: String,
    pub kind: String,
    pub summary: String,
}

/// Recursive tree node for upstream/downstream display.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TreeNode {
    pub ref_id: String,
    pub kind: String,
    pub summary: String,
    pub edge_kind: String,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImpactSummary {
    pub downstream_direct: usize,
    pub downstream_transitive: usize,
    /// Percentage 0-100 of downstream refs with at least one doc.
    pub doc_coverage: f64,
    pub stale_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhyResult {
    pub node: NodeInfo,
    pub upstream: Vec<TreeNode>,
    pub downstream: Vec<TreeNode>,
    pub impact: ImpactSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upstream,
    Downstream,
}

fn neighbors(
    conn: &Connection,
    ref_id: &str,
    direction: Direction,
) -> Result<Vec<(String, String)>, BeadloomError> {
    let sql = match direction {
        Direction::Upstream => "SELECT dst_ref_id, kind FROM edges WHERE src_ref_id = ?1",
        Direction::Downstream => "SELECT src_ref_id, kind FROM edges WHERE dst_ref_id = ?1",
    };
    let mut stmt = conn.prepare(sql)?;
    let rows: Vec<(String, String)> = stmt
        .query_map([ref_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}

fn node_info(conn: &Connection, ref_id: &str) -> Result<(String, String), BeadloomError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT kind, summary FROM nodes WHERE ref_id = ?1",
            [ref_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row.unwrap_or_default())
}

/// Build a tree via BFS in one direction. The start node itself is not in
/// the tree; cycles are cut by the visited set.
fn build_tree(
    conn: &Connection,
    start: &str,
    direction: Direction,
    depth: usize,
    max_nodes: usize,
) -> Result<Vec<TreeNode>, BeadloomError> {
    if depth == 0 {
        return Ok(Vec::new());
    }

    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
    let mut node_count = 0usize;
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    let mut children_map: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let mut info_cache: HashMap<String, (String, String)> = HashMap::new();

    for (neighbor, edge_kind) in neighbors(conn, start, direction)? {
        if !visited.contains(&neighbor) && node_count < max_nodes {
            visited.insert(neighbor.clone());
            node_count += 1;
            queue.push_back((neighbor.clone(), 1));
            children_map
                .entry(start.to_string())
                .or_default()
                .push((neighbor.clone(), edge_kind));
            let info = node_info(conn, &neighbor)?;
            info_cache.insert(neighbor, info);
        }
    }

    while let Some((current, current_depth)) = queue.pop_front() {
        if current_depth >= depth || node_count >= max_nodes {
            continue;
        }
        for (neighbor, edge_kind) in neighbors(conn, &current, direction)? {
            if visited.contains(&neighbor) {
                continue;
            }
            if node_count >= max_nodes {
                break;
            }
            visited.insert(neighbor.clone());
            node_count += 1;
            queue.push_back((neighbor.clone(), current_depth + 1));
            children_map
                .entry(current.clone())
                .or_default()
                .push((neighbor.clone(), edge_kind));
            let info = node_info(conn, &neighbor)?;
            info_cache.insert(neighbor, info);
        }
    }

    fn build(
        parent: &str,
        children_map: &HashMap<String, Vec<(String, String)>>,
        info_cache: &HashMap<String, (String, String)>,
    ) -> Vec<TreeNode> {
        children_map
            .get(parent)
            .map(|children| {
                children
                    .iter()
                    .map(|(child, edge_kind)| {
                        let (kind, summary) =
                            info_cache.get(child).cloned().unwrap_or_default();
                        TreeNode {
                            ref_id: child.clone(),
                            kind,
                            summary,
                            edge_kind: edge_kind.clone(),
                            children: build(child, children_map, info_cache),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    Ok(build(start, &children_map, &info_cache))
}

fn count_nodes(trees: &[TreeNode], depth: usize) -> (usize, usize) {
    let mut direct = 0;
    let mut transitive = 0;
    for node in trees {
        if depth == 0 {
            direct += 1;
        } else {
            transitive += 1;
        }
        let (d, t) = count_nodes(&node.children, depth + 1);
        direct += d;
        transitive += t;
    }
    (direct, transitive)
}

fn collect_refs(trees: &[TreeNode], refs: &mut HashSet<String>) {
    for node in trees {
        refs.insert(node.ref_id.clone());
        collect_refs(&node.children, refs);
    }
}

fn doc_coverage(conn: &Connection, refs: &HashSet<String>) -> Result<f64, BeadloomError> {
    if refs.is_empty() {
        return Ok(100.0);
    }
    let placeholders = vec!["?"; refs.len()].join(",");
    let sql = format!("SELECT COUNT(DISTINCT ref_id) FROM docs WHERE ref_id IN ({placeholders})");
    let covered: i64 = conn.query_row(
        &sql,
        rusqlite::params_from_iter(refs.iter()),
        |r| r.get(0),
    )?;
    Ok(covered as f64 / refs.len() as f64 * 100.0)
}

fn stale_count(conn: &Connection, refs: &HashSet<String>) -> Result<usize, BeadloomError> {
    if refs.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; refs.len()].join(",");
    let sql = format!(
        "SELECT COUNT(*) FROM sync_state WHERE ref_id IN ({placeholders}) AND status = 'stale'"
    );
    let count: i64 = conn.query_row(
        &sql,
        rusqlite::params_from_iter(refs.iter()),
        |r| r.get(0),
    )?;
    Ok(count as usize)
}

/// Perform impact analysis on a node.
///
/// Fails with `RefNotFound` (including suggestions) when the target does
/// not exist.
pub fn analyze_node(
    conn: &Connection,
    ref_id: &str,
    depth: usize,
    max_nodes: usize,
) -> Result<WhyResult, BeadloomError> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT ref_id, kind, summary FROM nodes WHERE ref_id = ?1",
            [ref_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((ref_id, kind, summary)) = row else {
        let suggestions = suggest_ref_id(conn, ref_id)?;
        return Err(BeadloomError::RefNotFound {
            ref_id: ref_id.to_string(),
            suggestions,
        });
    };

    let upstream = build_tree(conn, &ref_id, Direction::Upstream, depth, max_nodes)?;
    let downstream = build_tree(conn, &ref_id, Direction::Downstream, depth, max_nodes)?;

    let (direct, transitive) = count_nodes(&downstream, 0);
    let mut downstream_refs = HashSet::new();
    collect_refs(&downstream, &mut downstream_refs);

    Ok(WhyResult {
        node: NodeInfo {
            ref_id,
            kind,
            summary,
        },
        impact: ImpactSummary {
            downstream_direct: direct,
            downstream_transitive: transitive,
            doc_coverage: doc_coverage(conn, &downstream_refs)?,
            stale_count: stale_count(conn, &downstream_refs)?,
        },
        upstream,
        downstream,
    })
}

fn tree_to_json(node: &TreeNode) -> Value {
    json!({
        "ref_id": node.ref_id,
        "kind": node.kind,
        "summary": node.summary,
        "edge_kind": node.edge_kind,
        "children": node.children.iter().map(tree_to_json).collect::<Vec<_>>(),
    })
}

/// Serialize a `WhyResult` to its JSON wire form.
pub fn result_to_json(result: &WhyResult) -> Value {
    json!({
        "node": {
            "ref_id": result.node.ref_id,
            "kind": result.node.kind,
            "summary": result.node.summary,
        },
        "upstream": result.upstream.iter().map(tree_to_json).collect::<Vec<_>>(),
        "downstream": result.downstream.iter().map(tree_to_json).collect::<Vec<_>>(),
        "impact": {
            "downstream_direct": result.impact.downstream_direct,
            "downstream_transitive": result.impact.downstream_transitive,
            "doc_coverage": result.impact.doc_coverage,
            "stale_count": result.impact.stale_count,
        },
    })
}

fn render_tree(nodes: &[TreeNode], indent: usize, out: &mut Vec<String>) {
    for node in nodes {
        let pad = "  ".repeat(indent + 1);
        let mut line = format!(
            "{pad}{} ({}) {}",
            node.ref_id.bold(),
            node.kind,
            format!("--[{}]--", node.edge_kind).dimmed()
        );
        if !node.summary.is_empty() {
            line.push(' ');
            line.push_str(&node.summary);
        }
        out.push(line);
        render_tree(&node.children, indent + 1, out);
    }
}

/// Human-readable rendering with upstream/downstream trees and the impact
/// summary.
pub fn render_why(result: &WhyResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} ({})",
        result.node.ref_id.bold(),
        result.node.kind
    ));
    if !result.node.summary.is_empty() {
        lines.push(result.node.summary.clone());
    }
    lines.push(String::new());

    if result.upstream.is_empty() {
        lines.push("No upstream dependencies.".dimmed().to_string());
    } else {
        lines.push("Upstream (dependencies)".cyan().bold().to_string());
        render_tree(&result.upstream, 0, &mut lines);
    }
    lines.push(String::new());

    if result.downstream.is_empty() {
        lines.push("No downstream dependents.".dimmed().to_string());
    } else {
        lines.push("Downstream (dependents)".green().bold().to_string());
        render_tree(&result.downstream, 0, &mut lines);
    }
    lines.push(String::new());

    lines.push(format!(
        "Direct dependents:     {}",
        result.impact.downstream_direct
    ));
    lines.push(format!(
        "Transitive dependents: {}",
        result.impact.downstream_transitive
    ));
    lines.push(format!(
        "Doc coverage:          {:.0}%",
        result.impact.doc_coverage
    ));
    lines.push(format!(
        "Stale docs:            {}",
        result.impact.stale_count
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{ensure_schema, open_db};
    use tempfile::tempdir;

    fn setup_impact_graph() -> (tempfile::TempDir, Connection) {
        let dir = tempdir().unwrap();
        let conn = open_db(&dir.path().join("test.db")).unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO nodes (ref_id, kind, summary) VALUES
               ('AUTH-svc', 'service', 'Auth service'),
               ('LIB-core', 'domain', 'Core library'),
               ('DB-ent', 'entity', 'Database entity'),
               ('FEAT-1', 'feature', 'Feature one'),
               ('FEAT-2', 'feature', 'Feature two');
             INSERT INTO edges (src_ref_id, dst_ref_id, kind) VALUES
               ('AUTH-svc', 'LIB-core', 'depends_on'),
               ('AUTH-svc', 'DB-ent', 'uses'),
               ('FEAT-1', 'AUTH-svc', 'part_of'),
               ('FEAT-2', 'AUTH-svc', 'part_of');",
        )
        .unwrap();
        (dir, conn)
    }

    #[test]
    fn test_impact_scenario() {
        let (_dir, conn) = setup_impact_graph();
        let result = analyze_node(&conn, "AUTH-svc", DEFAULT_DEPTH, DEFAULT_MAX_NODES).unwrap();

        assert_eq!(result.impact.downstream_direct, 2);
        assert_eq!(result.impact.downstream_transitive, 0);

        let upstream_refs: Vec<(&str, &str)> = result
            .upstream
            .iter()
            .map(|n| (n.ref_id.as_str(), n.edge_kind.as_str()))
            .collect();
        assert!(upstream_refs.contains(&("LIB-core", "depends_on")));
        assert!(upstream_refs.contains(&("DB-ent", "uses")));

        let downstream_refs: Vec<&str> =
            result.downstream.iter().map(|n| n.ref_id.as_str()).collect();
        assert!(downstream_refs.contains(&"FEAT-1"));
        assert!(downstream_refs.contains(&"FEAT-2"));
    }

    #[test]
    fn test_isolated_node() {
        let (_dir, conn) = setup_impact_graph();
        conn.execute(
            "INSERT INTO nodes (ref_id, kind, summary) VALUES ('island', 'domain', '')",
            [],
        )
        .unwrap();
        let result = analyze_node(&conn, "island", 3, 50).unwrap();
        assert!(result.upstream.is_empty());
        assert!(result.downstream.is_empty());
        assert_eq!(result.impact.downstream_direct, 0);
        assert_eq!(result.impact.doc_coverage, 100.0);
    }

    #[test]
    fn test_missing_node_error_with_suggestions() {
        let (_dir, conn) = setup_impact_graph();
        let err = analyze_node(&conn, "AUTH-svx", 3, 50).unwrap_err();
        match err {
            BeadloomError::RefNotFound { suggestions, .. } => {
                assert!(suggestions.contains(&"AUTH-svc".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_transitive_counting() {
        let (_dir, conn) = setup_impact_graph();
        conn.execute(
            "INSERT INTO nodes (ref_id, kind, summary) VALUES ('SUB-1', 'feature', '')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO edges (src_ref_id, dst_ref_id, kind) VALUES ('SUB-1', 'FEAT-1', 'part_of')",
            [],
        )
        .unwrap();
        let result = analyze_node(&conn, "AUTH-svc", 3, 50).unwrap();
        assert_eq!(result.impact.downstream_direct, 2);
        assert_eq!(result.impact.downstream_transitive, 1);
    }

    #[test]
    fn test_cycle_terminates() {
        let (_dir, conn) = setup_impact_graph();
        conn.execute(
            "INSERT INTO edges (src_ref_id, dst_ref_id, kind) VALUES ('LIB-core', 'AUTH-svc', 'uses')",
            [],
        )
        .unwrap();
        let result = analyze_node(&conn, "AUTH-svc", 5, 50).unwrap();
        // Traversal terminates and never revisits a node.
        let mut refs = HashSet::new();
        collect_refs(&result.upstream, &mut refs);
        assert!(refs.len() <= 50);
    }

    #[test]
    fn test_json_shape() {
        let (_dir, conn) = setup_impact_graph();
        let result = analyze_node(&conn, "AUTH-svc", 3, 50).unwrap();
        let value = result_to_json(&result);
        assert_eq!(value["node"]["ref_id"], "AUTH-svc");
        assert_eq!(value["impact"]["downstream_direct"], 2);
        assert!(value["upstream"].is_array());
        assert!(value["downstream"][0]["edge_kind"].is_string());
    }

    #[test]
    fn test_max_nodes_cap() {
        let (_dir, conn) = setup_impact_graph();
        let result = analyze_node(&conn, "AUTH-svc", 3, 1).unwrap();
        let mut refs = HashSet::new();
        collect_refs(&result.downstream, &mut refs);
        assert!(refs.len() <= 1);
    }
}
