//! Graph loader: parse YAML shards and load nodes/edges into the store.
//!
//! A graph directory (`.beadloom/_graph/`) holds one or more `*.yml` shards,
//! each with top-level `nodes:` and/or `edges:` lists. Shards are processed
//! in lexicographic filename order; loading is transactional per batch.

use crate::core::error::BeadloomError;
use crate::core::model::{EdgeKind, NodeKind};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Node fields with dedicated columns; everything else lands in `extra`.
const RESERVED_NODE_KEYS: &[&str] = &["ref_id", "kind", "summary", "source", "docs", "tags"];

/// A node entry as parsed from a YAML shard, before validation.
#[derive(Debug, Clone)]
pub struct ParsedNode {
    pub ref_id: String,
    pub kind: String,
    pub summary: String,
    pub source: Option<String>,
    pub docs: Vec<String>,
    pub tags: Vec<String>,
    /// Unknown top-level keys, preserved into the node's extra payload.
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ParsedEdge {
    pub src: String,
    pub dst: String,
    pub kind: String,
}

#[derive(Debug, Default)]
pub struct ParsedGraphFile {
    pub nodes: Vec<ParsedNode>,
    pub edges: Vec<ParsedEdge>,
}

/// Result of loading a graph directory into the store.
#[derive(Debug, Default)]
pub struct LoadResult {
    pub nodes_loaded: usize,
    pub edges_loaded: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

fn yaml_to_json(value: &serde_yaml::Value) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn string_list(value: Option<&serde_yaml::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_sequence())
        .map(|seq| {
            seq.iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a single YAML shard. An empty or null document yields empty lists.
pub fn parse_graph_file(path: &Path) -> Result<ParsedGraphFile, BeadloomError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(ParsedGraphFile::default());
    }
    let doc: serde_yaml::Value = serde_yaml::from_str(&content)?;
    let mut parsed = ParsedGraphFile::default();

    if let Some(nodes) = doc.get("nodes").and_then(|n| n.as_sequence()) {
        for entry in nodes {
            let Some(mapping) = entry.as_mapping() else {
                continue;
            };
            let get = |key: &str| mapping.get(serde_yaml::Value::from(key));
            let Some(ref_id) = get("ref_id").and_then(|v| v.as_str()) else {
                continue;
            };
            let kind = get("kind").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let summary = get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let source = get("source").and_then(|v| v.as_str()).map(str::to_string);

            let mut extra = Map::new();
            for (k, v) in mapping {
                let Some(key) = k.as_str() else { continue };
                if !RESERVED_NODE_KEYS.contains(&key) {
                    extra.insert(key.to_string(), yaml_to_json(v));
                }
            }

            parsed.nodes.push(ParsedNode {
                ref_id: ref_id.to_string(),
                kind,
                summary,
                source,
                docs: string_list(get("docs")),
                tags: string_list(get("tags")),
                extra,
            });
        }
    }

    if let Some(edges) = doc.get("edges").and_then(|e| e.as_sequence()) {
        for entry in edges {
            let Some(mapping) = entry.as_mapping() else {
                continue;
            };
            let get = |key: &str| {
                mapping
                    .get(serde_yaml::Value::from(key))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            let (src, dst, kind) = (get("src"), get("dst"), get("kind"));
            if !src.is_empty() && !dst.is_empty() {
                parsed.edges.push(ParsedEdge { src, dst, kind });
            }
        }
    }

    Ok(parsed)
}

/// Parse every `*.yml` shard under a graph directory, lexicographic order.
///
/// Duplicate ref_ids across shards are reported as errors; the first
/// occurrence wins and subsequent duplicates are dropped.
pub fn parse_graph_dir(graph_dir: &Path) -> Result<(ParsedGraphFile, Vec<String>), BeadloomError> {
    let mut combined = ParsedGraphFile::default();
    let mut errors = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    if !graph_dir.is_dir() {
        return Ok((combined, errors));
    }

    let mut shard_paths: Vec<_> = fs::read_dir(graph_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension().map(|ext| ext == "yml").unwrap_or(false)
                && p.file_name().map(|n| n != "rules.yml").unwrap_or(false)
        })
        .collect();
    shard_paths.sort();

    for shard in shard_paths {
        let parsed = parse_graph_file(&shard)?;
        for node in parsed.nodes {
            if seen.contains(&node.ref_id) {
                errors.push(format!(
                    "duplicate ref_id '{}' in {}",
                    node.ref_id,
                    shard.display()
                ));
                continue;
            }
            seen.insert(node.ref_id.clone());
            combined.nodes.push(node);
        }
        combined.edges.extend(parsed.edges);
    }

    Ok((combined, errors))
}

/// Load all shards from `graph_dir` into the store.
///
/// The full set of nodes and edges becomes visible atomically. Edges whose
/// endpoints are not in the combined node set are warnings and skipped.
/// Nodes present in the store but absent from disk are removed before the
/// upserts (orphan deletion); existing `extra` keys not supplied by YAML
/// survive the upsert.
pub fn load_graph(graph_dir: &Path, conn: &mut Connection) -> Result<LoadResult, BeadloomError> {
    let (parsed, errors) = parse_graph_dir(graph_dir)?;
    let mut result = LoadResult {
        errors,
        ..LoadResult::default()
    };

    let node_ids: HashSet<&str> = parsed.nodes.iter().map(|n| n.ref_id.as_str()).collect();

    let tx = conn.transaction()?;

    // Orphan deletion: ref_ids in the DB that no shard lists anymore.
    {
        let mut stmt = tx.prepare("SELECT ref_id FROM nodes")?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        for ref_id in existing {
            if !node_ids.contains(ref_id.as_str()) {
                tx.execute("DELETE FROM nodes WHERE ref_id = ?1", [&ref_id])?;
            }
        }
    }

    for node in &parsed.nodes {
        if NodeKind::parse(&node.kind).is_none() {
            result.warnings.push(format!(
                "node '{}' has unknown kind '{}', skipped",
                node.ref_id, node.kind
            ));
            continue;
        }

        // Merge YAML extra over any existing blob so reindex-produced keys
        // (routes, activity, tests, config) survive a graph reload.
        let existing_extra: Option<String> = {
            let mut stmt = tx.prepare("SELECT extra FROM nodes WHERE ref_id = ?1")?;
            let mut rows = stmt.query([&node.ref_id])?;
            match rows.next()? {
                Some(row) => Some(row.get::<_, String>(0)?),
                None => None,
            }
        };
        let mut extra: Map<String, Value> = existing_extra
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        for (k, v) in &node.extra {
            extra.insert(k.clone(), v.clone());
        }
        if !node.docs.is_empty() {
            extra.insert("docs".into(), serde_json::json!(node.docs));
        }
        if !node.tags.is_empty() {
            extra.insert("tags".into(), serde_json::json!(node.tags));
        }

        tx.execute(
            "INSERT INTO nodes (ref_id, kind, summary, source, extra)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(ref_id) DO UPDATE SET
               kind = excluded.kind,
               summary = excluded.summary,
               source = excluded.source,
               extra = excluded.extra",
            rusqlite::params![
                node.ref_id,
                node.kind,
                node.summary,
                node.source,
                serde_json::to_string(&extra)?,
            ],
        )?;
        result.nodes_loaded += 1;
    }

    tx.execute("DELETE FROM edges", [])?;
    for edge in &parsed.edges {
        if !node_ids.contains(edge.src.as_str()) || !node_ids.contains(edge.dst.as_str()) {
            result.warnings.push(format!(
                "edge {} -[{}]-> {} references a missing node, skipped",
                edge.src, edge.kind, edge.dst
            ));
            continue;
        }
        if EdgeKind::parse(&edge.kind).is_none() {
            result.warnings.push(format!(
                "edge {} -> {} has unknown kind '{}', skipped",
                edge.src, edge.dst, edge.kind
            ));
            continue;
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO edges (src_ref_id, dst_ref_id, kind) VALUES (?1, ?2, ?3)",
            rusqlite::params![edge.src, edge.dst, edge.kind],
        )?;
        result.edges_loaded += inserted;
    }

    tx.commit()?;
    Ok(result)
}

/// Map of `doc path -> ref_id` built from each node's `docs:` list.
///
/// A doc claimed by more than one node yields a warning; the first claim
/// wins.
pub fn doc_ref_map(parsed_nodes: &[ParsedNode]) -> (std::collections::BTreeMap<String, String>, Vec<String>) {
    let mut map = std::collections::BTreeMap::new();
    let mut warnings = Vec::new();
    for node in parsed_nodes {
        for doc in &node.docs {
            if let Some(prev) = map.get(doc) {
                warnings.push(format!(
                    "doc '{}' referenced by both '{}' and '{}', keeping '{}'",
                    doc, prev, node.ref_id, prev
                ));
            } else {
                map.insert(doc.clone(), node.ref_id.clone());
            }
        }
    }
    (map, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{ensure_schema, open_db};
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Connection, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let conn = open_db(&dir.path().join("test.db")).unwrap();
        ensure_schema(&conn).unwrap();
        let graph_dir = dir.path().join(".beadloom").join("_graph");
        fs::create_dir_all(&graph_dir).unwrap();
        (dir, conn, graph_dir)
    }

    #[test]
    fn test_parse_nodes() {
        let (_dir, _conn, graph_dir) = setup();
        let yml = graph_dir.join("domains.yml");
        fs::write(
            &yml,
            "nodes:\n  - ref_id: routing\n    kind: domain\n    summary: \"Routing domain\"\n",
        )
        .unwrap();
        let result = parse_graph_file(&yml).unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].ref_id, "routing");
        assert_eq!(result.nodes[0].kind, "domain");
    }

    #[test]
    fn test_parse_edges_and_docs() {
        let (_dir, _conn, graph_dir) = setup();
        let yml = graph_dir.join("features.yml");
        fs::write(
            &yml,
            "nodes:\n  - ref_id: PROJ-1\n    kind: feature\n    summary: \"F\"\n    docs:\n      - docs/spec.md\n      - docs/api.md\nedges:\n  - src: PROJ-1\n    dst: routing\n    kind: part_of\n",
        )
        .unwrap();
        let result = parse_graph_file(&yml).unwrap();
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].src, "PROJ-1");
        assert_eq!(result.nodes[0].docs, vec!["docs/spec.md", "docs/api.md"]);
    }

    #[test]
    fn test_parse_unknown_keys_into_extra() {
        let (_dir, _conn, graph_dir) = setup();
        let yml = graph_dir.join("services.yml");
        fs::write(
            &yml,
            "nodes:\n  - ref_id: api-gw\n    kind: service\n    summary: \"API Gateway\"\n    source: src/api/\n    confidence: high\n",
        )
        .unwrap();
        let result = parse_graph_file(&yml).unwrap();
        let node = &result.nodes[0];
        assert_eq!(node.source.as_deref(), Some("src/api/"));
        assert_eq!(node.extra["confidence"], serde_json::json!("high"));
    }

    #[test]
    fn test_parse_empty_file() {
        let (_dir, _conn, graph_dir) = setup();
        let yml = graph_dir.join("empty.yml");
        fs::write(&yml, "").unwrap();
        let result = parse_graph_file(&yml).unwrap();
        assert!(result.nodes.is_empty());
        assert!(result.edges.is_empty());
    }

    #[test]
    fn test_load_nodes_and_edges() {
        let (_dir, mut conn, graph_dir) = setup();
        fs::write(
            graph_dir.join("all.yml"),
            "nodes:\n  - ref_id: svc\n    kind: service\n    summary: \"S\"\n  - ref_id: dom\n    kind: domain\n    summary: \"D\"\nedges:\n  - src: svc\n    dst: dom\n    kind: part_of\n",
        )
        .unwrap();
        let result = load_graph(&graph_dir, &mut conn).unwrap();
        assert_eq!(result.nodes_loaded, 2);
        assert_eq!(result.edges_loaded, 1);
        let (src, dst, kind): (String, String, String) = conn
            .query_row("SELECT src_ref_id, dst_ref_id, kind FROM edges", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!((src.as_str(), dst.as_str(), kind.as_str()), ("svc", "dom", "part_of"));
    }

    #[test]
    fn test_extra_fields_stored_as_json() {
        let (_dir, mut conn, graph_dir) = setup();
        fs::write(
            graph_dir.join("s.yml"),
            "nodes:\n  - ref_id: api\n    kind: service\n    summary: \"API\"\n    source: src/api/\n    confidence: high\n    team: backend\n",
        )
        .unwrap();
        load_graph(&graph_dir, &mut conn).unwrap();
        let (source, extra): (String, String) = conn
            .query_row(
                "SELECT source, extra FROM nodes WHERE ref_id = 'api'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(source, "src/api/");
        let extra: Map<String, Value> = serde_json::from_str(&extra).unwrap();
        assert_eq!(extra["confidence"], serde_json::json!("high"));
        assert_eq!(extra["team"], serde_json::json!("backend"));
    }

    #[test]
    fn test_duplicate_ref_id_reported() {
        let (_dir, mut conn, graph_dir) = setup();
        fs::write(
            graph_dir.join("a.yml"),
            "nodes:\n  - ref_id: dup\n    kind: domain\n    summary: \"First\"\n",
        )
        .unwrap();
        fs::write(
            graph_dir.join("b.yml"),
            "nodes:\n  - ref_id: dup\n    kind: service\n    summary: \"Second\"\n",
        )
        .unwrap();
        let result = load_graph(&graph_dir, &mut conn).unwrap();
        assert!(!result.errors.is_empty());
        assert!(result.errors.iter().any(|e| e.contains("dup")));
        // First occurrence wins.
        let kind: String = conn
            .query_row("SELECT kind FROM nodes WHERE ref_id = 'dup'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kind, "domain");
    }

    #[test]
    fn test_broken_edge_warning() {
        let (_dir, mut conn, graph_dir) = setup();
        fs::write(
            graph_dir.join("f.yml"),
            "nodes:\n  - ref_id: feat1\n    kind: feature\n    summary: \"F\"\nedges:\n  - src: feat1\n    dst: nonexistent\n    kind: part_of\n",
        )
        .unwrap();
        let result = load_graph(&graph_dir, &mut conn).unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("nonexistent")));
        assert_eq!(result.edges_loaded, 0);
    }

    #[test]
    fn test_edges_across_files() {
        let (_dir, mut conn, graph_dir) = setup();
        fs::write(
            graph_dir.join("domains.yml"),
            "nodes:\n  - ref_id: dom\n    kind: domain\n    summary: \"D\"\n",
        )
        .unwrap();
        fs::write(
            graph_dir.join("features.yml"),
            "nodes:\n  - ref_id: feat\n    kind: feature\n    summary: \"F\"\nedges:\n  - src: feat\n    dst: dom\n    kind: part_of\n",
        )
        .unwrap();
        let result = load_graph(&graph_dir, &mut conn).unwrap();
        assert_eq!(result.nodes_loaded, 2);
        assert_eq!(result.edges_loaded, 1);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_orphan_nodes_removed_on_reload() {
        let (_dir, mut conn, graph_dir) = setup();
        fs::write(
            graph_dir.join("g.yml"),
            "nodes:\n  - ref_id: keep\n    kind: domain\n    summary: \"K\"\n  - ref_id: drop\n    kind: domain\n    summary: \"D\"\n",
        )
        .unwrap();
        load_graph(&graph_dir, &mut conn).unwrap();
        fs::write(
            graph_dir.join("g.yml"),
            "nodes:\n  - ref_id: keep\n    kind: domain\n    summary: \"K\"\n",
        )
        .unwrap();
        load_graph(&graph_dir, &mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM nodes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reload_preserves_reindex_extra_keys() {
        let (_dir, mut conn, graph_dir) = setup();
        fs::write(
            graph_dir.join("g.yml"),
            "nodes:\n  - ref_id: api\n    kind: service\n    summary: \"API\"\n",
        )
        .unwrap();
        load_graph(&graph_dir, &mut conn).unwrap();
        conn.execute(
            "UPDATE nodes SET extra = ?1 WHERE ref_id = 'api'",
            [r#"{"routes":[{"path":"/users"}]}"#],
        )
        .unwrap();
        load_graph(&graph_dir, &mut conn).unwrap();
        let extra: String = conn
            .query_row("SELECT extra FROM nodes WHERE ref_id = 'api'", [], |r| r.get(0))
            .unwrap();
        assert!(extra.contains("/users"));
    }

    #[test]
    fn test_doc_ref_map_conflict_warning() {
        let nodes = vec![
            ParsedNode {
                ref_id: "A1".into(),
                kind: "feature".into(),
                summary: String::new(),
                source: None,
                docs: vec!["docs/shared.md".into()],
                tags: vec![],
                extra: Map::new(),
            },
            ParsedNode {
                ref_id: "A2".into(),
                kind: "feature".into(),
                summary: String::new(),
                source: None,
                docs: vec!["docs/shared.md".into()],
                tags: vec![],
                extra: Map::new(),
            },
        ];
        let (map, warnings) = doc_ref_map(&nodes);
        assert_eq!(map["docs/shared.md"], "A1");
        assert_eq!(warnings.len(), 1);
    }
}
