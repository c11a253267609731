//! RPC tool server: newline-delimited JSON request/response over stdio.
//!
//! Agents send one JSON object per line: `{"id": ..., "tool": ...,
//! "arguments": {...}}`. The reserved tool name `list_tools` returns the
//! declared schemas. Every request opens its own store connection and
//! closes it when done.

use crate::core::context::{
    bfs_subgraph, build_context, DEFAULT_DEPTH, DEFAULT_MAX_CHUNKS, DEFAULT_MAX_NODES,
};
use crate::core::diff::{compute_diff, diff_to_json};
use crate::core::error::BeadloomError;
use crate::core::linter::lint;
use crate::core::search::search_nodes;
use crate::core::snapshot::compute_diff_from_snapshot;
use crate::core::store::{db_path, ensure_schema, meta_get, open_db};
use crate::core::sync_engine::{check_sync, mark_synced};
use crate::core::why::{analyze_node, result_to_json};
use crate::plugins::docs_audit::generate_skeletons;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::{BufRead, Write};
use std::path::Path;

/// Standard RPC request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Standard RPC response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        RpcResponse {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, message: impl Into<String>) -> Self {
        RpcResponse {
            id,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Declared tool schema, served by `list_tools`.
pub fn tool_specs() -> Vec<Value> {
    let ref_arg = json!({"type": "string", "description": "Node identifier (e.g. PROJ-123, routing)"});
    vec![
        json!({
            "name": "get_context",
            "description": "Get a compact context bundle for a node: graph, doc chunks, code symbols, constraints, sync status.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "ref_id": ref_arg,
                    "depth": {"type": "integer", "default": 2},
                    "max_nodes": {"type": "integer", "default": 20},
                    "max_chunks": {"type": "integer", "default": 10}
                },
                "required": ["ref_id"]
            }
        }),
        json!({
            "name": "get_graph",
            "description": "Get a subgraph around a node as nodes and edges.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "ref_id": ref_arg,
                    "depth": {"type": "integer", "default": 2}
                },
                "required": ["ref_id"]
            }
        }),
        json!({
            "name": "list_nodes",
            "description": "List graph nodes, optionally filtered by kind.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "kind": {"type": "string", "enum": ["domain", "feature", "service", "entity", "adr"]}
                }
            }
        }),
        json!({
            "name": "sync_check",
            "description": "Check whether documentation is in sync with code; returns stale pairs with reasons.",
            "input_schema": {
                "type": "object",
                "properties": { "ref_id": ref_arg }
            }
        }),
        json!({
            "name": "get_status",
            "description": "Project index statistics: counts, coverage, last reindex.",
            "input_schema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "update_node",
            "description": "Patch a node's summary or extra keys.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "ref_id": ref_arg,
                    "summary": {"type": "string"},
                    "extra": {"type": "object"}
                },
                "required": ["ref_id"]
            }
        }),
        json!({
            "name": "mark_synced",
            "description": "Record the current doc/code state as the sync baseline for a node.",
            "input_schema": {
                "type": "object",
                "properties": { "ref_id": ref_arg },
                "required": ["ref_id"]
            }
        }),
        json!({
            "name": "search",
            "description": "Full-text search over node summaries and doc content.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "kind": {"type": "string"},
                    "limit": {"type": "integer", "default": 10}
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "generate_docs",
            "description": "Create skeleton docs for nodes without documentation.",
            "input_schema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "prime",
            "description": "Orientation payload: project summary, node index, and how to query.",
            "input_schema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "why",
            "description": "Impact analysis: upstream dependencies and downstream dependents of a node.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "ref_id": ref_arg,
                    "depth": {"type": "integer", "default": 3}
                },
                "required": ["ref_id"]
            }
        }),
        json!({
            "name": "diff",
            "description": "Graph diff since a git ref or against a stored snapshot.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "since": {"type": "string", "default": "HEAD"},
                    "snapshot_id": {"type": "integer"}
                }
            }
        }),
        json!({
            "name": "lint",
            "description": "Evaluate architecture rules; returns violations.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "no_reindex": {"type": "boolean", "default": false}
                }
            }
        }),
    ]
}

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn arg_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn require_ref(args: &Value) -> Result<String, BeadloomError> {
    arg_str(args, "ref_id")
        .ok_or_else(|| BeadloomError::Validation("missing required argument 'ref_id'".into()))
}

fn handle_list_nodes(conn: &Connection, kind: Option<&str>) -> Result<Value, BeadloomError> {
    let mut nodes = Vec::new();
    let mut push = |ref_id: String, kind: String, summary: String| {
        nodes.push(json!({"ref_id": ref_id, "kind": kind, "summary": summary}));
    };
    match kind {
        Some(k) => {
            let mut stmt = conn.prepare(
                "SELECT ref_id, kind, summary FROM nodes WHERE kind = ?1 ORDER BY ref_id",
            )?;
            let rows = stmt.query_map([k], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
            })?;
            for row in rows {
                let (a, b, c) = row?;
                push(a, b, c);
            }
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT ref_id, kind, summary FROM nodes ORDER BY ref_id")?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
            })?;
            for row in rows {
                let (a, b, c) = row?;
                push(a, b, c);
            }
        }
    }
    Ok(Value::Array(nodes))
}

fn handle_get_status(conn: &Connection) -> Result<Value, BeadloomError> {
    let count = |sql: &str| -> Result<i64, BeadloomError> {
        Ok(conn.query_row(sql, [], |r| r.get(0))?)
    };
    Ok(json!({
        "nodes_count": count("SELECT count(*) FROM nodes")?,
        "edges_count": count("SELECT count(*) FROM edges")?,
        "docs_count": count("SELECT count(*) FROM docs")?,
        "chunks_count": count("SELECT count(*) FROM chunks")?,
        "symbols_count": count("SELECT count(*) FROM code_symbols")?,
        "stale_count": count("SELECT count(*) FROM sync_state WHERE status = 'stale'")?,
        "doc_coverage": count(
            "SELECT count(DISTINCT n.ref_id) FROM nodes n JOIN docs d ON d.ref_id = n.ref_id"
        )?,
        "last_reindex": meta_get(conn, "last_reindex_at")?,
        "beadloom_version": meta_get(conn, "beadloom_version")?,
    }))
}

fn handle_update_node(conn: &Connection, args: &Value) -> Result<Value, BeadloomError> {
    let ref_id = require_ref(args)?;
    let existing: Option<String> = conn
        .query_row("SELECT extra FROM nodes WHERE ref_id = ?1", [&ref_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(existing) = existing else {
        return Err(BeadloomError::RefNotFound {
            ref_id,
            suggestions: Vec::new(),
        });
    };

    if let Some(summary) = arg_str(args, "summary") {
        conn.execute(
            "UPDATE nodes SET summary = ?1 WHERE ref_id = ?2",
            rusqlite::params![summary, ref_id],
        )?;
    }
    if let Some(Value::Object(patch)) = args.get("extra") {
        let mut extra: Map<String, Value> =
            serde_json::from_str(&existing).unwrap_or_default();
        for (key, value) in patch {
            if value.is_null() {
                extra.remove(key);
            } else {
                extra.insert(key.clone(), value.clone());
            }
        }
        conn.execute(
            "UPDATE nodes SET extra = ?1 WHERE ref_id = ?2",
            rusqlite::params![serde_json::to_string(&extra)?, ref_id],
        )?;
    }
    Ok(json!({"updated": ref_id}))
}

fn handle_prime(conn: &Connection) -> Result<Value, BeadloomError> {
    let status = handle_get_status(conn)?;
    let nodes = handle_list_nodes(conn, None)?;
    Ok(json!({
        "project": "Beadloom context oracle",
        "instructions": "Query get_context with a ref_id before editing code in that area; run sync_check to find stale docs; lint validates architecture rules.",
        "status": status,
        "nodes": nodes,
    }))
}

/// Route one tool call to its handler.
pub fn dispatch_tool(
    conn: &Connection,
    project_root: &Path,
    tool: &str,
    args: &Value,
) -> Result<Value, BeadloomError> {
    match tool {
        "get_context" => {
            let ref_id = require_ref(args)?;
            build_context(
                conn,
                &[ref_id],
                arg_usize(args, "depth", DEFAULT_DEPTH),
                arg_usize(args, "max_nodes", DEFAULT_MAX_NODES),
                arg_usize(args, "max_chunks", DEFAULT_MAX_CHUNKS),
            )
        }
        "get_graph" => {
            let ref_id = require_ref(args)?;
            let (nodes, edges) = bfs_subgraph(
                conn,
                &[ref_id],
                arg_usize(args, "depth", DEFAULT_DEPTH),
                DEFAULT_MAX_NODES,
            )?;
            Ok(json!({"nodes": nodes, "edges": edges}))
        }
        "list_nodes" => handle_list_nodes(conn, arg_str(args, "kind").as_deref()),
        "sync_check" => {
            let docs_dir = project_root.join("docs");
            let mut entries = check_sync(conn, project_root, &docs_dir)?;
            if let Some(ref_id) = arg_str(args, "ref_id") {
                entries.retain(|e| e.ref_id == ref_id);
            }
            Ok(serde_json::to_value(entries)?)
        }
        "get_status" => handle_get_status(conn),
        "update_node" => handle_update_node(conn, args),
        "mark_synced" => {
            let ref_id = require_ref(args)?;
            let updated = mark_synced(conn, &ref_id)?;
            Ok(json!({"marked": ref_id, "pairs": updated}))
        }
        "search" => {
            let query = arg_str(args, "query")
                .ok_or_else(|| BeadloomError::Validation("missing required argument 'query'".into()))?;
            let results = search_nodes(
                conn,
                &query,
                arg_str(args, "kind").as_deref(),
                arg_usize(args, "limit", 10),
            )?;
            Ok(serde_json::to_value(results)?)
        }
        "generate_docs" => {
            let created = generate_skeletons(project_root)?;
            Ok(json!({"created": created}))
        }
        "prime" => handle_prime(conn),
        "why" => {
            let ref_id = require_ref(args)?;
            let result = analyze_node(
                conn,
                &ref_id,
                arg_usize(args, "depth", crate::core::why::DEFAULT_DEPTH),
                crate::core::why::DEFAULT_MAX_NODES,
            )?;
            Ok(result_to_json(&result))
        }
        "diff" => {
            if let Some(snapshot_id) = args.get("snapshot_id").and_then(Value::as_i64) {
                let diff = compute_diff_from_snapshot(conn, snapshot_id)?;
                Ok(diff_to_json(&diff))
            } else {
                let since = arg_str(args, "since").unwrap_or_else(|| "HEAD".to_string());
                let diff = compute_diff(project_root, &since)?;
                Ok(diff_to_json(&diff))
            }
        }
        "lint" => {
            let no_reindex = args
                .get("no_reindex")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let result = lint(project_root, None, !no_reindex)?;
            Ok(serde_json::from_str(&crate::core::linter::format_json(&result))?)
        }
        other => Err(BeadloomError::Validation(format!("unknown tool: {other}"))),
    }
}

fn handle_line(project_root: &Path, line: &str) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => return RpcResponse::err(Value::Null, format!("malformed request: {e}")),
    };

    if request.tool == "list_tools" {
        return RpcResponse::ok(request.id, json!({"tools": tool_specs()}));
    }

    let conn = match open_db(&db_path(project_root)) {
        Ok(conn) => conn,
        Err(e) => return RpcResponse::err(request.id, e.to_string()),
    };
    if let Err(e) = ensure_schema(&conn) {
        return RpcResponse::err(request.id, e.to_string());
    }

    match dispatch_tool(&conn, project_root, &request.tool, &request.arguments) {
        Ok(result) => RpcResponse::ok(request.id, result),
        Err(e) => RpcResponse::err(request.id, e.to_string()),
    }
}

/// Serve requests from `input` to `output`, one JSON object per line,
/// until EOF. Blank lines are ignored.
pub fn serve<R: BufRead, W: Write>(
    project_root: &Path,
    input: R,
    mut output: W,
) -> Result<(), BeadloomError> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(project_root, &line);
        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    Ok(())
}

/// Serve on the process stdio streams (the `mcp-serve` verb).
pub fn serve_stdio(project_root: &Path) -> Result<(), BeadloomError> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(project_root, stdin.lock(), stdout.lock())
}
