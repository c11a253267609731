//! Indexing driver: full and incremental rebuild of the unified store.
//!
//! Full reindex truncates derived tables (docs, chunks, code_symbols,
//! code_imports, file_index) while preserving `nodes.extra`, sync_state,
//! rules, and snapshots. Incremental reindex skips files whose content
//! hash is unchanged, upgrading itself to full when the parser
//! fingerprint differs from the stored one.

use crate::core::code_indexer::{
    annotation_refs, extension_of, extract_symbols, parser_fingerprint, supported_extensions,
};
use crate::core::config::ProjectConfig;
use crate::core::deep_config::read_deep_config;
use crate::core::doc_indexer::index_docs;
use crate::core::error::BeadloomError;
use crate::core::git_activity::analyze_git_activity;
use crate::core::graph_loader::{doc_ref_map, load_graph, parse_graph_dir};
use crate::core::import_resolver::{index_file_imports, resolve_import_to_node};
use crate::core::model::merge_extra;
use crate::core::routes::extract_routes;
use crate::core::schemas::PARSER_FINGERPRINT_KEY;
use crate::core::search::populate_search_index;
use crate::core::store::{db_path, ensure_schema, meta_set, open_db, sha256_hex};
use crate::core::sync_engine::compute_symbols_hash;
use crate::core::test_mapper::map_tests;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct ReindexOptions {
    /// Force a full rebuild instead of the incremental default.
    pub full: bool,
    /// Override for the docs directory (default `<root>/docs`).
    pub docs_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ReindexResult {
    pub nodes_loaded: usize,
    pub edges_loaded: usize,
    pub docs_indexed: usize,
    pub chunks_indexed: usize,
    pub symbols_indexed: usize,
    pub imports_indexed: usize,
    pub nothing_changed: bool,
    /// Set when an incremental run delegated to full (fresh store or
    /// parser fingerprint change).
    pub upgraded_to_full: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileCategory {
    GraphShard,
    Doc,
    Source,
}

#[derive(Debug)]
struct TrackedFile {
    rel: String,
    abs: PathBuf,
    category: FileCategory,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn mtime_ns(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

fn rel_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Every file the incremental driver tracks, lexicographic by rel path.
fn collect_tracked_files(
    project_root: &Path,
    config: &ProjectConfig,
    docs_dir: &Path,
) -> Vec<TrackedFile> {
    let mut files = Vec::new();

    let graph_dir = project_root.join(".beadloom").join("_graph");
    if graph_dir.is_dir() {
        for entry in WalkDir::new(&graph_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.into_path();
            let is_shard = path.extension().map(|e| e == "yml").unwrap_or(false)
                && path.file_name().map(|n| n != "rules.yml").unwrap_or(false);
            if is_shard {
                files.push(TrackedFile {
                    rel: rel_str(project_root, &path),
                    abs: path,
                    category: FileCategory::GraphShard,
                });
            }
        }
    }

    if docs_dir.is_dir() {
        for entry in WalkDir::new(docs_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.into_path();
            if path.extension().map(|e| e == "md").unwrap_or(false) {
                files.push(TrackedFile {
                    rel: rel_str(project_root, &path),
                    abs: path,
                    category: FileCategory::Doc,
                });
            }
        }
    }

    let exts: HashSet<&str> = supported_extensions().iter().map(String::as_str).collect();
    for scan_path in config.scan_paths() {
        let base = project_root.join(&scan_path);
        if !base.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&base)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.into_path();
            let ext = extension_of(&path);
            if exts.contains(ext.as_str()) {
                files.push(TrackedFile {
                    rel: rel_str(project_root, &path),
                    abs: path,
                    category: FileCategory::Source,
                });
            }
        }
    }

    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    files
}

fn stored_fingerprint(conn: &Connection) -> Result<Option<String>, BeadloomError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT hash FROM file_index WHERE path = ?1",
            [PARSER_FINGERPRINT_KEY],
            |r| r.get(0),
        )
        .optional()?;
    Ok(value)
}

fn store_fingerprint(conn: &Connection) -> Result<(), BeadloomError> {
    conn.execute(
        "INSERT INTO file_index (path, hash, mtime_ns) VALUES (?1, ?2, 0)
         ON CONFLICT(path) DO UPDATE SET hash = excluded.hash",
        [PARSER_FINGERPRINT_KEY, &parser_fingerprint()],
    )?;
    Ok(())
}

fn upsert_file_index(conn: &Connection, rel: &str, hash: &str, mtime: i64) -> Result<(), BeadloomError> {
    conn.execute(
        "INSERT INTO file_index (path, hash, mtime_ns) VALUES (?1, ?2, ?3)
         ON CONFLICT(path) DO UPDATE SET hash = excluded.hash, mtime_ns = excluded.mtime_ns",
        rusqlite::params![rel, hash, mtime],
    )?;
    Ok(())
}

/// Replace one source file's derived symbol rows.
fn index_code_file(
    conn: &Connection,
    abs: &Path,
    rel: &str,
    hash: &str,
) -> Result<usize, BeadloomError> {
    conn.execute("DELETE FROM code_symbols WHERE file_path = ?1", [rel])?;
    conn.execute("DELETE FROM code_imports WHERE file_path = ?1", [rel])?;
    let symbols = extract_symbols(abs)?;
    let count = symbols.len();
    for sym in symbols {
        conn.execute(
            "INSERT INTO code_symbols
             (file_path, symbol_name, kind, line_start, line_end, annotations, file_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                rel,
                sym.symbol_name,
                sym.kind,
                sym.line_start,
                sym.line_end,
                serde_json::to_string(&sym.annotations)?,
                hash,
            ],
        )?;
    }
    Ok(count)
}

/// Re-resolve every stored import against the current node/symbol state.
fn reresolve_imports(conn: &Connection) -> Result<(), BeadloomError> {
    let rows: Vec<(String, i64, String, Option<String>)> = {
        let mut stmt = conn.prepare(
            "SELECT file_path, line_number, import_path, resolved_ref_id FROM code_imports",
        )?;
        let mapped = stmt.query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?;
        mapped.collect::<Result<_, _>>()?
    };
    for (file_path, line_number, import_path, prev) in rows {
        let resolved = resolve_import_to_node(&import_path, conn)?;
        if resolved != prev {
            conn.execute(
                "UPDATE code_imports SET resolved_ref_id = ?1
                 WHERE file_path = ?2 AND line_number = ?3 AND import_path = ?4",
                rusqlite::params![resolved, file_path, line_number, import_path],
            )?;
        }
    }
    Ok(())
}

/// Distinct code file paths annotated with `ref_id`.
fn code_paths_for_ref(conn: &Connection, ref_id: &str) -> Result<Vec<String>, BeadloomError> {
    let mut stmt = conn.prepare("SELECT DISTINCT file_path, annotations FROM code_symbols")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    let mut paths = BTreeSet::new();
    for (file_path, raw) in rows {
        let Ok(annotations) = serde_json::from_str::<BTreeMap<String, String>>(&raw) else {
            continue;
        };
        if annotation_refs(&annotations).iter().any(|r| r == ref_id) {
            paths.insert(file_path);
        }
    }
    Ok(paths.into_iter().collect())
}

/// Create sync-state rows for newly observed (doc, code) pairs. On a full
/// reindex the `symbols_hash` baseline of existing rows is recomputed;
/// incremental runs leave existing rows untouched.
fn ensure_sync_pairs(conn: &Connection, full: bool) -> Result<(), BeadloomError> {
    let refs: Vec<String> = {
        let mut stmt = conn.prepare("SELECT ref_id FROM nodes ORDER BY ref_id")?;
        let mapped = stmt.query_map([], |r| r.get(0))?;
        mapped.collect::<Result<_, _>>()?
    };

    for ref_id in refs {
        let docs: Vec<(String, String)> = {
            let mut stmt =
                conn.prepare("SELECT path, hash FROM docs WHERE ref_id = ?1 ORDER BY path")?;
            let mapped = stmt.query_map([&ref_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
            mapped.collect::<Result<_, _>>()?
        };
        if docs.is_empty() {
            continue;
        }
        let code_paths = code_paths_for_ref(conn, &ref_id)?;
        if code_paths.is_empty() {
            continue;
        }
        let symbols_hash = compute_symbols_hash(conn, &ref_id)?;

        for (doc_path, doc_hash) in &docs {
            for code_path in &code_paths {
                let code_hash: Option<String> = conn
                    .query_row(
                        "SELECT file_hash FROM code_symbols WHERE file_path = ?1 LIMIT 1",
                        [code_path],
                        |r| r.get(0),
                    )
                    .optional()?;
                conn.execute(
                    "INSERT OR IGNORE INTO sync_state
                     (doc_path, code_path, ref_id, code_hash_at_sync, doc_hash_at_sync,
                      synced_at, status, symbols_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'ok', ?7)",
                    rusqlite::params![
                        doc_path,
                        code_path,
                        ref_id,
                        code_hash.unwrap_or_default(),
                        doc_hash,
                        now_iso(),
                        symbols_hash,
                    ],
                )?;
            }
        }

        if full {
            conn.execute(
                "UPDATE sync_state SET symbols_hash = ?1 WHERE ref_id = ?2",
                rusqlite::params![symbols_hash, ref_id],
            )?;
        }
    }
    Ok(())
}

fn node_extra(conn: &Connection, ref_id: &str) -> Result<Map<String, Value>, BeadloomError> {
    let raw: Option<String> = conn
        .query_row("SELECT extra FROM nodes WHERE ref_id = ?1", [ref_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(raw
        .as_deref()
        .and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or_default())
}

fn write_node_extra(
    conn: &Connection,
    ref_id: &str,
    updates: &[(&str, Option<Value>)],
) -> Result<(), BeadloomError> {
    let existing = node_extra(conn, ref_id)?;
    let merged = merge_extra(&existing, updates);
    conn.execute(
        "UPDATE nodes SET extra = ?1 WHERE ref_id = ?2",
        rusqlite::params![serde_json::to_string(&Value::Object(merged))?, ref_id],
    )?;
    Ok(())
}

/// Recompute per-node auxiliary extras: routes, activity, tests, and the
/// root node's deep-config excerpt.
fn refresh_extras(
    conn: &Connection,
    project_root: &Path,
    tracked: &[TrackedFile],
) -> Result<(), BeadloomError> {
    let node_rows: Vec<(String, Option<String>)> = {
        let mut stmt = conn.prepare("SELECT ref_id, source FROM nodes ORDER BY ref_id")?;
        let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        mapped.collect::<Result<_, _>>()?
    };

    let mut source_dirs: BTreeMap<String, String> = BTreeMap::new();
    let mut root_node: Option<String> = None;
    for (ref_id, source) in &node_rows {
        match source.as_deref() {
            Some("") => {
                if root_node.is_none() {
                    root_node = Some(ref_id.clone());
                }
            }
            Some(src) if src.ends_with('/') || Path::new(src).extension().is_none() => {
                source_dirs.insert(ref_id.clone(), src.to_string());
            }
            _ => {}
        }
    }

    // Routes: per scanned source file, attributed to the longest matching
    // source-dir prefix.
    let mut routes_by_node: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for file in tracked.iter().filter(|f| f.category == FileCategory::Source) {
        let routes = extract_routes(&file.abs, &file.rel);
        if routes.is_empty() {
            continue;
        }
        let mut best: Option<(&String, usize)> = None;
        for (ref_id, src_dir) in &source_dirs {
            let prefix = src_dir.trim_end_matches('/');
            if file.rel == prefix || file.rel.starts_with(&format!("{prefix}/")) {
                if best.map(|(_, len)| prefix.len() > len).unwrap_or(true) {
                    best = Some((ref_id, prefix.len()));
                }
            }
        }
        if let Some((ref_id, _)) = best {
            let entry = routes_by_node.entry(ref_id.clone()).or_default();
            for route in routes {
                entry.push(serde_json::to_value(route)?);
            }
        }
    }
    for (ref_id, routes) in &routes_by_node {
        write_node_extra(conn, ref_id, &[("routes", Some(Value::Array(routes.clone())))])?;
    }

    // Activity: version-control history; absence of git is a no-op.
    let activity = analyze_git_activity(project_root, &source_dirs);
    for (ref_id, metrics) in &activity {
        write_node_extra(conn, ref_id, &[("activity", Some(serde_json::to_value(metrics)?))])?;
    }

    // Tests: naming convention + directory proximity + import analysis.
    let tests = map_tests(project_root, &source_dirs);
    for (ref_id, mapping) in &tests {
        write_node_extra(conn, ref_id, &[("tests", Some(serde_json::to_value(mapping)?))])?;
    }

    // Deep config on the root node (the node with an empty source).
    if let Some(root_ref) = root_node {
        let config = read_deep_config(project_root);
        write_node_extra(conn, &root_ref, &[("config", Some(Value::Object(config)))])?;
    }

    Ok(())
}

fn warn_missing_parsers(
    project_root: &Path,
    config: &ProjectConfig,
    warnings: &mut Vec<String>,
) {
    let available: HashSet<&str> = supported_extensions().iter().map(String::as_str).collect();
    let missing: Vec<String> = config
        .language_extensions()
        .into_iter()
        .filter(|ext| !available.contains(ext.as_str()))
        .collect();
    if missing.is_empty() {
        return;
    }
    // Tracked files only cover supported extensions; look at the scan
    // paths directly for files the missing grammars would have parsed.
    for ext in missing {
        let mut found = false;
        for scan_path in config.scan_paths() {
            let base = project_root.join(&scan_path);
            if !base.is_dir() {
                continue;
            }
            found = WalkDir::new(&base)
                .into_iter()
                .filter_map(|e| e.ok())
                .any(|e| {
                    e.file_type().is_file()
                        && e.path().to_string_lossy().ends_with(ext.as_str())
                });
            if found {
                break;
            }
        }
        if found {
            warnings.push(format!(
                "No parser available for {ext}; rebuild beadloom with the matching grammar feature"
            ));
        }
    }
}

fn finish(
    conn: &Connection,
    project_root: &Path,
    tracked: &[TrackedFile],
    full: bool,
) -> Result<(), BeadloomError> {
    ensure_sync_pairs(conn, full)?;
    refresh_extras(conn, project_root, tracked)?;
    populate_search_index(conn)?;
    meta_set(conn, "last_reindex_at", &now_iso())?;
    meta_set(conn, "beadloom_version", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

/// Full reindex: rebuild all derived state from disk.
pub fn full_reindex(
    project_root: &Path,
    opts: &ReindexOptions,
) -> Result<ReindexResult, BeadloomError> {
    let (config, config_warning) = ProjectConfig::load(project_root);
    let mut result = ReindexResult::default();
    result.warnings.extend(config_warning);

    let path = db_path(project_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut conn = open_db(&path)?;
    ensure_schema(&conn)?;

    let docs_dir = opts
        .docs_dir
        .clone()
        .unwrap_or_else(|| project_root.join("docs"));
    let graph_dir = project_root.join(".beadloom").join("_graph");

    // Truncate derived tables; nodes.extra, sync_state, rules, and
    // snapshots survive.
    conn.execute("DELETE FROM chunks", [])?;
    conn.execute("DELETE FROM docs", [])?;
    conn.execute("DELETE FROM code_symbols", [])?;
    conn.execute("DELETE FROM code_imports", [])?;
    conn.execute("DELETE FROM file_index", [])?;

    let load = load_graph(&graph_dir, &mut conn)?;
    result.nodes_loaded = load.nodes_loaded;
    result.edges_loaded = load.edges_loaded;
    result.warnings.extend(load.warnings);
    result.errors.extend(load.errors);

    let (parsed, _) = parse_graph_dir(&graph_dir)?;
    let (ref_map, doc_warnings) = doc_ref_map(&parsed.nodes);
    result.warnings.extend(doc_warnings);

    let doc_result = index_docs(&docs_dir, &mut conn, &ref_map)?;
    result.docs_indexed = doc_result.docs_indexed;
    result.chunks_indexed = doc_result.chunks_indexed;
    result.warnings.extend(doc_result.warnings);

    let tracked = collect_tracked_files(project_root, &config, &docs_dir);
    warn_missing_parsers(project_root, &config, &mut result.warnings);

    // Symbols first (imports resolve through code_symbols annotations).
    let mut hashes: BTreeMap<String, String> = BTreeMap::new();
    for file in &tracked {
        let Ok(content) = fs::read(&file.abs) else {
            result
                .warnings
                .push(format!("unreadable file skipped: {}", file.rel));
            continue;
        };
        let hash = sha256_hex(&content);
        upsert_file_index(&conn, &file.rel, &hash, mtime_ns(&file.abs))?;
        hashes.insert(file.rel.clone(), hash);
    }
    for file in tracked.iter().filter(|f| f.category == FileCategory::Source) {
        let Some(hash) = hashes.get(&file.rel) else {
            continue;
        };
        match index_code_file(&conn, &file.abs, &file.rel, hash) {
            Ok(count) => result.symbols_indexed += count,
            Err(e) => result
                .warnings
                .push(format!("failed to parse {}: {e}", file.rel)),
        }
    }
    for file in tracked.iter().filter(|f| f.category == FileCategory::Source) {
        let Some(hash) = hashes.get(&file.rel) else {
            continue;
        };
        result.imports_indexed += index_file_imports(&conn, &file.abs, &file.rel, hash)?;
    }

    store_fingerprint(&conn)?;
    finish(&conn, project_root, &tracked, true)?;
    Ok(result)
}

/// Incremental reindex: only files with changed content are re-parsed.
///
/// Delegates to [`full_reindex`] when the store is fresh or the parser
/// fingerprint changed. Reports `nothing_changed` without touching any
/// derived state when every tracked file is unchanged.
pub fn incremental_reindex(
    project_root: &Path,
    opts: &ReindexOptions,
) -> Result<ReindexResult, BeadloomError> {
    let path = db_path(project_root);
    if !path.exists() {
        let mut result = full_reindex(project_root, opts)?;
        result.upgraded_to_full = true;
        return Ok(result);
    }

    let (config, config_warning) = ProjectConfig::load(project_root);
    let mut conn = open_db(&path)?;
    ensure_schema(&conn)?;

    match stored_fingerprint(&conn)? {
        Some(stored) if stored == parser_fingerprint() => {}
        _ => {
            drop(conn);
            let mut result = full_reindex(project_root, opts)?;
            result.upgraded_to_full = true;
            return Ok(result);
        }
    }

    let mut result = ReindexResult::default();
    result.warnings.extend(config_warning);

    let docs_dir = opts
        .docs_dir
        .clone()
        .unwrap_or_else(|| project_root.join("docs"));
    let tracked = collect_tracked_files(project_root, &config, &docs_dir);
    warn_missing_parsers(project_root, &config, &mut result.warnings);

    let stored: BTreeMap<String, String> = {
        let mut stmt = conn.prepare("SELECT path, hash FROM file_index WHERE path != ?1")?;
        let mapped = stmt.query_map([PARSER_FINGERPRINT_KEY], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        mapped.collect::<Result<_, _>>()?
    };

    let mut changed: Vec<(&TrackedFile, String)> = Vec::new();
    let mut current_paths: HashSet<&str> = HashSet::new();
    for file in &tracked {
        current_paths.insert(file.rel.as_str());
        let Ok(content) = fs::read(&file.abs) else {
            result
                .warnings
                .push(format!("unreadable file skipped: {}", file.rel));
            continue;
        };
        let hash = sha256_hex(&content);
        if stored.get(&file.rel) != Some(&hash) {
            changed.push((file, hash));
        }
    }
    let deleted: Vec<&String> = stored
        .keys()
        .filter(|p| !current_paths.contains(p.as_str()))
        .collect();

    if changed.is_empty() && deleted.is_empty() {
        result.nothing_changed = true;
        return Ok(result);
    }

    let graph_changed = changed
        .iter()
        .any(|(f, _)| f.category == FileCategory::GraphShard)
        || deleted.iter().any(|p| p.starts_with(".beadloom/_graph/"));
    let code_changed = changed
        .iter()
        .any(|(f, _)| f.category == FileCategory::Source)
        || deleted
            .iter()
            .any(|p| !p.ends_with(".md") && !p.starts_with(".beadloom/"));

    let tx = conn.transaction()?;

    let docs_prefix = format!("{}/", rel_str(project_root, &docs_dir));
    for rel in &deleted {
        tx.execute("DELETE FROM docs WHERE path = ?1", [rel.as_str()])?;
        // Docs are stored relative to the docs root; try that form too.
        if let Some(stripped) = rel.strip_prefix(&docs_prefix) {
            tx.execute("DELETE FROM docs WHERE path = ?1", [stripped])?;
        }
        tx.execute("DELETE FROM code_symbols WHERE file_path = ?1", [rel.as_str()])?;
        tx.execute("DELETE FROM code_imports WHERE file_path = ?1", [rel.as_str()])?;
        tx.execute("DELETE FROM file_index WHERE path = ?1", [rel.as_str()])?;
    }

    for (file, hash) in &changed {
        match file.category {
            FileCategory::Source => {
                match index_code_file(&tx, &file.abs, &file.rel, hash) {
                    Ok(count) => result.symbols_indexed += count,
                    Err(e) => result
                        .warnings
                        .push(format!("failed to parse {}: {e}", file.rel)),
                }
                result.imports_indexed += index_file_imports(&tx, &file.abs, &file.rel, hash)?;
            }
            FileCategory::Doc | FileCategory::GraphShard => {}
        }
        upsert_file_index(&tx, &file.rel, hash, mtime_ns(&file.abs))?;
    }
    tx.commit()?;

    if graph_changed {
        let graph_dir = project_root.join(".beadloom").join("_graph");
        let load = load_graph(&graph_dir, &mut conn)?;
        result.nodes_loaded = load.nodes_loaded;
        result.edges_loaded = load.edges_loaded;
        result.warnings.extend(load.warnings);
        result.errors.extend(load.errors);
    } else {
        result.nodes_loaded = conn.query_row("SELECT count(*) FROM nodes", [], |r| r.get::<_, i64>(0))? as usize;
        result.edges_loaded = conn.query_row("SELECT count(*) FROM edges", [], |r| r.get::<_, i64>(0))? as usize;
    }

    let docs_changed = changed.iter().any(|(f, _)| f.category == FileCategory::Doc);
    if docs_changed || graph_changed {
        let graph_dir = project_root.join(".beadloom").join("_graph");
        let (parsed, _) = parse_graph_dir(&graph_dir)?;
        let (ref_map, doc_warnings) = doc_ref_map(&parsed.nodes);
        result.warnings.extend(doc_warnings);
        let doc_result = index_docs(&docs_dir, &mut conn, &ref_map)?;
        result.docs_indexed = doc_result.docs_indexed;
        result.chunks_indexed = doc_result.chunks_indexed;
        result.warnings.extend(doc_result.warnings);
    }

    if graph_changed || code_changed {
        reresolve_imports(&conn)?;
    }

    finish(&conn, project_root, &tracked, false)?;
    Ok(result)
}

/// Dispatch on the requested mode.
pub fn reindex(project_root: &Path, opts: &ReindexOptions) -> Result<ReindexResult, BeadloomError> {
    if opts.full {
        full_reindex(project_root, opts)
    } else {
        incremental_reindex(project_root, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn minimal_project(dir: &tempfile::TempDir) -> PathBuf {
        let project = dir.path().join("proj");
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
    fn test_full_reindex_counts() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: F1\n    kind: feature\n    summary: Feature 1\n  - ref_id: F2\n    kind: feature\n    summary: Feature 2\nedges:\n  - src: F1\n    dst: F2\n    kind: depends_on\n",
        );
        write(&project, "docs/overview.md", "## Overview\n\nProject overview.\n");
        write(&project, "src/app.py", "# beadloom:feature=F1\ndef handler():\n    pass\n");

        let result = full_reindex(&project, &ReindexOptions::default()).unwrap();
        assert_eq!(result.nodes_loaded, 2);
        assert_eq!(result.edges_loaded, 1);
        assert_eq!(result.docs_indexed, 1);
        assert_eq!(result.symbols_indexed, 1);
        assert!(db_path(&project).exists());
    }

    #[test]
    fn test_empty_project() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        let result = full_reindex(&project, &ReindexOptions::default()).unwrap();
        assert_eq!(result.nodes_loaded, 0);
        assert_eq!(result.docs_indexed, 0);
        assert_eq!(result.symbols_indexed, 0);
    }

    #[test]
    fn test_incremental_nothing_changed() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: F1\n    kind: feature\n    summary: F\n",
        );
        write(&project, "docs/spec.md", "## Spec\n\nContent.\n");

        let first = incremental_reindex(&project, &ReindexOptions::default()).unwrap();
        assert!(first.upgraded_to_full);

        let second = incremental_reindex(&project, &ReindexOptions::default()).unwrap();
        assert!(second.nothing_changed);
        assert_eq!(second.symbols_indexed, 0);
        assert_eq!(second.docs_indexed, 0);
    }

    #[test]
    fn test_incremental_picks_up_changed_file() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: auth\n    kind: domain\n    summary: Auth\n",
        );
        write(&project, "src/auth/core.py", "# beadloom:domain=auth\ndef login(): pass\n");
        incremental_reindex(&project, &ReindexOptions::default()).unwrap();

        write(
            &project,
            "src/auth/core.py",
            "# beadloom:domain=auth\ndef login(): pass\n\ndef logout(): pass\n",
        );
        let result = incremental_reindex(&project, &ReindexOptions::default()).unwrap();
        assert!(!result.nothing_changed);
        assert_eq!(result.symbols_indexed, 2);

        let conn = open_db(&db_path(&project)).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM code_symbols", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_incremental_removes_deleted_file_rows() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: auth\n    kind: domain\n    summary: Auth\n",
        );
        write(&project, "src/auth/core.py", "def login(): pass\n");
        incremental_reindex(&project, &ReindexOptions::default()).unwrap();

        fs::remove_file(project.join("src/auth/core.py")).unwrap();
        let result = incremental_reindex(&project, &ReindexOptions::default()).unwrap();
        assert!(!result.nothing_changed);

        let conn = open_db(&db_path(&project)).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM code_symbols", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_symbols_hash_preserved_by_incremental() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: auth\n    kind: domain\n    summary: Auth\n    source: src/auth/\n    docs:\n      - docs/auth.md\n",
        );
        write(&project, "docs/auth.md", "## Spec\n\nAuth handler module.\n");
        write(&project, "src/auth/core.py", "# beadloom:domain=auth\ndef login(): pass\n");
        incremental_reindex(&project, &ReindexOptions::default()).unwrap();

        let conn = open_db(&db_path(&project)).unwrap();
        let baseline: String = conn
            .query_row("SELECT symbols_hash FROM sync_state LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert!(!baseline.is_empty());
        drop(conn);

        // Add a symbol; incremental keeps the stored baseline.
        write(
            &project,
            "src/auth/core.py",
            "# beadloom:domain=auth\ndef login(): pass\n\ndef logout(): pass\n",
        );
        incremental_reindex(&project, &ReindexOptions::default()).unwrap();
        let conn = open_db(&db_path(&project)).unwrap();
        let after: String = conn
            .query_row("SELECT symbols_hash FROM sync_state LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(baseline, after);
        // The recomputed digest now differs from the preserved baseline.
        let current = compute_symbols_hash(&conn, "auth").unwrap();
        assert_ne!(current, baseline);
    }

    #[test]
    fn test_full_reindex_preserves_unknown_extra() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: api\n    kind: service\n    summary: API\n",
        );
        full_reindex(&project, &ReindexOptions::default()).unwrap();

        let conn = open_db(&db_path(&project)).unwrap();
        conn.execute(
            "UPDATE nodes SET extra = '{\"owner\":\"platform-team\"}' WHERE ref_id = 'api'",
            [],
        )
        .unwrap();
        drop(conn);

        full_reindex(&project, &ReindexOptions::default()).unwrap();
        let conn = open_db(&db_path(&project)).unwrap();
        let extra: String = conn
            .query_row("SELECT extra FROM nodes WHERE ref_id = 'api'", [], |r| r.get(0))
            .unwrap();
        assert!(extra.contains("platform-team"));
    }

    #[test]
    fn test_root_node_gets_config_extra() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: myproject\n    kind: domain\n    summary: Root\n    source: ''\n",
        );
        write(
            &project,
            "pyproject.toml",
            "[project.scripts]\nmyproject = \"myproject.cli:main\"\n",
        );
        full_reindex(&project, &ReindexOptions::default()).unwrap();

        let conn = open_db(&db_path(&project)).unwrap();
        let extra: String = conn
            .query_row("SELECT extra FROM nodes WHERE ref_id = 'myproject'", [], |r| {
                r.get(0)
            })
            .unwrap();
        let extra: Map<String, Value> = serde_json::from_str(&extra).unwrap();
        assert_eq!(
            extra["config"]["scripts"]["myproject"],
            serde_json::json!("myproject.cli:main")
        );
    }

    #[test]
    fn test_routes_stored_in_node_extra() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: api-svc\n    kind: service\n    summary: API\n    source: src/api/\n",
        );
        write(
            &project,
            "src/api/routes.py",
            "@app.get(\"/users\")\ndef list_users(): pass\n\n@app.post(\"/users\")\ndef create_user(): pass\n",
        );
        full_reindex(&project, &ReindexOptions::default()).unwrap();

        let conn = open_db(&db_path(&project)).unwrap();
        let extra: String = conn
            .query_row("SELECT extra FROM nodes WHERE ref_id = 'api-svc'", [], |r| r.get(0))
            .unwrap();
        let extra: Map<String, Value> = serde_json::from_str(&extra).unwrap();
        let routes = extra["routes"].as_array().unwrap();
        assert!(routes.len() >= 2);
        for route in routes {
            for key in ["method", "path", "handler", "file", "line", "framework"] {
                assert!(route.get(key).is_some(), "missing {key}");
            }
        }
    }

    #[test]
    fn test_full_reindex_idempotent_derived_tables() {
        let dir = tempdir().unwrap();
        let project = minimal_project(&dir);
        write(
            &project,
            ".beadloom/_graph/graph.yml",
            "nodes:\n  - ref_id: F1\n    kind: feature\n    summary: F\n",
        );
        write(&project, "docs/spec.md", "## Spec\n\nBody.\n");
        write(&project, "src/app.py", "# beadloom:feature=F1\ndef handler(): pass\n");

        full_reindex(&project, &ReindexOptions::default()).unwrap();
        let conn = open_db(&db_path(&project)).unwrap();
        let snapshot_tables = |conn: &Connection| -> (i64, i64, i64, i64) {
            (
                conn.query_row("SELECT count(*) FROM docs", [], |r| r.get(0)).unwrap(),
                conn.query_row("SELECT count(*) FROM chunks", [], |r| r.get(0)).unwrap(),
                conn.query_row("SELECT count(*) FROM code_symbols", [], |r| r.get(0)).unwrap(),
                conn.query_row("SELECT count(*) FROM code_imports", [], |r| r.get(0)).unwrap(),
            )
        };
        let first = snapshot_tables(&conn);
        drop(conn);

        full_reindex(&project, &ReindexOptions::default()).unwrap();
        let conn = open_db(&db_path(&project)).unwrap();
        assert_eq!(first, snapshot_tables(&conn));
    }
}
