//! Sync/drift engine: three-layer staleness detection between docs and code.
//!
//! Layer 1 compares the stored symbols-hash baseline against the current
//! symbol set. Layer 2 checks source-directory coverage for untracked
//! files. Layer 3 checks that module-name stems under a node's source
//! directory are mentioned in its linked docs. A node is stale when any
//! layer flags it.

use crate::core::code_indexer::{annotation_refs, supported_extensions};
use crate::core::error::BeadloomError;
use crate::core::store::symbols_digest;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Conventional non-code files excluded from source coverage.
const COVERAGE_EXCLUDED: &[&str] = &["__init__.py", "conftest.py", "__main__.py"];

/// One sync-check finding.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncEntry {
    pub ref_id: String,
    pub doc_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_path: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub untracked_files: Vec<String>,
}

/// Current symbol-set digest for a ref_id: `name:kind` tokens of every
/// symbol annotated to it, sorted and hashed.
pub fn compute_symbols_hash(conn: &Connection, ref_id: &str) -> Result<String, BeadloomError> {
    let mut stmt = conn.prepare("SELECT symbol_name, kind, annotations FROM code_symbols")?;
    let rows: Vec<(String, String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<_, _>>()?;
    let mut symbols = Vec::new();
    for (name, kind, raw) in rows {
        let Ok(annotations) = serde_json::from_str::<BTreeMap<String, String>>(&raw) else {
            continue;
        };
        if annotation_refs(&annotations).iter().any(|r| r == ref_id) {
            symbols.push((name, kind));
        }
    }
    Ok(symbols_digest(&symbols))
}

/// Layer 1: hash drift. Compares each sync-state row's stored
/// `symbols_hash` to the currently computed digest for that ref_id.
/// Mismatching rows are flipped to stale with reason `symbols_changed`.
/// Baselines themselves are never mutated here.
pub fn check_symbol_drift(conn: &Connection) -> Result<Vec<SyncEntry>, BeadloomError> {
    let rows: Vec<(String, String, String, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT ref_id, doc_path, code_path, status, symbols_hash FROM sync_state
             ORDER BY doc_path, code_path",
        )?;
        let mapped = stmt.query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })?;
        mapped.collect::<Result<_, _>>()?
    };

    let mut current_by_ref: BTreeMap<String, String> = BTreeMap::new();
    let mut entries = Vec::new();
    for (ref_id, doc_path, code_path, status, stored_hash) in rows {
        // Rows without a baseline (older stores) are not flagged.
        if stored_hash.is_empty() {
            continue;
        }
        let current = match current_by_ref.get(&ref_id) {
            Some(hash) => hash.clone(),
            None => {
                let hash = compute_symbols_hash(conn, &ref_id)?;
                current_by_ref.insert(ref_id.clone(), hash.clone());
                hash
            }
        };
        if current != stored_hash {
            conn.execute(
                "UPDATE sync_state SET status = 'stale'
                 WHERE ref_id = ?1 AND doc_path = ?2 AND code_path = ?3",
                rusqlite::params![ref_id, doc_path, code_path],
            )?;
            entries.push(SyncEntry {
                ref_id,
                doc_path,
                code_path: Some(code_path),
                status: "stale".to_string(),
                reason: Some("symbols_changed".to_string()),
                missing_modules: Vec::new(),
                untracked_files: Vec::new(),
            });
        } else if status == "stale" {
            // Drift resolved (e.g. after mark_synced); reflect it.
            conn.execute(
                "UPDATE sync_state SET status = 'ok'
                 WHERE ref_id = ?1 AND doc_path = ?2 AND code_path = ?3",
                rusqlite::params![ref_id, doc_path, code_path],
            )?;
        }
    }
    Ok(entries)
}

/// Nodes with a directory source and at least one linked doc.
fn nodes_with_source_and_doc(
    conn: &Connection,
) -> Result<Vec<(String, String, String)>, BeadloomError> {
    let mut stmt = conn.prepare(
        "SELECT n.ref_id, n.source, d.path FROM nodes n
         JOIN docs d ON d.ref_id = n.ref_id
         WHERE n.source IS NOT NULL AND n.source != ''
         ORDER BY n.ref_id, d.path",
    )?;
    let rows: Vec<(String, String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<_, _>>()?;
    // One doc per node is enough for coverage purposes; keep the first.
    let mut seen = BTreeMap::new();
    for (ref_id, source, doc_path) in rows {
        seen.entry(ref_id).or_insert((source, doc_path));
    }
    Ok(seen
        .into_iter()
        .map(|(ref_id, (source, doc))| (ref_id, source, doc))
        .collect())
}

fn is_tracked(conn: &Connection, ref_id: &str, rel_path: &str) -> Result<bool, BeadloomError> {
    let in_sync: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sync_state WHERE code_path = ?1 LIMIT 1",
            [rel_path],
            |r| r.get(0),
        )
        .optional()?;
    if in_sync.is_some() {
        return Ok(true);
    }
    let annotations: Vec<String> = {
        let mut stmt =
            conn.prepare("SELECT annotations FROM code_symbols WHERE file_path = ?1")?;
        let mapped = stmt.query_map([rel_path], |r| r.get(0))?;
        mapped.collect::<Result<_, _>>()?
    };
    for raw in annotations {
        let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(&raw) else {
            continue;
        };
        if annotation_refs(&map).iter().any(|r| r == ref_id) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Layer 2: source coverage. Files under a node's source directory that
/// are referenced neither by a sync-state row nor by annotated symbols.
pub fn check_source_coverage(
    conn: &Connection,
    project_root: &Path,
) -> Result<Vec<SyncEntry>, BeadloomError> {
    let exts: Vec<&str> = supported_extensions().iter().map(String::as_str).collect();
    let mut entries = Vec::new();

    for (ref_id, source, doc_path) in nodes_with_source_and_doc(conn)? {
        let source_dir = project_root.join(source.trim_end_matches('/'));
        // Single-file sources are layer-1 territory; directories only.
        if !source_dir.is_dir() {
            continue;
        }

        let mut untracked = Vec::new();
        let mut files: Vec<_> = WalkDir::new(&source_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();

        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if COVERAGE_EXCLUDED.contains(&name.as_str()) {
                continue;
            }
            let ext = crate::core::code_indexer::extension_of(&file);
            if !exts.contains(&ext.as_str()) {
                continue;
            }
            let rel = file
                .strip_prefix(project_root)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            if !is_tracked(conn, &ref_id, &rel)? {
                untracked.push(rel);
            }
        }

        if !untracked.is_empty() {
            entries.push(SyncEntry {
                ref_id,
                doc_path,
                code_path: None,
                status: "stale".to_string(),
                reason: Some("untracked_files".to_string()),
                missing_modules: Vec::new(),
                untracked_files: untracked,
            });
        }
    }
    Ok(entries)
}

/// Layer 3: module mention coverage. Module-name stems under the source
/// directory that the linked doc never mentions (case-insensitive).
pub fn check_module_mentions(
    conn: &Connection,
    project_root: &Path,
    docs_dir: &Path,
) -> Result<Vec<SyncEntry>, BeadloomError> {
    let exts: Vec<&str> = supported_extensions().iter().map(String::as_str).collect();
    let mut entries = Vec::new();

    for (ref_id, source, doc_path) in nodes_with_source_and_doc(conn)? {
        let source_dir = project_root.join(source.trim_end_matches('/'));
        if !source_dir.is_dir() {
            continue;
        }
        let doc_file = docs_dir.join(&doc_path);
        let Ok(doc_content) = fs::read_to_string(&doc_file) else {
            continue;
        };
        let doc_lower = doc_content.to_lowercase();

        let mut missing = Vec::new();
        let mut stems: Vec<String> = WalkDir::new(&source_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| exts.contains(&crate::core::code_indexer::extension_of(p).as_str()))
            .filter_map(|p| {
                p.file_stem().map(|s| s.to_string_lossy().to_string())
            })
            .filter(|stem| !COVERAGE_EXCLUDED.iter().any(|x| x.starts_with(stem.as_str())))
            .filter(|stem| !stem.starts_with("__"))
            .collect();
        stems.sort();
        stems.dedup();

        for stem in stems {
            if !doc_lower.contains(&stem.to_lowercase()) {
                missing.push(stem);
            }
        }

        if !missing.is_empty() {
            entries.push(SyncEntry {
                ref_id,
                doc_path,
                code_path: None,
                status: "stale".to_string(),
                reason: Some("missing_modules".to_string()),
                missing_modules: missing,
                untracked_files: Vec::new(),
            });
        }
    }
    Ok(entries)
}

/// Run all three staleness layers and aggregate. Rows that pass every
/// layer are reported with status `ok`.
pub fn check_sync(
    conn: &Connection,
    project_root: &Path,
    docs_dir: &Path,
) -> Result<Vec<SyncEntry>, BeadloomError> {
    let mut entries = check_symbol_drift(conn)?;
    entries.extend(check_source_coverage(conn, project_root)?);
    entries.extend(check_module_mentions(conn, project_root, docs_dir)?);

    // Pairs untouched by any layer are reported ok.
    let rows: Vec<(String, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT ref_id, doc_path, code_path FROM sync_state ORDER BY doc_path, code_path",
        )?;
        let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        mapped.collect::<Result<_, _>>()?
    };
    for (ref_id, doc_path, code_path) in rows {
        let flagged = entries
            .iter()
            .any(|e| e.ref_id == ref_id && (e.code_path.as_deref() == Some(&code_path) || e.code_path.is_none()));
        if !flagged {
            entries.push(SyncEntry {
                ref_id,
                doc_path,
                code_path: Some(code_path),
                status: "ok".to_string(),
                reason: None,
                missing_modules: Vec::new(),
                untracked_files: Vec::new(),
            });
        }
    }
    Ok(entries)
}

/// Rewrite the baselines for every sync pair of a node: current doc hash,
/// code hash, symbol digest, fresh `synced_at`, status ok. This is the
/// only operation besides a full reindex that mutates `symbols_hash`.
pub fn mark_synced(conn: &Connection, ref_id: &str) -> Result<usize, BeadloomError> {
    let symbols_hash = compute_symbols_hash(conn, ref_id)?;
    let rows: Vec<(String, String)> = {
        let mut stmt =
            conn.prepare("SELECT doc_path, code_path FROM sync_state WHERE ref_id = ?1")?;
        let mapped = stmt.query_map([ref_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
        mapped.collect::<Result<_, _>>()?
    };
    if rows.is_empty() {
        return Err(BeadloomError::NotFound(format!(
            "no sync pairs recorded for '{ref_id}'"
        )));
    }

    let mut updated = 0;
    for (doc_path, code_path) in rows {
        let doc_hash: Option<String> = conn
            .query_row("SELECT hash FROM docs WHERE path = ?1", [&doc_path], |r| {
                r.get(0)
            })
            .optional()?;
        let code_hash: Option<String> = conn
            .query_row(
                "SELECT file_hash FROM code_symbols WHERE file_path = ?1 LIMIT 1",
                [&code_path],
                |r| r.get(0),
            )
            .optional()?;
        updated += conn.execute(
            "UPDATE sync_state SET
               code_hash_at_sync = ?1, doc_hash_at_sync = ?2,
               symbols_hash = ?3, synced_at = ?4, status = 'ok'
             WHERE ref_id = ?5 AND doc_path = ?6 AND code_path = ?7",
            rusqlite::params![
                code_hash.unwrap_or_default(),
                doc_hash.unwrap_or_default(),
                symbols_hash,
                Utc::now().to_rfc3339(),
                ref_id,
                doc_path,
                code_path,
            ],
        )?;
    }
    Ok(updated)
}
