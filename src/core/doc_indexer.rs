//! Doc chunker: split Markdown into classified chunks and index them.
//!
//! Documents split on top-level `##` headings only; `###` never causes a
//! split, and fenced code is treated as opaque text within its chunk.
//! Sections longer than 2000 characters are further split at paragraph
//! boundaries.

use crate::core::error::BeadloomError;
use crate::core::model::Section;
use crate::core::store::sha256_hex;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Max characters per chunk before paragraph splitting kicks in.
const MAX_CHUNK_CHARS: usize = 2000;

/// A single chunk of a Markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_index: usize,
    pub heading: String,
    pub section: String,
    pub content: String,
}

/// Result of indexing a docs directory.
#[derive(Debug, Default)]
pub struct DocIndexResult {
    pub docs_indexed: usize,
    pub chunks_indexed: usize,
    pub warnings: Vec<String>,
}

/// Classify an H2 heading into a section tag.
///
/// Case-insensitive substring matching against a fixed table.
pub fn classify_section(heading: &str) -> Section {
    let h = heading.to_lowercase();
    if h.contains("business rules") || h.contains("specification") || h.contains("requirements") {
        return Section::Spec;
    }
    if h.contains("invariants") || h.contains("constraints") {
        return Section::Invariants;
    }
    if h.contains("limits") {
        return Section::Constraints;
    }
    if h.contains("api") || h.contains("rest") || h.contains("route") {
        return Section::Api;
    }
    if h.contains("test") {
        return Section::Tests;
    }
    Section::Other
}

/// Split a section body at paragraph boundaries so no piece exceeds
/// `MAX_CHUNK_CHARS`. A single oversized paragraph stays whole.
fn split_paragraphs(body: &str) -> Vec<String> {
    if body.chars().count() <= MAX_CHUNK_CHARS {
        return vec![body.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for para in body.split("\n\n") {
        let candidate_len = if current.is_empty() {
            para.chars().count()
        } else {
            current.chars().count() + 2 + para.chars().count()
        };
        if !current.is_empty() && candidate_len > MAX_CHUNK_CHARS {
            pieces.push(current.clone());
            current.clear();
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Split a Markdown document into an ordered sequence of chunks.
///
/// Content before the first `##` forms the intro chunk with an empty
/// heading. Each chunk carries a 0-based index in file order, the H2
/// heading verbatim, the classified section tag, and the raw content.
pub fn chunk_markdown(content: &str) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    // (heading, body) pairs in file order; intro has an empty heading.
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut heading = String::new();
    let mut body = String::new();
    let mut in_fence = false;

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && line.starts_with("## ") && !line.starts_with("###") {
            if !heading.is_empty() || !body.trim().is_empty() {
                sections.push((heading.clone(), body.clone()));
            }
            heading = line[3..].trim().to_string();
            body = String::new();
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    if !heading.is_empty() || !body.trim().is_empty() {
        sections.push((heading, body));
    }

    let mut chunks = Vec::new();
    for (heading, body) in sections {
        let section = classify_section(&heading);
        for piece in split_paragraphs(&body) {
            chunks.push(Chunk {
                chunk_index: chunks.len(),
                heading: heading.clone(),
                section: section.as_str().to_string(),
                content: piece,
            });
        }
    }
    chunks
}

/// Index every `*.md` file under `docs_dir` into the docs/chunks tables.
///
/// Docs already present for a path are replaced (chunks cascade). When
/// `ref_id_map` links a path (relative to the project or docs root) to a
/// node, the doc and its chunks carry that ref.
pub fn index_docs(
    docs_dir: &Path,
    conn: &mut Connection,
    ref_id_map: &BTreeMap<String, String>,
) -> Result<DocIndexResult, BeadloomError> {
    let mut result = DocIndexResult::default();
    if !docs_dir.is_dir() {
        return Ok(result);
    }

    let mut md_files: Vec<_> = WalkDir::new(docs_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|ext| ext == "md").unwrap_or(false))
        .collect();
    md_files.sort();

    let tx = conn.transaction()?;
    for path in md_files {
        let rel_path = path
            .strip_prefix(docs_dir)
            .map_err(|_| BeadloomError::Path(format!("{} escapes docs root", path.display())))?
            .to_string_lossy()
            .replace('\\', "/");

        let Ok(content) = fs::read_to_string(&path) else {
            result
                .warnings
                .push(format!("unreadable doc skipped: {rel_path}"));
            continue;
        };

        let hash = sha256_hex(content.as_bytes());
        let mut ref_id = ref_id_map
            .get(&rel_path)
            .or_else(|| ref_id_map.get(&format!("{}/{}", docs_dir_name(docs_dir), rel_path)))
            .cloned();
        // A ref that never made it into nodes (e.g. an invalid shard
        // entry) must not break the FK; the doc stays unlinked.
        if let Some(ref candidate) = ref_id {
            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM nodes WHERE ref_id = ?1", [candidate], |r| {
                    r.get(0)
                })
                .optional()?;
            if exists.is_none() {
                result
                    .warnings
                    .push(format!("doc '{rel_path}' references unknown node '{candidate}'"));
                ref_id = None;
            }
        }

        tx.execute("DELETE FROM docs WHERE path = ?1", [&rel_path])?;
        tx.execute(
            "INSERT INTO docs (path, kind, ref_id, hash) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![rel_path, classify_doc_kind(&rel_path), ref_id, hash],
        )?;
        let doc_id = tx.last_insert_rowid();

        for chunk in chunk_markdown(&content) {
            tx.execute(
                "INSERT INTO chunks (doc_id, chunk_index, heading, section, content, node_ref_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    doc_id,
                    chunk.chunk_index as i64,
                    chunk.heading,
                    chunk.section,
                    chunk.content,
                    ref_id,
                ],
            )?;
            result.chunks_indexed += 1;
        }
        result.docs_indexed += 1;
    }
    tx.commit()?;
    Ok(result)
}

fn docs_dir_name(docs_dir: &Path) -> String {
    docs_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Doc kind from path conventions; defaults to `other`.
fn classify_doc_kind(rel_path: &str) -> &'static str {
    let lower = rel_path.to_lowercase();
    if lower.contains("adr") {
        "adr"
    } else if lower.contains("architecture") {
        "architecture"
    } else if lower.starts_with("domains/") || lower.contains("/domains/") {
        "domain"
    } else if lower.starts_with("features/") || lower.contains("/features/") {
        "feature"
    } else if lower.starts_with("services/") || lower.contains("/services/") {
        "service"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{ensure_schema, open_db};
    use tempfile::tempdir;

    #[test]
    fn test_classify_section_table() {
        for (heading, expected) in [
            ("Business rules", "spec"),
            ("Specification", "spec"),
            ("Requirements", "spec"),
            ("Invariants", "invariants"),
            ("Constraints", "invariants"),
            ("API endpoints", "api"),
            ("REST API", "api"),
            ("Routes", "api"),
            ("Testing", "tests"),
            ("Test plan", "tests"),
            ("Limits", "constraints"),
            ("Random heading", "other"),
            ("", "other"),
        ] {
            assert_eq!(
                classify_section(heading).as_str(),
                expected,
                "heading: {heading}"
            );
        }
    }

    #[test]
    fn test_splits_by_h2() {
        let md = "# Title\n\nIntro paragraph.\n\n## Section One\n\nContent one.\n\n## Section Two\n\nContent two.\n";
        let chunks = chunk_markdown(md);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading, "");
        assert!(chunks[0].content.contains("Intro paragraph."));
        assert_eq!(chunks[1].heading, "Section One");
        assert!(chunks[1].content.contains("Content one."));
        assert_eq!(chunks[2].heading, "Section Two");
    }

    #[test]
    fn test_large_section_splits_by_paragraph() {
        let para = "A".repeat(600);
        let md = format!("## Big Section\n\n{para}\n\n{para}\n\n{para}\n\n{para}\n");
        let chunks = chunk_markdown(&md);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 2000);
            assert_eq!(chunk.heading, "Big Section");
        }
    }

    #[test]
    fn test_chunk_index_sequential() {
        let md = "## A\n\nText A.\n\n## B\n\nText B.\n\n## C\n\nText C.\n";
        let chunks = chunk_markdown(md);
        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_document() {
        assert!(chunk_markdown("").is_empty());
    }

    #[test]
    fn test_no_headings_single_chunk() {
        let md = "Just a paragraph.\n\nAnother paragraph.\n";
        let chunks = chunk_markdown(md);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, "");
    }

    #[test]
    fn test_heading_inside_code_fence_opaque() {
        let md = "## Real\n\nText.\n\n```md\n## Not a heading\n```\n\nMore.\n";
        let chunks = chunk_markdown(md);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("## Not a heading"));
    }

    #[test]
    fn test_h3_not_split() {
        let md = "## Main\n\nText.\n\n### Sub\n\nMore text.\n";
        let chunks = chunk_markdown(md);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("### Sub"));
    }

    #[test]
    fn test_content_roundtrip_preserves_non_heading_chars() {
        let md = "Intro.\n\n## One\n\nAlpha beta.\n\n## Two\n\nGamma.\n";
        let chunks = chunk_markdown(md);
        let rebuilt: String = chunks.iter().map(|c| c.content.as_str()).collect();
        for fragment in ["Intro.", "Alpha beta.", "Gamma."] {
            assert!(rebuilt.contains(fragment));
        }
    }

    fn setup_db(dir: &tempfile::TempDir) -> Connection {
        let conn = open_db(&dir.path().join("test.db")).unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_index_single_doc() {
        let dir = tempdir().unwrap();
        let mut conn = setup_db(&dir);
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("readme.md"), "## Overview\n\nHello world.\n").unwrap();

        let result = index_docs(&docs, &mut conn, &BTreeMap::new()).unwrap();
        assert_eq!(result.docs_indexed, 1);
        let (path, kind, hash): (String, String, String) = conn
            .query_row("SELECT path, kind, hash FROM docs", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(path, "readme.md");
        assert_eq!(kind, "other");
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_index_nested_docs() {
        let dir = tempdir().unwrap();
        let mut conn = setup_db(&dir);
        let docs = dir.path().join("docs");
        let sub = docs.join("domains").join("routing");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("README.md"), "## Routing\n\nRouting domain.\n").unwrap();

        let result = index_docs(&docs, &mut conn, &BTreeMap::new()).unwrap();
        assert_eq!(result.docs_indexed, 1);
        let (path, kind): (String, String) = conn
            .query_row("SELECT path, kind FROM docs", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(path, "domains/routing/README.md");
        assert_eq!(kind, "domain");
    }

    #[test]
    fn test_index_hash_matches_sha256() {
        let dir = tempdir().unwrap();
        let mut conn = setup_db(&dir);
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        let content = "## Test\n\nContent.\n";
        fs::write(docs.join("test.md"), content).unwrap();

        index_docs(&docs, &mut conn, &BTreeMap::new()).unwrap();
        let hash: String = conn
            .query_row("SELECT hash FROM docs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(hash, sha256_hex(content.as_bytes()));
    }

    #[test]
    fn test_skips_non_md_files() {
        let dir = tempdir().unwrap();
        let mut conn = setup_db(&dir);
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("image.png"), b"\x89PNG").unwrap();
        fs::write(docs.join("notes.txt"), "not markdown").unwrap();
        fs::write(docs.join("actual.md"), "## Real doc\n\nContent.\n").unwrap();

        let result = index_docs(&docs, &mut conn, &BTreeMap::new()).unwrap();
        assert_eq!(result.docs_indexed, 1);
    }

    #[test]
    fn test_ref_id_map_links_doc_and_chunks() {
        let dir = tempdir().unwrap();
        let mut conn = setup_db(&dir);
        conn.execute(
            "INSERT INTO nodes (ref_id, kind, summary) VALUES ('feat1', 'feature', 'Feature 1')",
            [],
        )
        .unwrap();
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("spec.md"), "## Spec\n\nContent.\n").unwrap();

        let mut map = BTreeMap::new();
        map.insert("spec.md".to_string(), "feat1".to_string());
        index_docs(&docs, &mut conn, &map).unwrap();

        let doc_ref: String = conn
            .query_row("SELECT ref_id FROM docs WHERE path = 'spec.md'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(doc_ref, "feat1");
        let chunk_ref: String = conn
            .query_row("SELECT node_ref_id FROM chunks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(chunk_ref, "feat1");
    }

    #[test]
    fn test_section_classification_in_db() {
        let dir = tempdir().unwrap();
        let mut conn = setup_db(&dir);
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(
            docs.join("spec.md"),
            "## Business rules\n\nRule 1.\n\n## API\n\nGET /endpoint\n",
        )
        .unwrap();
        index_docs(&docs, &mut conn, &BTreeMap::new()).unwrap();
        let sections: Vec<String> = conn
            .prepare("SELECT section FROM chunks ORDER BY chunk_index")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(sections, vec!["spec", "api"]);
    }
}
