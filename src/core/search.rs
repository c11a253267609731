//! Full-text search over node summaries and linked doc chunks (FTS5).

use crate::core::error::BeadloomError;
use rusqlite::Connection;
use serde::Serialize;

/// One search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub ref_id: String,
    pub kind: String,
    pub summary: String,
    pub snippet: String,
}

/// Rebuild the search index: one row per node, content = summary plus the
/// text of every chunk linked to the node.
pub fn populate_search_index(conn: &Connection) -> Result<usize, BeadloomError> {
    conn.execute("DELETE FROM node_search", [])?;

    let mut stmt = conn.prepare("SELECT ref_id, kind, summary FROM nodes ORDER BY ref_id")?;
    let nodes: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<_, _>>()?;

    let mut chunk_stmt = conn.prepare(
        "SELECT c.heading, c.content FROM chunks c
         JOIN docs d ON c.doc_id = d.id
         WHERE d.ref_id = ?1 OR c.node_ref_id = ?1
         ORDER BY c.doc_id, c.chunk_index",
    )?;

    let mut count = 0;
    for (ref_id, kind, summary) in nodes {
        let chunk_texts: Vec<(String, String)> = chunk_stmt
            .query_map([&ref_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        let mut content = summary.clone();
        for (heading, body) in chunk_texts {
            content.push('\n');
            content.push_str(&heading);
            content.push('\n');
            content.push_str(&body);
        }
        conn.execute(
            "INSERT INTO node_search (ref_id, kind, summary, content) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![ref_id, kind, summary, content],
        )?;
        count += 1;
    }
    Ok(count)
}

/// Full-text search. An empty query returns no results; `kind` filters by
/// node kind; results are ordered by FTS5 rank.
pub fn search_nodes(
    conn: &Connection,
    query: &str,
    kind: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>, BeadloomError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    // Quote the query so user input is matched as terms, not FTS5 syntax.
    let fts_query = query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" ");

    let mut results = Vec::new();
    let mut push_row = |ref_id: String, kind: String, summary: String, snippet: String| {
        results.push(SearchResult {
            ref_id,
            kind,
            summary,
            snippet,
        });
    };

    match kind {
        Some(k) => {
            let mut stmt = conn.prepare(
                "SELECT ref_id, kind, summary, snippet(node_search, 3, '', '', '…', 12)
                 FROM node_search WHERE node_search MATCH ?1 AND kind = ?2
                 ORDER BY rank LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![fts_query, k, limit as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?;
            for row in rows {
                let (a, b, c, d) = row?;
                push_row(a, b, c, d);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT ref_id, kind, summary, snippet(node_search, 3, '', '', '…', 12)
                 FROM node_search WHERE node_search MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![fts_query, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (a, b, c, d) = row?;
                push_row(a, b, c, d);
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{ensure_schema, open_db};
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Connection) {
        let dir = tempdir().unwrap();
        let conn = open_db(&dir.path().join("test.db")).unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO nodes (ref_id, kind, summary) VALUES
             ('auth', 'domain', 'Authentication and OAuth2 flows'),
             ('routing', 'domain', 'Request routing'),
             ('billing-svc', 'service', 'Billing service')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO docs (path, kind, ref_id, hash) VALUES ('auth.md', 'domain', 'auth', 'h')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chunks (doc_id, chunk_index, heading, section, content, node_ref_id)
             VALUES (1, 0, 'Tokens', 'spec', 'JWT token rotation rules.', 'auth')",
            [],
        )
        .unwrap();
        populate_search_index(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_basic_keyword_search() {
        let (_dir, conn) = setup();
        let results = search_nodes(&conn, "authentication", None, 10).unwrap();
        assert!(results.iter().any(|r| r.ref_id == "auth"));
    }

    #[test]
    fn test_kind_filter() {
        let (_dir, conn) = setup();
        let results = search_nodes(&conn, "routing", Some("domain"), 10).unwrap();
        assert!(results.iter().all(|r| r.kind == "domain"));
        assert!(!results.is_empty());
    }

    #[test]
    fn test_chunk_content_searchable() {
        let (_dir, conn) = setup();
        let results = search_nodes(&conn, "rotation", None, 10).unwrap();
        assert!(results.iter().any(|r| r.ref_id == "auth"));
    }

    #[test]
    fn test_empty_query_no_results() {
        let (_dir, conn) = setup();
        assert!(search_nodes(&conn, "", None, 10).unwrap().is_empty());
        assert!(search_nodes(&conn, "   ", None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_no_results() {
        let (_dir, conn) = setup();
        assert!(search_nodes(&conn, "zzzznonexistent", None, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_limit_respected() {
        let (_dir, conn) = setup();
        let results = search_nodes(&conn, "domain OR routing OR billing", None, 1).unwrap();
        assert!(results.len() <= 1);
    }

    #[test]
    fn test_populate_rebuilds_cleanly() {
        let (_dir, conn) = setup();
        populate_search_index(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM node_search", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
