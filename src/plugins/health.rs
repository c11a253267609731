//! Health snapshots: point-in-time rollups of index statistics.

use crate::core::error::BeadloomError;
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub taken_at: String,
    pub nodes_count: i64,
    pub edges_count: i64,
    pub docs_count: i64,
    /// Percentage of nodes with at least one linked doc.
    pub coverage_pct: f64,
    pub stale_count: i64,
    /// Nodes without any edge.
    pub isolated_count: i64,
}

/// Compute the current rollup and persist it to `health_snapshots`.
pub fn take_snapshot(conn: &Connection) -> Result<HealthSnapshot, BeadloomError> {
    let count = |sql: &str| -> Result<i64, BeadloomError> {
        Ok(conn.query_row(sql, [], |r| r.get(0))?)
    };

    let nodes_count = count("SELECT count(*) FROM nodes")?;
    let edges_count = count("SELECT count(*) FROM edges")?;
    let docs_count = count("SELECT count(*) FROM docs")?;
    let stale_count = count("SELECT count(*) FROM sync_state WHERE status = 'stale'")?;
    let isolated_count = count(
        "SELECT count(*) FROM nodes n
         WHERE NOT EXISTS (SELECT 1 FROM edges e
                           WHERE e.src_ref_id = n.ref_id OR e.dst_ref_id = n.ref_id)",
    )?;
    let covered = count(
        "SELECT count(DISTINCT n.ref_id) FROM nodes n JOIN docs d ON d.ref_id = n.ref_id",
    )?;
    let coverage_pct = if nodes_count == 0 {
        0.0
    } else {
        covered as f64 / nodes_count as f64 * 100.0
    };

    let snapshot = HealthSnapshot {
        taken_at: Utc::now().to_rfc3339(),
        nodes_count,
        edges_count,
        docs_count,
        coverage_pct,
        stale_count,
        isolated_count,
    };

    conn.execute(
        "INSERT INTO health_snapshots
         (taken_at, nodes_count, edges_count, docs_count, coverage_pct, stale_count, isolated_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            snapshot.taken_at,
            snapshot.nodes_count,
            snapshot.edges_count,
            snapshot.docs_count,
            snapshot.coverage_pct,
            snapshot.stale_count,
            snapshot.isolated_count,
        ],
    )?;
    Ok(snapshot)
}

/// The most recent `limit` snapshots, newest first.
pub fn latest_snapshots(
    conn: &Connection,
    limit: usize,
) -> Result<Vec<HealthSnapshot>, BeadloomError> {
    let mut stmt = conn.prepare(
        "SELECT taken_at, nodes_count, edges_count, docs_count, coverage_pct, stale_count,
                isolated_count
         FROM health_snapshots ORDER BY id DESC LIMIT ?1",
    )?;
    let rows: Vec<HealthSnapshot> = stmt
        .query_map([limit as i64], |r| {
            Ok(HealthSnapshot {
                taken_at: r.get(0)?,
                nodes_count: r.get(1)?,
                edges_count: r.get(2)?,
                docs_count: r.get(3)?,
                coverage_pct: r.get(4)?,
                stale_count: r.get(5)?,
                isolated_count: r.get(6)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}
