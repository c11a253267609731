//! Doctor: read-only preflight health checks.
//!
//! Non-destructive diagnostics over a Beadloom project:
//! - Project layout (`.beadloom/`, `_graph/`, docs)
//! - Database presence, schema version, index freshness
//! - Parser availability for configured languages
//! - Symbol drift and stale sync entries

use crate::core::code_indexer::supported_extensions;
use crate::core::config::ProjectConfig;
use crate::core::error::BeadloomError;
use crate::core::sync_engine::compute_symbols_hash;
use crate::core::store::{db_path, meta_get, open_db};
use colored::Colorize;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
}

fn check(name: &str, status: CheckStatus, message: impl Into<String>) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        status,
        message: message.into(),
    }
}

fn check_drift(conn: &Connection) -> Result<CheckResult, BeadloomError> {
    let rows: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ref_id, symbols_hash FROM sync_state WHERE symbols_hash != ''",
        )?;
        let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        mapped.collect::<Result<_, _>>()?
    };
    let mut drifted = Vec::new();
    for (ref_id, stored) in rows {
        if compute_symbols_hash(conn, &ref_id)? != stored {
            drifted.push(ref_id);
        }
    }
    Ok(if drifted.is_empty() {
        check("symbol drift", CheckStatus::Pass, "symbol baselines match")
    } else {
        check(
            "symbol drift",
            CheckStatus::Warn,
            format!("symbols changed since last sync: {}", drifted.join(", ")),
        )
    })
}

/// Run all preflight checks against a project.
pub fn run_preflight_checks(project_root: &Path) -> Result<DoctorReport, BeadloomError> {
    let mut checks = Vec::new();

    let beadloom_dir = project_root.join(".beadloom");
    checks.push(if beadloom_dir.is_dir() {
        check("project", CheckStatus::Pass, ".beadloom/ present")
    } else {
        check(
            "project",
            CheckStatus::Fail,
            ".beadloom/ missing (run `beadloom init`)",
        )
    });

    let graph_dir = beadloom_dir.join("_graph");
    let shard_count = graph_dir
        .read_dir()
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path().extension().map(|x| x == "yml").unwrap_or(false)
                        && e.file_name() != "rules.yml"
                })
                .count()
        })
        .unwrap_or(0);
    checks.push(if shard_count > 0 {
        check(
            "graph",
            CheckStatus::Pass,
            format!("{shard_count} graph shard(s)"),
        )
    } else {
        check("graph", CheckStatus::Warn, "no graph shards in _graph/")
    });

    let db_file = db_path(project_root);
    if db_file.is_file() {
        let conn = open_db(&db_file)?;
        let schema_version = meta_get(&conn, "schema_version")?.unwrap_or_default();
        checks.push(check(
            "database",
            CheckStatus::Pass,
            format!("beadloom.db openable (schema v{schema_version})"),
        ));

        match meta_get(&conn, "last_reindex_at")? {
            Some(ts) => checks.push(check(
                "index",
                CheckStatus::Pass,
                format!("last reindex at {ts}"),
            )),
            None => checks.push(check(
                "index",
                CheckStatus::Warn,
                "never reindexed (run `beadloom reindex`)",
            )),
        }

        let isolated: i64 = conn.query_row(
            "SELECT count(*) FROM nodes n
             WHERE NOT EXISTS (SELECT 1 FROM edges e
                               WHERE e.src_ref_id = n.ref_id OR e.dst_ref_id = n.ref_id)",
            [],
            |r| r.get(0),
        )?;
        checks.push(if isolated == 0 {
            check("isolation", CheckStatus::Pass, "no isolated nodes")
        } else {
            check(
                "isolation",
                CheckStatus::Warn,
                format!("{isolated} node(s) without any edge"),
            )
        });

        let stale: i64 = conn.query_row(
            "SELECT count(*) FROM sync_state WHERE status = 'stale'",
            [],
            |r| r.get(0),
        )?;
        checks.push(if stale == 0 {
            check("sync", CheckStatus::Pass, "no stale doc/code pairs")
        } else {
            check(
                "sync",
                CheckStatus::Warn,
                format!("{stale} stale doc/code pair(s)"),
            )
        });

        checks.push(check_drift(&conn)?);
    } else {
        checks.push(check(
            "database",
            CheckStatus::Fail,
            "beadloom.db missing (run `beadloom reindex`)",
        ));
    }

    let (config, config_warning) = ProjectConfig::load(project_root);
    if let Some(warning) = config_warning {
        checks.push(check("config", CheckStatus::Warn, warning));
    }
    let available = supported_extensions();
    let missing: Vec<String> = config
        .language_extensions()
        .into_iter()
        .filter(|ext| !available.contains(ext))
        .collect();
    checks.push(if missing.is_empty() {
        check(
            "parsers",
            CheckStatus::Pass,
            format!("{} grammar(s) available", available.len()),
        )
    } else {
        check(
            "parsers",
            CheckStatus::Warn,
            format!("no parser for: {}", missing.join(", ")),
        )
    });

    let passed = checks.iter().filter(|c| c.status == CheckStatus::Pass).count();
    let failed = checks.iter().filter(|c| c.status == CheckStatus::Fail).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warn).count();
    Ok(DoctorReport {
        checks,
        passed,
        failed,
        warnings,
    })
}

/// Render and run the doctor; fails (exit nonzero) when any check fails.
pub fn run_doctor(project_root: &Path, json: bool) -> Result<(), BeadloomError> {
    let report = run_preflight_checks(project_root)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Beadloom Doctor — Preflight Checks\n");
        for check in &report.checks {
            let icon = match check.status {
                CheckStatus::Pass => "PASS".green(),
                CheckStatus::Fail => "FAIL".red(),
                CheckStatus::Warn => "WARN".yellow(),
            };
            println!("  [{}] {}: {}", icon, check.name, check.message);
        }
        println!(
            "\nSummary: {} passed, {} failed, {} warnings",
            report.passed, report.failed, report.warnings
        );
    }

    if report.failed > 0 {
        return Err(BeadloomError::Validation(format!(
            "Doctor: {} check(s) failed",
            report.failed
        )));
    }
    Ok(())
}
