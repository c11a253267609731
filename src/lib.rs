//! Beadloom: a per-project knowledge graph and context oracle.
//!
//! Beadloom indexes three artifact classes into one local SQLite store —
//! a hand-authored architecture graph (YAML shards), Markdown
//! documentation split into classified chunks, and code symbols and
//! imports extracted with tree-sitter — then answers focused queries:
//!
//! - `ctx REF_ID` — a bounded context bundle (subgraph, doc chunks, code
//!   symbols, architectural constraints, sync status)
//! - `why REF_ID` — impact analysis over the dependency graph
//! - `lint` — deny/require architecture rules against resolved imports
//! - `doctor` / `status` — drift detection and index health
//!
//! # Design
//!
//! - **Local-first**: one project root, one `.beadloom/beadloom.db`,
//!   no daemons and no remote state
//! - **Incremental**: reindex skips files whose content hash is
//!   unchanged; a parser-fingerprint change upgrades to a full rebuild
//! - **Single-writer**: WAL journaling, foreign keys on per connection,
//!   readers stay concurrent
//!
//! # Crate structure
//!
//! - [`core`]: store, graph loader, doc chunker, code analyzer, reindex
//!   driver, context assembler, sync engine, rule engine, impact
//!   analyzer, diff/snapshot
//! - [`plugins`]: doctor, health snapshots, docs audit, project init,
//!   and the stdio RPC tool server

pub mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{Cli, Command, DocsCommand, LintFormat};
use crate::core::context::build_context;
use crate::core::diff::{compute_diff, diff_to_json, render_diff};
use crate::core::error::BeadloomError;
use crate::core::linter::{format_json, format_porcelain, format_rich, lint};
use crate::core::reindex::{reindex, ReindexOptions};
use crate::core::search::search_nodes;
use crate::core::snapshot::{compute_diff_from_snapshot, save_snapshot};
use crate::core::store::{db_path, ensure_schema, meta_get, open_db};
use crate::core::why::{analyze_node, render_why, result_to_json};
use clap::Parser;
use colored::Colorize;
use rusqlite::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Exit codes: 0 success, 1 violations/failed gate, 2 configuration error.
pub const EXIT_OK: i32 = 0;
pub const EXIT_VIOLATIONS: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;

fn exit_code_for(err: &BeadloomError) -> i32 {
    match err {
        BeadloomError::InvalidRules(_) | BeadloomError::Config(_) => EXIT_CONFIG,
        _ => EXIT_VIOLATIONS,
    }
}

fn open_project_db(project_root: &Path) -> Result<Connection, BeadloomError> {
    let path = db_path(project_root);
    if !path.is_file() {
        return Err(BeadloomError::NotFound(
            "beadloom.db missing; run `beadloom reindex` first".into(),
        ));
    }
    let conn = open_db(&path)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// True when any tracked file's mtime is newer than the stored one, which
/// means the index lags the working tree.
fn index_is_stale(conn: &Connection, project_root: &Path) -> bool {
    let Ok(mut stmt) = conn.prepare(
        "SELECT path, mtime_ns FROM file_index WHERE path != '__parser_fingerprint__'",
    ) else {
        return false;
    };
    let Ok(rows) = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
    else {
        return false;
    };
    for row in rows.flatten() {
        let (rel, stored_mtime) = row;
        let current = std::fs::metadata(project_root.join(&rel))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
            .unwrap_or(0);
        if current > stored_mtime {
            return true;
        }
    }
    false
}

fn render_bundle_markdown(bundle: &Value) -> String {
    let mut out = String::new();
    let focus = &bundle["focus"];
    out.push_str(&format!(
        "# {} ({})\n\n{}\n",
        focus["ref_id"].as_str().unwrap_or(""),
        focus["kind"].as_str().unwrap_or(""),
        focus["summary"].as_str().unwrap_or(""),
    ));

    if let Some(nodes) = bundle["graph"]["nodes"].as_array() {
        out.push_str("\n## Graph\n\n");
        for node in nodes {
            out.push_str(&format!(
                "- `{}` ({}): {}\n",
                node["ref_id"].as_str().unwrap_or(""),
                node["kind"].as_str().unwrap_or(""),
                node["summary"].as_str().unwrap_or(""),
            ));
        }
        if let Some(edges) = bundle["graph"]["edges"].as_array() {
            for edge in edges {
                out.push_str(&format!(
                    "- `{}` -[{}]-> `{}`\n",
                    edge["src"].as_str().unwrap_or(""),
                    edge["kind"].as_str().unwrap_or(""),
                    edge["dst"].as_str().unwrap_or(""),
                ));
            }
        }
    }

    if let Some(chunks) = bundle["text_chunks"].as_array() {
        if !chunks.is_empty() {
            out.push_str("\n## Documentation\n");
            for chunk in chunks {
                let heading = chunk["heading"].as_str().unwrap_or("");
                if !heading.is_empty() {
                    out.push_str(&format!("\n### {heading}\n\n"));
                }
                out.push_str(chunk["content"].as_str().unwrap_or(""));
                out.push('\n');
            }
        }
    }

    if let Some(symbols) = bundle["code_symbols"].as_array() {
        if !symbols.is_empty() {
            out.push_str("\n## Code symbols\n\n");
            for sym in symbols {
                out.push_str(&format!(
                    "- `{}` ({}) {}:{}\n",
                    sym["symbol_name"].as_str().unwrap_or(""),
                    sym["kind"].as_str().unwrap_or(""),
                    sym["file_path"].as_str().unwrap_or(""),
                    sym["line_start"],
                ));
            }
        }
    }

    if let Some(constraints) = bundle["constraints"].as_array() {
        if !constraints.is_empty() {
            out.push_str("\n## Constraints\n\n");
            for c in constraints {
                out.push_str(&format!(
                    "- **{}** ({}): {}\n",
                    c["rule"].as_str().unwrap_or(""),
                    c["type"].as_str().unwrap_or(""),
                    c["description"].as_str().unwrap_or(""),
                ));
            }
        }
    }
    out
}

fn print_reindex_result(result: &core::reindex::ReindexResult) {
    if result.nothing_changed {
        println!("Nothing changed.");
        return;
    }
    if result.upgraded_to_full {
        println!("(incremental upgraded to full reindex)");
    }
    println!("Nodes:   {}", result.nodes_loaded);
    println!("Edges:   {}", result.edges_loaded);
    println!("Docs:    {}", result.docs_indexed);
    println!("Chunks:  {}", result.chunks_indexed);
    println!("Symbols: {}", result.symbols_indexed);
    println!("Imports: {}", result.imports_indexed);
    for warning in &result.warnings {
        println!("{} {}", "[warn]".yellow(), warning);
    }
    for error in &result.errors {
        println!("{} {}", "[error]".red(), error);
    }
}

fn dispatch(command: Command, project_root: &Path) -> Result<i32, BeadloomError> {
    match command {
        Command::Init {
            bootstrap,
            import,
            preset,
        } => {
            let opts = plugins::init::InitOptions {
                bootstrap,
                import_dir: import,
                preset,
            };
            let result = plugins::init::init_project(project_root, &opts)?;
            for path in &result.created {
                println!("created {path}");
            }
            for warning in &result.warnings {
                println!("{} {}", "[warn]".yellow(), warning);
            }
            if result.created.is_empty() && result.warnings.is_empty() {
                println!("Project already initialized.");
            }
            Ok(EXIT_OK)
        }

        Command::Reindex { full, docs_dir } => {
            let opts = ReindexOptions { full, docs_dir };
            let result = reindex(project_root, &opts)?;
            print_reindex_result(&result);
            Ok(EXIT_OK)
        }

        Command::Ctx {
            ref_ids,
            depth,
            max_nodes,
            max_chunks,
            json,
            markdown,
        } => {
            let conn = open_project_db(project_root)?;
            let mut bundle = build_context(&conn, &ref_ids, depth, max_nodes, max_chunks)?;
            if index_is_stale(&conn, project_root) {
                bundle["warning"] =
                    Value::String("files changed since last reindex; run `beadloom reindex`".into());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&bundle)?);
            } else if markdown {
                println!("{}", render_bundle_markdown(&bundle));
            } else {
                println!("{}", render_bundle_markdown(&bundle));
                if let Some(warning) = bundle["warning"].as_str() {
                    eprintln!("{} {}", "[warn]".yellow(), warning);
                }
            }
            Ok(EXIT_OK)
        }

        Command::Lint {
            strict,
            no_reindex,
            format,
        } => {
            let result = lint(project_root, None, !no_reindex)?;
            match format {
                LintFormat::Rich => println!("{}", format_rich(&result)),
                LintFormat::Json => println!("{}", format_json(&result)),
                LintFormat::Porcelain => {
                    let out = format_porcelain(&result);
                    if !out.is_empty() {
                        println!("{out}");
                    }
                }
            }
            if strict && !result.violations.is_empty() {
                return Ok(EXIT_VIOLATIONS);
            }
            Ok(EXIT_OK)
        }

        Command::Why {
            ref_id,
            reverse,
            json,
        } => {
            let conn = open_project_db(project_root)?;
            let result = analyze_node(
                &conn,
                &ref_id,
                core::why::DEFAULT_DEPTH,
                core::why::DEFAULT_MAX_NODES,
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result_to_json(&result))?);
            } else if reverse {
                // Dependents-first view.
                let mut swapped = result;
                std::mem::swap(&mut swapped.upstream, &mut swapped.downstream);
                println!("{}", render_why(&swapped));
            } else {
                println!("{}", render_why(&result));
            }
            Ok(EXIT_OK)
        }

        Command::Diff {
            since,
            snapshot,
            json,
        } => {
            let diff = match snapshot {
                Some(id) => {
                    let conn = open_project_db(project_root)?;
                    compute_diff_from_snapshot(&conn, id)?
                }
                None => compute_diff(project_root, &since)?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&diff_to_json(&diff))?);
            } else {
                println!("{}", render_diff(&diff));
            }
            Ok(EXIT_OK)
        }

        Command::Snapshot { label } => {
            let conn = open_project_db(project_root)?;
            let id = save_snapshot(&conn, label.as_deref())?;
            println!("Saved snapshot {id}");
            Ok(EXIT_OK)
        }

        Command::Doctor { json } => match plugins::doctor::run_doctor(project_root, json) {
            Ok(()) => Ok(EXIT_OK),
            Err(BeadloomError::Validation(msg)) => {
                eprintln!("{msg}");
                Ok(EXIT_VIOLATIONS)
            }
            Err(e) => Err(e),
        },

        Command::Status { json } => {
            let conn = open_project_db(project_root)?;
            let snapshot = plugins::health::take_snapshot(&conn)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("Nodes:     {}", snapshot.nodes_count);
                println!("Edges:     {}", snapshot.edges_count);
                println!("Docs:      {}", snapshot.docs_count);
                println!("Coverage:  {:.0}%", snapshot.coverage_pct);
                println!("Stale:     {}", snapshot.stale_count);
                println!("Isolated:  {}", snapshot.isolated_count);
                if let Some(ts) = meta_get(&conn, "last_reindex_at")? {
                    println!("Reindexed: {ts}");
                }
            }
            Ok(EXIT_OK)
        }

        Command::Search {
            query,
            kind,
            limit,
            json,
        } => {
            let conn = open_project_db(project_root)?;
            let results = search_nodes(&conn, &query, kind.as_deref(), limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No matches.");
            } else {
                for hit in &results {
                    println!(
                        "{} ({}) {}",
                        hit.ref_id.bold(),
                        hit.kind,
                        hit.summary.dimmed()
                    );
                    if !hit.snippet.is_empty() {
                        println!("  {}", hit.snippet);
                    }
                }
            }
            Ok(EXIT_OK)
        }

        Command::Docs { command } => match command {
            DocsCommand::Audit { json } => {
                let findings = plugins::docs_audit::audit(project_root)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&findings)?);
                } else if findings.is_empty() {
                    println!("Docs agree with the index.");
                } else {
                    for finding in &findings {
                        println!(
                            "{} {}:{} says {} = {}, index says {}",
                            "[stale]".yellow(),
                            finding.mention.file,
                            finding.mention.line,
                            finding.mention.fact_name,
                            finding.mention.value,
                            finding.expected,
                        );
                    }
                }
                // Stale claims gate CI like violations do.
                if findings.is_empty() {
                    Ok(EXIT_OK)
                } else {
                    Ok(EXIT_VIOLATIONS)
                }
            }
            DocsCommand::Generate => {
                let created = plugins::docs_audit::generate_skeletons(project_root)?;
                if created.is_empty() {
                    println!("All nodes documented.");
                } else {
                    for path in &created {
                        println!("created {path}");
                    }
                }
                Ok(EXIT_OK)
            }
            DocsCommand::Polish => {
                let findings = plugins::docs_audit::polish_report(project_root)?;
                if findings.is_empty() {
                    println!("No skeleton sections left.");
                } else {
                    for finding in &findings {
                        println!("{finding}");
                    }
                }
                Ok(EXIT_OK)
            }
        },

        Command::McpServe => {
            plugins::mcp::serve_stdio(project_root)?;
            Ok(EXIT_OK)
        }
    }
}

/// Parse argv, dispatch, and return the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    let project_root = cli
        .project
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    match dispatch(cli.command, &project_root) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            exit_code_for(&err)
        }
    }
}
