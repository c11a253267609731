//! Lint orchestrator: refresh the index, load rules, evaluate, format.

use crate::core::error::BeadloomError;
use crate::core::reindex::{incremental_reindex, ReindexOptions};
use crate::core::rule_engine::{
    evaluate_all, load_rules, sync_rules_table, validate_rules, Violation,
};
use crate::core::store::{db_path, ensure_schema, open_db};
use colored::Colorize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Result of a lint run.
#[derive(Debug, Default)]
pub struct LintResult {
    pub violations: Vec<Violation>,
    pub rules_evaluated: usize,
    pub files_scanned: usize,
    pub imports_resolved: usize,
    pub warnings: Vec<String>,
    pub elapsed_ms: f64,
}

/// Run the lint process: reindex (unless suppressed), load and validate
/// rules, evaluate them, and return the structured result.
///
/// A missing rules file yields an empty result; an invalid one is an
/// `InvalidRules` error (never a violation).
pub fn lint(
    project_root: &Path,
    rules_path: Option<PathBuf>,
    reindex_before: bool,
) -> Result<LintResult, BeadloomError> {
    let start = Instant::now();

    if reindex_before {
        incremental_reindex(project_root, &ReindexOptions::default())?;
    }

    let path = db_path(project_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = open_db(&path)?;
    ensure_schema(&conn)?;

    let rules_path = rules_path
        .unwrap_or_else(|| project_root.join(".beadloom").join("_graph").join("rules.yml"));
    if !rules_path.is_file() {
        return Ok(LintResult {
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            ..LintResult::default()
        });
    }

    let rules = load_rules(&rules_path)?;
    let warnings = validate_rules(&rules);
    sync_rules_table(&conn, &rules)?;

    let files_scanned: i64 =
        conn.query_row("SELECT COUNT(DISTINCT file_path) FROM code_imports", [], |r| {
            r.get(0)
        })?;
    let imports_resolved: i64 = conn.query_row(
        "SELECT COUNT(*) FROM code_imports WHERE resolved_ref_id IS NOT NULL",
        [],
        |r| r.get(0),
    )?;

    let violations = evaluate_all(&conn, &rules)?;

    Ok(LintResult {
        violations,
        rules_evaluated: rules.len(),
        files_scanned: files_scanned as usize,
        imports_resolved: imports_resolved as usize,
        warnings,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

/// Human-readable report.
pub fn format_rich(result: &LintResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Rules: {} loaded", result.rules_evaluated));
    lines.push(format!(
        "Files: {} scanned, {} imports resolved",
        result.files_scanned, result.imports_resolved
    ));
    lines.push(String::new());

    let elapsed = format!("{:.1}s", result.elapsed_ms / 1000.0);

    if result.violations.is_empty() {
        lines.push(format!(
            "{} No violations found ({} rules evaluated, {elapsed})",
            "✓".green(),
            result.rules_evaluated
        ));
    } else {
        for v in &result.violations {
            lines.push(format!("{} {}", "✗".red(), v.rule_name.bold()));
            if !v.rule_description.is_empty() {
                lines.push(format!("  {}", v.rule_description));
            }
            match &v.file_path {
                Some(file) => {
                    let loc = match v.line_number {
                        Some(line) => format!("{file}:{line}"),
                        None => file.clone(),
                    };
                    lines.push(format!("  {loc} → {}", v.message));
                }
                None => lines.push(format!("  {}", v.message)),
            }
            lines.push(String::new());
        }
        lines.push(format!(
            "{} violations found ({} rules evaluated, {elapsed})",
            result.violations.len(),
            result.rules_evaluated
        ));
    }
    lines.join("\n")
}

/// Machine JSON envelope.
pub fn format_json(result: &LintResult) -> String {
    let violations: Vec<_> = result
        .violations
        .iter()
        .map(|v| {
            json!({
                "rule_name": v.rule_name,
                "rule_type": v.rule_type,
                "severity": v.severity,
                "file_path": v.file_path,
                "line_number": v.line_number,
                "from_ref_id": v.from_ref_id,
                "to_ref_id": v.to_ref_id,
                "message": v.message,
            })
        })
        .collect();
    let output = json!({
        "violations": violations,
        "summary": {
            "rules_evaluated": result.rules_evaluated,
            "violations_count": result.violations.len(),
            "files_scanned": result.files_scanned,
            "imports_resolved": result.imports_resolved,
            "elapsed_ms": result.elapsed_ms,
        },
    });
    serde_json::to_string_pretty(&output).unwrap_or_default()
}

/// One line per violation: `rule_name:rule_type:file:line:from_ref:to_ref`.
/// Empty string when there are no violations.
pub fn format_porcelain(result: &LintResult) -> String {
    result
        .violations
        .iter()
        .map(|v| {
            format!(
                "{}:{}:{}:{}:{}:{}",
                v.rule_name,
                v.rule_type,
                v.file_path.as_deref().unwrap_or(""),
                v.line_number.map(|l| l.to_string()).unwrap_or_default(),
                v.from_ref_id.as_deref().unwrap_or(""),
                v.to_ref_id.as_deref().unwrap_or(""),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_violation() -> Violation {
        Violation {
            rule_name: "billing-no-auth".into(),
            rule_type: "deny".into(),
            severity: "error".into(),
            file_path: Some("src/billing/invoice.py".into()),
            line_number: Some(2),
            from_ref_id: Some("billing".into()),
            to_ref_id: Some("auth".into()),
            message: "imports auth (auth.tokens)".into(),
            rule_description: "Billing must not import auth".into(),
        }
    }

    #[test]
    fn test_porcelain_format() {
        let result = LintResult {
            violations: vec![sample_violation()],
            rules_evaluated: 1,
            ..LintResult::default()
        };
        assert_eq!(
            format_porcelain(&result),
            "billing-no-auth:deny:src/billing/invoice.py:2:billing:auth"
        );
    }

    #[test]
    fn test_porcelain_empty() {
        assert_eq!(format_porcelain(&LintResult::default()), "");
    }

    #[test]
    fn test_json_format_shape() {
        let result = LintResult {
            violations: vec![sample_violation()],
            rules_evaluated: 3,
            files_scanned: 25,
            imports_resolved: 142,
            ..LintResult::default()
        };
        let parsed: serde_json::Value = serde_json::from_str(&format_json(&result)).unwrap();
        assert_eq!(parsed["violations"][0]["rule_name"], "billing-no-auth");
        assert_eq!(parsed["violations"][0]["from_ref_id"], "billing");
        assert_eq!(parsed["summary"]["violations_count"], 1);
        assert_eq!(parsed["summary"]["rules_evaluated"], 3);
    }

    #[test]
    fn test_rich_format_mentions_rule_and_location() {
        let result = LintResult {
            violations: vec![sample_violation()],
            rules_evaluated: 1,
            ..LintResult::default()
        };
        let text = format_rich(&result);
        assert!(text.contains("billing-no-auth"));
        assert!(text.contains("src/billing/invoice.py:2"));
        assert!(text.contains("1 violations found"));
    }

    #[test]
    fn test_rich_format_clean() {
        let result = LintResult {
            rules_evaluated: 2,
            ..LintResult::default()
        };
        let text = format_rich(&result);
        assert!(text.contains("No violations found"));
    }
}
