//! Docs audit: detect stale numeric claims in Markdown, generate doc
//! skeletons for undocumented nodes, and report skeletons needing prose.
//!
//! The scanner matches numbers and version strings to known fact types via
//! keyword proximity, after masking the usual false-positive shapes (dates,
//! issue ids, hex literals, version pins, line references, bare years).

use crate::core::code_indexer::supported_extensions;
use crate::core::config::ProjectConfig;
use crate::core::error::BeadloomError;
use crate::core::store::{db_path, meta_get, open_db};
use clap::CommandFactory;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// A numeric fact mention found in a markdown file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Mention {
    pub fact_name: String,
    pub value: String,
    pub file: String,
    pub line: usize,
    pub context: String,
}

/// One audit finding: a mention that disagrees with the live fact.
#[derive(Debug, Clone, Serialize)]
pub struct AuditFinding {
    pub mention: Mention,
    pub expected: String,
}

const PROXIMITY_WINDOW: usize = 5;

// Every fact named here has a live counterpart in `live_facts`.
fn fact_keywords() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("language_count", &["language", "lang"]),
        ("tool_count", &["tool", "server tool"]),
        ("command_count", &["command", "cli", "subcommand"]),
        ("rule_count", &["rule"]),
        ("node_count", &["node", "module", "domain", "component"]),
        ("edge_count", &["edge", "dependency", "connection"]),
    ]
}

macro_rules! masked_re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

masked_re!(date_iso_re, r"\b\d{4}-\d{2}-\d{2}\b");
masked_re!(
    date_month_re,
    r"(?i)\b(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\s+\d{4}\b"
);
masked_re!(issue_hash_re, r"#\d+");
masked_re!(issue_prefix_re, r"[A-Z]+-\d+");
masked_re!(hex_color_re, r"#[0-9a-fA-F]{3,8}\b");
masked_re!(hex_literal_re, r"0x[0-9a-fA-F]+\b");
masked_re!(version_pin_re, r"(?:>=|<=|~=|!=|==|\^|[<>])\s*\d+(?:\.\d+)*");
masked_re!(line_ref_colon_re, r":\d+\b");
masked_re!(line_ref_word_re, r"(?i)\bline\s+\d+\b");
masked_re!(line_ref_l_re, r"\bL\d+\b");
masked_re!(year_re, r"\b20[0-9]{2}\b");
masked_re!(version_re, r"\bv?\d+\.\d+\.\d+\b");
masked_re!(number_re, r"\b\d+\b");
masked_re!(word_re, r"[a-zA-Z]+|\d+");

fn mask(line: &str) -> String {
    let mut result = line.to_string();
    for re in [
        date_iso_re(),
        date_month_re(),
        issue_hash_re(),
        issue_prefix_re(),
        hex_color_re(),
        hex_literal_re(),
        version_pin_re(),
        line_ref_colon_re(),
        line_ref_word_re(),
        line_ref_l_re(),
        year_re(),
    ] {
        result = re
            .replace_all(&result, |caps: &regex::Captures<'_>| {
                " ".repeat(caps[0].len())
            })
            .to_string();
    }
    result
}

fn keyword_in_window(keyword: &str, window: &[String]) -> bool {
    let kw_words: Vec<&str> = keyword.split_whitespace().collect();
    if kw_words.len() == 1 {
        let kw = kw_words[0];
        return window.iter().any(|w| w == kw || w.starts_with(kw));
    }
    window.windows(kw_words.len()).any(|slice| {
        slice
            .iter()
            .zip(&kw_words)
            .all(|(w, kw)| w == kw || w.starts_with(*kw))
    })
}

/// Scan one markdown file for fact mentions. Fenced code is skipped.
pub fn scan_file(file_path: &Path, rel: &str) -> Vec<Mention> {
    let Ok(content) = fs::read_to_string(file_path) else {
        return Vec::new();
    };
    if content.trim().is_empty() {
        return Vec::new();
    }

    let mut mentions = Vec::new();
    let mut in_code_block = false;

    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;
        let stripped = line.trim();
        if stripped.starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block {
            continue;
        }

        let cleaned = mask(line);

        // Version strings need no proximity.
        for m in version_re().find_iter(&cleaned) {
            mentions.push(Mention {
                fact_name: "version".into(),
                value: m.as_str().to_string(),
                file: rel.to_string(),
                line: line_num,
                context: stripped.to_string(),
            });
        }

        // Number mentions via keyword proximity.
        let text = cleaned.replace(['*', '_'], " ");
        let words: Vec<(usize, String)> = word_re()
            .find_iter(&text)
            .map(|m| (m.start(), m.as_str().to_lowercase()))
            .collect();

        for m in number_re().find_iter(&text) {
            let Ok(value) = m.as_str().parse::<u64>() else {
                continue;
            };
            // 0 and 1 are too common to be meaningful.
            if value <= 1 {
                continue;
            }
            if version_re()
                .find_iter(&text)
                .any(|v| v.start() <= m.start() && m.start() < v.end())
            {
                continue;
            }

            let Some(num_idx) = words
                .iter()
                .position(|(start, w)| *start == m.start() && w == m.as_str())
            else {
                continue;
            };
            let window_start = num_idx.saturating_sub(PROXIMITY_WINDOW);
            let window_end = (num_idx + PROXIMITY_WINDOW + 1).min(words.len());
            let window: Vec<String> = words[window_start..window_end]
                .iter()
                .filter(|(_, w)| w.chars().next().map(char::is_alphabetic).unwrap_or(false))
                .map(|(_, w)| w.clone())
                .collect();

            for (fact_name, keywords) in fact_keywords() {
                // Small numbers next to count keywords are usually examples.
                if value < 10 && fact_name.ends_with("_count") {
                    continue;
                }
                if keywords.iter().any(|kw| keyword_in_window(kw, &window)) {
                    mentions.push(Mention {
                        fact_name: fact_name.to_string(),
                        value: value.to_string(),
                        file: rel.to_string(),
                        line: line_num,
                        context: stripped.to_string(),
                    });
                    break;
                }
            }
        }
    }
    mentions
}

/// Resolve the markdown files to audit: `*.md` at the root plus
/// `docs/**/*.md` and `.beadloom/*.md`, minus CHANGELOG.md, excluded
/// directories, and config-driven exclude globs (matched by prefix).
pub fn resolve_paths(project_root: &Path, config: &ProjectConfig) -> Vec<PathBuf> {
    const EXCLUDE_DIRS: &[&str] = &["node_modules", ".git", "target", ".venv", "venv"];
    let mut result = Vec::new();

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(entries) = fs::read_dir(project_root) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() && path.extension().map(|e| e == "md").unwrap_or(false) {
                candidates.push(path);
            }
        }
    }
    for base in ["docs", ".beadloom"] {
        let dir = project_root.join(base);
        if dir.is_dir() {
            for entry in WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.into_path();
                if path.extension().map(|e| e == "md").unwrap_or(false) {
                    candidates.push(path);
                }
            }
        }
    }
    candidates.sort();
    candidates.dedup();

    for path in candidates {
        let rel = path
            .strip_prefix(project_root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        if rel.ends_with("CHANGELOG.md") {
            continue;
        }
        if rel.split('/').any(|part| EXCLUDE_DIRS.contains(&part)) {
            continue;
        }
        let excluded = config
            .docs_audit
            .exclude_paths
            .iter()
            .any(|pattern| rel.starts_with(pattern.trim_end_matches("**").trim_end_matches('*')));
        if excluded {
            continue;
        }
        result.push(path);
    }
    result
}

/// Live fact values to audit against.
pub fn live_facts(project_root: &Path) -> Result<BTreeMap<String, String>, BeadloomError> {
    let mut facts = BTreeMap::new();
    facts.insert(
        "language_count".to_string(),
        supported_extensions().len().to_string(),
    );
    facts.insert(
        "tool_count".to_string(),
        crate::plugins::mcp::tool_specs().len().to_string(),
    );
    facts.insert(
        "command_count".to_string(),
        crate::cli::Cli::command().get_subcommands().count().to_string(),
    );

    let path = db_path(project_root);
    if path.is_file() {
        let conn = open_db(&path)?;
        let count = |sql: &str| -> Result<i64, BeadloomError> {
            Ok(conn.query_row(sql, [], |r| r.get(0))?)
        };
        facts.insert("node_count".into(), count("SELECT count(*) FROM nodes")?.to_string());
        facts.insert("edge_count".into(), count("SELECT count(*) FROM edges")?.to_string());
        facts.insert("rule_count".into(), count("SELECT count(*) FROM rules")?.to_string());
        if let Some(version) = meta_get(&conn, "beadloom_version")? {
            facts.insert("version".into(), version);
        }
    }
    Ok(facts)
}

/// Audit: scan docs and report mentions that disagree with live facts.
pub fn audit(project_root: &Path) -> Result<Vec<AuditFinding>, BeadloomError> {
    let (config, _) = ProjectConfig::load(project_root);
    let facts = live_facts(project_root)?;
    let mut findings = Vec::new();
    for path in resolve_paths(project_root, &config) {
        let rel = path
            .strip_prefix(project_root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        for mention in scan_file(&path, &rel) {
            if let Some(expected) = facts.get(&mention.fact_name) {
                let matches = match mention.fact_name.as_str() {
                    "version" => {
                        mention.value.trim_start_matches('v') == expected.trim_start_matches('v')
                    }
                    _ => &mention.value == expected,
                };
                if !matches {
                    findings.push(AuditFinding {
                        mention,
                        expected: expected.clone(),
                    });
                }
            }
        }
    }
    Ok(findings)
}

/// Generate skeleton docs for nodes that have none. Returns the created
/// paths (relative to the project root).
pub fn generate_skeletons(project_root: &Path) -> Result<Vec<String>, BeadloomError> {
    let path = db_path(project_root);
    if !path.is_file() {
        return Err(BeadloomError::NotFound(
            "beadloom.db missing; run `beadloom reindex` first".into(),
        ));
    }
    let conn = open_db(&path)?;
    let undocumented: Vec<(String, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT n.ref_id, n.kind, n.summary FROM nodes n
             WHERE NOT EXISTS (SELECT 1 FROM docs d WHERE d.ref_id = n.ref_id)
             ORDER BY n.ref_id",
        )?;
        let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        mapped.collect::<Result<_, _>>()?
    };

    let mut created = Vec::new();
    for (ref_id, kind, summary) in undocumented {
        let dir = project_root.join("docs").join(format!("{kind}s"));
        fs::create_dir_all(&dir)?;
        let file = dir.join(format!("{}.md", ref_id.to_lowercase().replace([':', '/'], "-")));
        if file.exists() {
            continue;
        }
        let body = format!(
            "# {ref_id}\n\n{summary}\n\n## Specification\n\nTODO: describe the behavior.\n\n## Invariants\n\nTODO: list what must always hold.\n\n## Tests\n\nTODO: point at the covering tests.\n",
        );
        fs::write(&file, body)?;
        created.push(
            file.strip_prefix(project_root)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/"),
        );
    }
    Ok(created)
}

/// Polish report: skeleton sections still carrying TODO placeholders or a
/// single line of prose.
pub fn polish_report(project_root: &Path) -> Result<Vec<String>, BeadloomError> {
    let (config, _) = ProjectConfig::load(project_root);
    let mut findings = Vec::new();
    for path in resolve_paths(project_root, &config) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let rel = path
            .strip_prefix(project_root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        for chunk in crate::core::doc_indexer::chunk_markdown(&content) {
            if chunk.heading.is_empty() {
                continue;
            }
            let body = chunk.content.trim();
            if body.contains("TODO") || body.lines().filter(|l| !l.trim().is_empty()).count() <= 1 {
                findings.push(format!("{rel}: '## {}' needs prose", chunk.heading));
            }
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scan(content: &str) -> Vec<Mention> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.md");
        fs::write(&path, content).unwrap();
        scan_file(&path, "doc.md")
    }

    #[test]
    fn test_version_mention() {
        let mentions = scan("Beadloom v1.7.0 is the current release.\n");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].fact_name, "version");
        assert_eq!(mentions[0].value, "v1.7.0");
    }

    #[test]
    fn test_count_mention_with_keyword() {
        let mentions = scan("Supports 12 programming languages out of the box.\n");
        assert!(mentions
            .iter()
            .any(|m| m.fact_name == "language_count" && m.value == "12"));
    }

    #[test]
    fn test_dates_and_issue_ids_masked() {
        let mentions = scan("Released 2026-02-19, fixes #123 and BDL-021.\n");
        assert!(mentions.is_empty());
    }

    #[test]
    fn test_version_pins_masked() {
        let mentions = scan("Requires rust >=1.80 for the parser languages.\n");
        assert!(mentions.iter().all(|m| m.fact_name != "version"));
    }

    #[test]
    fn test_code_blocks_skipped() {
        let mentions = scan("```\n42 languages\n```\nNothing here.\n");
        assert!(mentions.is_empty());
    }

    #[test]
    fn test_small_counts_skipped() {
        let mentions = scan("There are 3 rules configured.\n");
        assert!(mentions.iter().all(|m| m.fact_name != "rule_count"));
    }

    #[test]
    fn test_audit_catches_stale_tool_count() {
        let dir = tempdir().unwrap();
        let live = live_facts(dir.path()).unwrap();
        let claimed: u64 = live["tool_count"].parse::<u64>().unwrap() + 11;
        fs::write(
            dir.path().join("README.md"),
            format!("Beadloom exposes {claimed} server tools over stdio.\n"),
        )
        .unwrap();

        let findings = audit(dir.path()).unwrap();
        let finding = findings
            .iter()
            .find(|f| f.mention.fact_name == "tool_count")
            .expect("stale tool claim must be flagged");
        assert_eq!(finding.mention.value, claimed.to_string());
        assert_eq!(finding.expected, live["tool_count"]);
    }

    #[test]
    fn test_audit_catches_stale_command_count() {
        let dir = tempdir().unwrap();
        let live = live_facts(dir.path()).unwrap();
        let claimed: u64 = live["command_count"].parse::<u64>().unwrap() + 19;
        fs::write(
            dir.path().join("README.md"),
            format!("The CLI ships {claimed} commands in total.\n"),
        )
        .unwrap();

        let findings = audit(dir.path()).unwrap();
        let finding = findings
            .iter()
            .find(|f| f.mention.fact_name == "command_count")
            .expect("stale command claim must be flagged");
        assert_eq!(finding.expected, live["command_count"]);
    }

    #[test]
    fn test_audit_accurate_claims_pass() {
        let dir = tempdir().unwrap();
        let live = live_facts(dir.path()).unwrap();
        fs::write(
            dir.path().join("README.md"),
            format!(
                "Beadloom exposes {} server tools over stdio.\n",
                live["tool_count"]
            ),
        )
        .unwrap();

        let findings = audit(dir.path()).unwrap();
        assert!(findings
            .iter()
            .all(|f| f.mention.fact_name != "tool_count"));
    }

    #[test]
    fn test_every_scanner_fact_has_a_live_counterpart() {
        let dir = tempdir().unwrap();
        let live = live_facts(dir.path()).unwrap();
        for (fact_name, _) in fact_keywords() {
            assert!(
                live.contains_key(*fact_name),
                "scanner fact '{fact_name}' has no live value to audit against"
            );
        }
    }

    #[test]
    fn test_resolve_paths_excludes_changelog_and_config_patterns() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "# Readme\n").unwrap();
        fs::write(dir.path().join("CHANGELOG.md"), "# Changelog\n").unwrap();
        fs::create_dir_all(dir.path().join("docs/internal")).unwrap();
        fs::write(dir.path().join("docs/internal/notes.md"), "notes\n").unwrap();
        fs::write(dir.path().join("docs/guide.md"), "guide\n").unwrap();

        let mut config = ProjectConfig::default();
        config.docs_audit.exclude_paths = vec!["docs/internal/**".into()];

        let paths: Vec<String> = resolve_paths(dir.path(), &config)
            .into_iter()
            .map(|p| {
                p.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert!(paths.contains(&"README.md".to_string()));
        assert!(paths.contains(&"docs/guide.md".to_string()));
        assert!(!paths.iter().any(|p| p.contains("CHANGELOG")));
        assert!(!paths.iter().any(|p| p.contains("internal")));
    }

    #[test]
    fn test_generate_skeletons() {
        use crate::core::reindex::{full_reindex, ReindexOptions};
        let dir = tempdir().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(project.join(".beadloom/_graph")).unwrap();
        fs::write(
            project.join(".beadloom/_graph/g.yml"),
            "nodes:\n  - ref_id: routing\n    kind: domain\n    summary: Routing domain\n",
        )
        .unwrap();
        full_reindex(&project, &ReindexOptions::default()).unwrap();

        let created = generate_skeletons(&project).unwrap();
        assert_eq!(created, vec!["docs/domains/routing.md"]);
        let content = fs::read_to_string(project.join("docs/domains/routing.md")).unwrap();
        assert!(content.contains("## Specification"));

        // Second run creates nothing new.
        let again = generate_skeletons(&project).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_polish_flags_todo_sections() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(
            dir.path().join("docs/feat.md"),
            "# Feat\n\n## Specification\n\nTODO: describe the behavior.\n\n## Tests\n\nCovered by tests/feat.rs with six cases across the happy path\nand the failure path.\n",
        )
        .unwrap();
        let findings = polish_report(dir.path()).unwrap();
        assert!(findings.iter().any(|f| f.contains("Specification")));
        assert!(!findings.iter().any(|f| f.contains("'## Tests'")));
    }
}
