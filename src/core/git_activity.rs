//! Git history analysis: commit activity, contributors, activity levels.
//!
//! Per-node activity metrics come from a single `git log` invocation over
//! the last 90 days; changed files map to the node whose source directory
//! is the longest matching prefix. A missing or failing git binary is a
//! silent no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::process::Command;

/// Git activity metrics for a single graph node.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GitActivity {
    pub commits_30d: usize,
    pub commits_90d: usize,
    /// ISO 8601 date of the most recent commit touching the node.
    pub last_commit_date: String,
    /// Top 3 contributors by commit count.
    pub top_contributors: Vec<String>,
    /// hot | warm | cold | dormant
    pub activity_level: String,
}

/// Classify activity level from commit counts.
///
/// | Level   | Criteria                |
/// |---------|-------------------------|
/// | hot     | >20 commits in 30 days  |
/// | warm    | 5-20 commits in 30 days |
/// | cold    | 1-4 commits in 30 days  |
/// | dormant | 0 commits in 90 days    |
fn classify_activity(commits_30d: usize, commits_90d: usize) -> &'static str {
    if commits_30d > 20 {
        "hot"
    } else if commits_30d >= 5 {
        "warm"
    } else if commits_30d >= 1 {
        "cold"
    } else if commits_90d == 0 {
        "dormant"
    } else {
        // 90d commits but none in 30d: some recent-ish activity.
        "cold"
    }
}

/// Map a changed file to the node whose source directory prefix matches
/// most specifically (longest prefix at a directory boundary).
fn map_file_to_node<'a>(file_path: &str, source_dirs: &'a BTreeMap<String, String>) -> Option<&'a str> {
    let normalized = file_path.replace('\\', "/");
    let mut best: Option<&str> = None;
    let mut best_len = 0;
    for (ref_id, src_dir) in source_dirs {
        let prefix = src_dir.trim_end_matches('/');
        let matches = normalized == prefix || normalized.starts_with(&format!("{prefix}/"));
        if matches && prefix.len() > best_len {
            best = Some(ref_id.as_str());
            best_len = prefix.len();
        }
    }
    best
}

#[derive(Debug)]
struct CommitInfo {
    hash: String,
    date: String,
    author: String,
    files: Vec<String>,
}

/// Parse `git log --format="%H %aI %aN" --name-only` output.
fn parse_git_log(output: &str) -> Vec<CommitInfo> {
    let mut commits = Vec::new();
    let lines: Vec<&str> = output.lines().collect();
    let mut i = 0;

    let looks_like_header = |line: &str| {
        let parts: Vec<&str> = line.splitn(3, ' ').collect();
        parts.len() >= 3 && parts[1].contains('T') && (parts[1].contains('+') || parts[1].contains('Z') || parts[1].contains('-'))
    };

    while i < lines.len() {
        let header = lines[i].trim();
        if header.is_empty() {
            i += 1;
            continue;
        }
        let parts: Vec<&str> = header.splitn(3, ' ').collect();
        if parts.len() < 3 {
            i += 1;
            continue;
        }
        let (hash, date, author) = (parts[0], parts[1], parts[2]);
        i += 1;

        if i < lines.len() && lines[i].trim().is_empty() {
            i += 1;
        }

        let mut files = Vec::new();
        while i < lines.len() && !lines[i].trim().is_empty() {
            let line = lines[i].trim();
            if looks_like_header(line) {
                break;
            }
            files.push(line.to_string());
            i += 1;
        }

        commits.push(CommitInfo {
            hash: hash.to_string(),
            date: date.to_string(),
            author: author.to_string(),
            files,
        });
    }
    commits
}

fn is_within_days(date_str: &str, days: i64) -> bool {
    match DateTime::parse_from_rfc3339(date_str) {
        Ok(parsed) => {
            let delta = Utc::now().signed_duration_since(parsed.with_timezone(&Utc));
            delta.num_days() <= days
        }
        Err(_) => false,
    }
}

/// Analyze git history for each node's source directory.
///
/// `source_dirs` maps ref_id to a source path relative to the project
/// root. Returns an empty map when git is unavailable, the log command
/// fails, or the 30-second timeout is hit at the call site.
pub fn analyze_git_activity(
    project_root: &Path,
    source_dirs: &BTreeMap<String, String>,
) -> BTreeMap<String, GitActivity> {
    let mut results = BTreeMap::new();
    if source_dirs.is_empty() {
        return results;
    }

    let output = Command::new("git")
        .args([
            "log",
            "--format=%H %aI %aN",
            "--name-only",
            "--since=90 days ago",
        ])
        .current_dir(project_root)
        .output();
    let output = match output {
        Ok(out) if out.status.success() => out,
        _ => return results,
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let commits = parse_git_log(&stdout);

    let mut commits_30d: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut commits_90d: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut contributors: HashMap<&str, HashMap<&str, usize>> = HashMap::new();
    let mut last_date: HashMap<&str, String> = HashMap::new();

    for commit in &commits {
        let mut touched: HashSet<&str> = HashSet::new();
        for file in &commit.files {
            if let Some(node) = map_file_to_node(file, source_dirs) {
                touched.insert(node);
            }
        }
        for ref_id in touched {
            commits_90d.entry(ref_id).or_default().insert(&commit.hash);
            if is_within_days(&commit.date, 30) {
                commits_30d.entry(ref_id).or_default().insert(&commit.hash);
            }
            *contributors
                .entry(ref_id)
                .or_default()
                .entry(&commit.author)
                .or_default() += 1;
            let entry = last_date.entry(ref_id).or_default();
            if commit.date > *entry {
                *entry = commit.date.clone();
            }
        }
    }

    for ref_id in source_dirs.keys() {
        let c30 = commits_30d.get(ref_id.as_str()).map_or(0, HashSet::len);
        let c90 = commits_90d.get(ref_id.as_str()).map_or(0, HashSet::len);

        let mut top: Vec<(&str, usize)> = contributors
            .get(ref_id.as_str())
            .map(|m| m.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        top.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let top_contributors: Vec<String> =
            top.into_iter().take(3).map(|(name, _)| name.to_string()).collect();

        let last = last_date
            .get(ref_id.as_str())
            .map(|d| {
                DateTime::parse_from_rfc3339(d)
                    .map(|p| p.date_naive().to_string())
                    .unwrap_or_else(|_| d.clone())
            })
            .unwrap_or_default();

        results.insert(
            ref_id.clone(),
            GitActivity {
                commits_30d: c30,
                commits_90d: c90,
                last_commit_date: last,
                top_contributors,
                activity_level: classify_activity(c30, c90).to_string(),
            },
        );
    }

    results
}
