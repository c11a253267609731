//! Project configuration: `.beadloom/config.yml`.
//!
//! Absence is equivalent to defaults; a malformed file degrades to
//! defaults with a warning rather than failing the operation.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default directories scanned for source code.
pub const DEFAULT_SCAN_PATHS: &[&str] = &["src", "lib", "app"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocsAuditConfig {
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub extra_facts: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    /// Configured languages, as extensions (`.ts`) or names (`python`).
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub scan_paths: Vec<String>,
    #[serde(default)]
    pub docs_audit: DocsAuditConfig,
}

impl ProjectConfig {
    /// Load config from `<project_root>/.beadloom/config.yml`.
    ///
    /// Returns `(config, warning)`; the warning is set when a config file
    /// exists but cannot be parsed.
    pub fn load(project_root: &Path) -> (Self, Option<String>) {
        let path = project_root.join(".beadloom").join("config.yml");
        if !path.is_file() {
            return (Self::default(), None);
        }
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                return (
                    Self::default(),
                    Some(format!("failed to read {}: {e}", path.display())),
                )
            }
        };
        match serde_yaml::from_str::<ProjectConfig>(&content) {
            Ok(cfg) => (cfg, None),
            Err(e) => (
                Self::default(),
                Some(format!("failed to parse {}: {e}", path.display())),
            ),
        }
    }

    /// Scan paths, falling back to the defaults when none are configured.
    pub fn scan_paths(&self) -> Vec<String> {
        if self.scan_paths.is_empty() {
            DEFAULT_SCAN_PATHS.iter().map(|s| s.to_string()).collect()
        } else {
            self.scan_paths.clone()
        }
    }

    /// Configured languages normalized to extensions (`python` -> `.py`).
    pub fn language_extensions(&self) -> Vec<String> {
        self.languages
            .iter()
            .flat_map(|lang| normalize_language(lang))
            .collect()
    }
}

fn normalize_language(lang: &str) -> Vec<String> {
    if lang.starts_with('.') {
        return vec![lang.to_string()];
    }
    match lang.to_lowercase().as_str() {
        "python" => vec![".py".into()],
        "typescript" => vec![".ts".into(), ".tsx".into()],
        "javascript" => vec![".js".into(), ".jsx".into()],
        "go" => vec![".go".into()],
        "rust" => vec![".rs".into()],
        "kotlin" => vec![".kt".into(), ".kts".into()],
        "java" => vec![".java".into()],
        "c" => vec![".c".into(), ".h".into()],
        "cpp" | "c++" => vec![".cc".into(), ".cpp".into(), ".hpp".into()],
        "swift" => vec![".swift".into()],
        "objc" | "objective-c" => vec![".m".into(), ".mm".into()],
        other => vec![format!(".{other}")],
    }
}
