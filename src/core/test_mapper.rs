//! Test mapper: associate test files with graph nodes.
//!
//! Mapping combines framework detection (pytest, jest, go test, junit,
//! xctest), naming conventions (`test_auth.py` -> node `auth`), directory
//! proximity (`tests/auth/` -> node `auth`), and import analysis of the
//! test files themselves.

use crate::core::import_resolver::extract_imports;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// Test information attached to a node's `extra.tests`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TestMapping {
    pub test_files: Vec<String>,
    pub framework: String,
}

fn detect_framework(rel_path: &str) -> Option<&'static str> {
    let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    if file_name.starts_with("test_") && file_name.ends_with(".py") {
        return Some("pytest");
    }
    if file_name.ends_with("_test.py") {
        return Some("pytest");
    }
    if file_name.ends_with(".test.ts")
        || file_name.ends_with(".test.tsx")
        || file_name.ends_with(".test.js")
        || file_name.ends_with(".spec.ts")
        || file_name.ends_with(".spec.js")
        || rel_path.contains("__tests__/")
    {
        return Some("jest");
    }
    if file_name.ends_with("_test.go") {
        return Some("go");
    }
    if (file_name.ends_with("Test.java") || file_name.ends_with("Tests.java"))
        || (file_name.ends_with("Test.kt") || file_name.ends_with("Tests.kt"))
    {
        return Some("junit");
    }
    if file_name.ends_with("Tests.swift") || file_name.ends_with("Test.swift") {
        return Some("xctest");
    }
    None
}

/// Stem a test file name down to the module it exercises.
fn test_stem(rel_path: &str) -> String {
    let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
    stem.trim_start_matches("test_")
        .trim_end_matches("_test")
        .trim_end_matches(".test")
        .trim_end_matches(".spec")
        .trim_end_matches("Tests")
        .trim_end_matches("Test")
        .to_lowercase()
}

fn node_matches(ref_id: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let ref_lower = ref_id.to_lowercase();
    ref_lower == needle || ref_lower.contains(needle) || needle.contains(&ref_lower)
}

/// Map test files under the project to nodes.
///
/// `source_dirs` maps ref_id to that node's source directory. The result
/// maps ref_id to its `TestMapping`; nodes with no matching tests are
/// absent.
pub fn map_tests(
    project_root: &Path,
    source_dirs: &BTreeMap<String, String>,
) -> BTreeMap<String, TestMapping> {
    let mut result: BTreeMap<String, TestMapping> = BTreeMap::new();
    if source_dirs.is_empty() {
        return result;
    }

    let mut test_files: Vec<(String, &'static str)> = Vec::new();
    for entry in WalkDir::new(project_root)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != ".git" && name != "node_modules" && name != "target" && name != ".beadloom"
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(rel) = entry.path().strip_prefix(project_root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if let Some(framework) = detect_framework(&rel) {
            test_files.push((rel, framework));
        }
    }
    test_files.sort();

    for (rel, framework) in &test_files {
        let mut matched: Option<&String> = None;

        // 1. Naming convention: test stem against ref_ids.
        let stem = test_stem(rel);
        for ref_id in source_dirs.keys() {
            if node_matches(ref_id, &stem) {
                matched = Some(ref_id);
                break;
            }
        }

        // 2. Directory proximity: a path segment naming the node.
        if matched.is_none() {
            let segments: Vec<&str> = rel.split('/').collect();
            'outer: for ref_id in source_dirs.keys() {
                for segment in &segments[..segments.len().saturating_sub(1)] {
                    if node_matches(ref_id, &segment.to_lowercase()) {
                        matched = Some(ref_id);
                        break 'outer;
                    }
                }
            }
        }

        // 3. Import analysis: the test imports a module under a node's
        //    source directory.
        if matched.is_none() {
            let abs = project_root.join(rel);
            let imports = extract_imports(&abs, rel);
            'imports: for imp in &imports {
                let import_as_path = imp.import_path.replace(['.', ':'], "/");
                for (ref_id, src_dir) in source_dirs {
                    let dir = src_dir
                        .trim_end_matches('/')
                        .trim_start_matches("src/")
                        .trim_start_matches("lib/")
                        .trim_start_matches("app/");
                    if !dir.is_empty() && import_as_path.starts_with(dir) {
                        matched = Some(ref_id);
                        break 'imports;
                    }
                }
            }
        }

        if let Some(ref_id) = matched {
            let entry = result.entry(ref_id.clone()).or_default();
            entry.test_files.push(rel.clone());
            if entry.framework.is_empty() {
                entry.framework = framework.to_string();
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn dirs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_detect_frameworks() {
        assert_eq!(detect_framework("tests/test_auth.py"), Some("pytest"));
        assert_eq!(detect_framework("src/__tests__/auth.test.ts"), Some("jest"));
        assert_eq!(detect_framework("pkg/auth_test.go"), Some("go"));
        assert_eq!(detect_framework("src/AuthTest.java"), Some("junit"));
        assert_eq!(detect_framework("Tests/AuthTests.swift"), Some("xctest"));
        assert_eq!(detect_framework("src/auth.py"), None);
    }

    #[test]
    fn test_pytest_naming_convention() {
        let dir = tempdir().unwrap();
        write(dir.path(), "tests/test_auth.py", "def test_login():\n    pass\n");
        write(dir.path(), "tests/test_billing.py", "def test_invoice():\n    pass\n");
        let mapping = map_tests(
            dir.path(),
            &dirs(&[("auth", "src/auth/"), ("billing", "src/billing/")]),
        );
        assert!(mapping["auth"].test_files.iter().any(|f| f.contains("test_auth.py")));
        assert!(mapping["billing"]
            .test_files
            .iter()
            .any(|f| f.contains("test_billing.py")));
        assert_eq!(mapping["auth"].framework, "pytest");
    }

    #[test]
    fn test_directory_proximity() {
        let dir = tempdir().unwrap();
        write(dir.path(), "tests/auth/test_login.py", "def test_login():\n    pass\n");
        let mapping = map_tests(dir.path(), &dirs(&[("auth", "src/auth/")]));
        assert!(mapping.contains_key("auth"));
    }

    #[test]
    fn test_go_test_convention() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/auth_test.go", "package auth\n\nfunc TestLogin(t *testing.T) {}\n");
        let mapping = map_tests(dir.path(), &dirs(&[("auth", "src/auth/")]));
        assert!(mapping.contains_key("auth"));
        assert_eq!(mapping["auth"].framework, "go");
    }

    #[test]
    fn test_unmatched_tests_absent() {
        let dir = tempdir().unwrap();
        write(dir.path(), "tests/test_orphan.py", "def test_x():\n    pass\n");
        let mapping = map_tests(dir.path(), &dirs(&[("auth", "src/auth/")]));
        assert!(mapping.is_empty());
    }
}
