//! Import resolver: extract imports via tree-sitter and resolve them to
//! graph nodes.
//!
//! Standard-library and language-built-in prefixes are filtered per
//! language; relative imports are skipped everywhere. Resolution tries
//! candidate file paths derived from the import path, their annotations,
//! the `nodes.source` column, and finally the import root segment.

use crate::core::code_indexer::{extension_of, get_lang_support};
use crate::core::error::BeadloomError;
use crate::core::store::sha256_hex;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tree_sitter::{Node, Parser};

/// Rust built-in crates to skip.
const RUST_BUILTIN_CRATES: &[&str] = &["std", "core", "alloc"];

/// Java/Kotlin standard-library package prefixes to skip.
const JVM_STDLIB_PREFIXES: &[&str] = &["java.", "javax.", "kotlin.", "kotlinx."];

/// Apple system frameworks to skip for Swift and Objective-C.
#[cfg(feature = "swift")]
const APPLE_FRAMEWORKS: &[&str] = &[
    "Foundation", "UIKit", "AppKit", "SwiftUI", "Combine", "CoreData", "CoreGraphics",
    "CoreFoundation", "Dispatch", "XCTest", "os",
];

/// A single import extracted from source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportInfo {
    /// Path of the importing file, relative to the project root.
    pub file_path: String,
    /// 1-based line number of the import construct.
    pub line_number: i64,
    /// Raw import path (e.g. `beadloom.auth.tokens`).
    pub import_path: String,
}

fn text(node: Node<'_>, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or_default().to_string()
}

fn line_of(node: Node<'_>) -> i64 {
    node.start_position().row as i64 + 1
}

// ---------------------------------------------------------------------------
// Language-specific extractors (each walks the root children)
// ---------------------------------------------------------------------------

fn python_imports(root: Node<'_>, source: &[u8], file_path: &str) -> Vec<ImportInfo> {
    let mut results = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "import_statement" => {
                let mut inner = child.walk();
                for sub in child.children(&mut inner) {
                    if sub.kind() == "dotted_name" {
                        let path = text(sub, source);
                        if !path.is_empty() {
                            results.push(ImportInfo {
                                file_path: file_path.to_string(),
                                line_number: line_of(child),
                                import_path: path,
                            });
                        }
                    }
                }
            }
            "import_from_statement" => {
                let mut module_path = None;
                let mut is_relative = false;
                let mut inner = child.walk();
                for sub in child.children(&mut inner) {
                    if sub.kind() == "relative_import" {
                        is_relative = true;
                        break;
                    }
                    if sub.kind() == "dotted_name" && module_path.is_none() {
                        module_path = Some(text(sub, source));
                    }
                }
                if is_relative {
                    continue;
                }
                if let Some(path) = module_path.filter(|p| !p.is_empty()) {
                    results.push(ImportInfo {
                        file_path: file_path.to_string(),
                        line_number: line_of(child),
                        import_path: path,
                    });
                }
            }
            _ => {}
        }
    }
    results
}

fn ts_import_source(node: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "string" {
            let mut inner = child.walk();
            for sub in child.children(&mut inner) {
                if sub.kind() == "string_fragment" {
                    return Some(text(sub, source));
                }
            }
        }
    }
    None
}

fn ts_imports(root: Node<'_>, source: &[u8], file_path: &str) -> Vec<ImportInfo> {
    let mut results = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() != "import_statement" {
            continue;
        }
        let Some(path) = ts_import_source(child, source) else {
            continue;
        };
        if path.starts_with('.') {
            continue;
        }
        results.push(ImportInfo {
            file_path: file_path.to_string(),
            line_number: line_of(child),
            import_path: path,
        });
    }
    results
}

fn go_import_spec(spec: Node<'_>, source: &[u8], file_path: &str) -> Option<ImportInfo> {
    let mut cursor = spec.walk();
    for child in spec.children(&mut cursor) {
        if child.kind() == "interpreted_string_literal" {
            let raw = text(child, source);
            let path = raw.trim_matches('"');
            if path.is_empty() {
                return None;
            }
            // Stdlib heuristic: no '/' in the import path.
            if !path.contains('/') {
                return None;
            }
            return Some(ImportInfo {
                file_path: file_path.to_string(),
                line_number: line_of(spec),
                import_path: path.to_string(),
            });
        }
    }
    None
}

fn go_imports(root: Node<'_>, source: &[u8], file_path: &str) -> Vec<ImportInfo> {
    let mut results = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() != "import_declaration" {
            continue;
        }
        let mut inner = child.walk();
        for sub in child.children(&mut inner) {
            if sub.kind() == "import_spec" {
                results.extend(go_import_spec(sub, source, file_path));
            } else if sub.kind() == "import_spec_list" {
                let mut specs = sub.walk();
                for spec in sub.children(&mut specs) {
                    if spec.kind() == "import_spec" {
                        results.extend(go_import_spec(spec, source, file_path));
                    }
                }
            }
        }
    }
    results
}

fn rust_imports(root: Node<'_>, source: &[u8], file_path: &str) -> Vec<ImportInfo> {
    let mut results = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() != "use_declaration" {
            continue;
        }
        let mut inner = child.walk();
        for sub in child.children(&mut inner) {
            let path = match sub.kind() {
                "scoped_identifier" | "identifier" | "scoped_use_list" | "use_wildcard" => {
                    text(sub, source)
                }
                _ => continue,
            };
            let root_ident = path.split("::").next().unwrap_or("");
            if RUST_BUILTIN_CRATES.contains(&root_ident)
                || matches!(root_ident, "super" | "self" | "crate")
            {
                break;
            }
            results.push(ImportInfo {
                file_path: file_path.to_string(),
                line_number: line_of(child),
                import_path: path,
            });
            break; // one path per use_declaration
        }
    }
    results
}

fn jvm_imports(root: Node<'_>, source: &[u8], file_path: &str) -> Vec<ImportInfo> {
    // Java `import_declaration` and Kotlin `import_header` both carry a
    // dotted identifier; Kotlin nests headers inside an `import_list`.
    let mut results = Vec::new();
    let mut stack: Vec<Node<'_>> = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        stack.push(child);
    }
    for node in stack {
        match node.kind() {
            "import_list" => {
                let mut inner = node.walk();
                for header in node.children(&mut inner) {
                    if header.kind() == "import_header" {
                        results.extend(jvm_import_entry(header, source, file_path));
                    }
                }
            }
            "import_declaration" | "import_header" => {
                results.extend(jvm_import_entry(node, source, file_path));
            }
            _ => {}
        }
    }
    results
}

fn jvm_import_entry(node: Node<'_>, source: &[u8], file_path: &str) -> Option<ImportInfo> {
    let mut path = None;
    let mut cursor = node.walk();
    for sub in node.children(&mut cursor) {
        if matches!(sub.kind(), "scoped_identifier" | "identifier" | "qualified_identifier") {
            path = Some(text(sub, source));
        }
    }
    let path = path?;
    if path.is_empty() || JVM_STDLIB_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return None;
    }
    Some(ImportInfo {
        file_path: file_path.to_string(),
        line_number: line_of(node),
        import_path: path,
    })
}

fn c_imports(root: Node<'_>, source: &[u8], file_path: &str) -> Vec<ImportInfo> {
    let mut results = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if !matches!(child.kind(), "preproc_include" | "preproc_import") {
            continue;
        }
        let mut inner = child.walk();
        for sub in child.children(&mut inner) {
            match sub.kind() {
                // <stdio.h> and friends are system headers, skipped.
                "system_lib_string" => {}
                "string_literal" => {
                    let raw = text(sub, source);
                    let path = raw.trim_matches('"');
                    if !path.is_empty() {
                        results.push(ImportInfo {
                            file_path: file_path.to_string(),
                            line_number: line_of(child),
                            import_path: path.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
    }
    results
}

#[cfg(feature = "swift")]
fn swift_imports(root: Node<'_>, source: &[u8], file_path: &str) -> Vec<ImportInfo> {
    let mut results = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() != "import_declaration" {
            continue;
        }
        let mut inner = child.walk();
        for sub in child.children(&mut inner) {
            if matches!(sub.kind(), "identifier" | "simple_identifier") {
                let path = text(sub, source);
                if !path.is_empty() && !APPLE_FRAMEWORKS.contains(&path.as_str()) {
                    results.push(ImportInfo {
                        file_path: file_path.to_string(),
                        line_number: line_of(child),
                        import_path: path,
                    });
                }
                break;
            }
        }
    }
    results
}

/// Extract import statements from a source file.
///
/// `rel_path` is the importing file's path relative to the project root; it
/// is recorded on every yielded entry. Unsupported languages and unreadable
/// files yield an empty list.
pub fn extract_imports(file_path: &Path, rel_path: &str) -> Vec<ImportInfo> {
    let ext = extension_of(file_path);
    let Some(support) = get_lang_support(&ext) else {
        return Vec::new();
    };
    let Ok(content) = fs::read_to_string(file_path) else {
        return Vec::new();
    };
    if content.trim().is_empty() {
        return Vec::new();
    }
    let source = content.as_bytes();

    let mut parser = Parser::new();
    if parser.set_language(&support.language).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(source, None) else {
        return Vec::new();
    };
    let root = tree.root_node();

    match ext.as_str() {
        ".py" => python_imports(root, source, rel_path),
        ".ts" | ".tsx" | ".js" | ".jsx" => ts_imports(root, source, rel_path),
        ".go" => go_imports(root, source, rel_path),
        ".rs" => rust_imports(root, source, rel_path),
        ".java" | ".kt" | ".kts" => jvm_imports(root, source, rel_path),
        ".c" | ".h" | ".cc" | ".cpp" | ".cxx" | ".hpp" => c_imports(root, source, rel_path),
        #[cfg(feature = "swift")]
        ".swift" => swift_imports(root, source, rel_path),
        #[cfg(feature = "objc")]
        ".m" | ".mm" => c_imports(root, source, rel_path),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Convert an import path to candidate file paths under common source roots.
fn candidate_file_paths(import_path: &str) -> Vec<String> {
    let parts = import_path.replace("::", "/").replace('.', "/");
    let mut candidates = Vec::new();
    for prefix in ["src/", "lib/", "app/", ""] {
        candidates.push(format!("{prefix}{parts}.py"));
        candidates.push(format!("{prefix}{parts}/__init__.py"));
        candidates.push(format!("{prefix}{parts}.ts"));
        candidates.push(format!("{prefix}{parts}.js"));
        candidates.push(format!("{prefix}{parts}.go"));
        candidates.push(format!("{prefix}{parts}.rs"));
        candidates.push(format!("{prefix}{parts}.java"));
        candidates.push(format!("{prefix}{parts}.kt"));
    }
    candidates
}

fn node_exists(conn: &Connection, ref_id: &str) -> Result<bool, BeadloomError> {
    let found: Option<String> = conn
        .query_row("SELECT ref_id FROM nodes WHERE ref_id = ?1", [ref_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Map an import path to a graph node ref_id.
///
/// Strategy, first hit wins:
/// 1. candidate file paths looked up in code_symbols; a
///    domain/service/feature annotation tried as `{kind}:{value}` then as
///    the bare value against `nodes`
/// 2. `nodes.source` matched against candidate directories (with and
///    without a trailing slash)
/// 3. the import path's root segment as a literal ref_id
pub fn resolve_import_to_node(
    import_path: &str,
    conn: &Connection,
) -> Result<Option<String>, BeadloomError> {
    for candidate in candidate_file_paths(import_path) {
        let annotations: Option<String> = conn
            .query_row(
                "SELECT annotations FROM code_symbols WHERE file_path = ?1 LIMIT 1",
                [&candidate],
                |r| r.get(0),
            )
            .optional()?;
        let Some(raw) = annotations else { continue };
        let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(&raw) else {
            continue;
        };
        for kind in ["domain", "service", "feature"] {
            let Some(value) = map.get(kind) else { continue };
            let qualified = format!("{kind}:{value}");
            if node_exists(conn, &qualified)? {
                return Ok(Some(qualified));
            }
            if node_exists(conn, value)? {
                return Ok(Some(value.clone()));
            }
        }
    }

    let dir_path = import_path.replace("::", "/").replace('.', "/");
    for prefix in ["src/", "lib/", "app/", ""] {
        for suffix in ["", "/"] {
            let candidate_source = format!("{prefix}{dir_path}{suffix}");
            let found: Option<String> = conn
                .query_row(
                    "SELECT ref_id FROM nodes WHERE source = ?1",
                    [&candidate_source],
                    |r| r.get(0),
                )
                .optional()?;
            if found.is_some() {
                return Ok(found);
            }
        }
    }

    let root_segment = import_path
        .split("::")
        .next()
        .and_then(|s| s.split(['.', '/']).next())
        .unwrap_or("");
    if !root_segment.is_empty() && node_exists(conn, root_segment)? {
        return Ok(Some(root_segment.to_string()));
    }

    Ok(None)
}

/// Index one file's imports into the code_imports table (upsert).
pub fn index_file_imports(
    conn: &Connection,
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
) -> Result<usize, BeadloomError> {
    let imports = extract_imports(abs_path, rel_path);
    let mut total = 0;
    for imp in imports {
        let resolved = resolve_import_to_node(&imp.import_path, conn)?;
        conn.execute(
            "INSERT INTO code_imports (file_path, line_number, import_path, resolved_ref_id, file_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(file_path, line_number, import_path)
             DO UPDATE SET resolved_ref_id = excluded.resolved_ref_id,
                           file_hash = excluded.file_hash",
            rusqlite::params![imp.file_path, imp.line_number, imp.import_path, resolved, file_hash],
        )?;
        total += 1;
    }
    Ok(total)
}

/// Hash helper shared with the reindex driver.
pub fn hash_file(path: &Path) -> Result<String, BeadloomError> {
    let content = fs::read(path)?;
    Ok(sha256_hex(&content))
}
