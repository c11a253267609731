//! Code symbol indexer: tree-sitter parsing and beadloom annotation extraction.
//!
//! A per-language configuration names the concrete syntax-tree node types
//! that count as symbols, the node types that wrap definitions (decorators,
//! export statements), and the comment node types. Grammars are linked
//! statically and resolved lazily through a cached registry; an extension
//! without a grammar downgrades to "no parser available".

use crate::core::error::BeadloomError;
use crate::core::model::SymbolKind;
use crate::core::store::sha256_hex;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tree_sitter::{Language, Node, Parser};

/// Tree-sitter configuration for a programming language.
#[derive(Debug, Clone)]
pub struct LangConfig {
    pub name: &'static str,
    pub comment_types: &'static [&'static str],
    /// node type -> canonical symbol kind (function|class|type)
    pub symbol_types: &'static [(&'static str, SymbolKind)],
    /// types that wrap definitions (e.g. decorated_definition, export_statement)
    pub wrapper_types: &'static [&'static str],
}

impl LangConfig {
    fn symbol_kind(&self, node_type: &str) -> Option<SymbolKind> {
        self.symbol_types
            .iter()
            .find(|(t, _)| *t == node_type)
            .map(|(_, k)| *k)
    }

    fn is_comment(&self, node_type: &str) -> bool {
        self.comment_types.contains(&node_type)
    }

    fn is_wrapper(&self, node_type: &str) -> bool {
        self.wrapper_types.contains(&node_type)
    }
}

/// A top-level symbol extracted from a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub symbol_name: String,
    pub kind: String,
    pub line_start: i64,
    pub line_end: i64,
    pub annotations: BTreeMap<String, String>,
    pub file_hash: String,
}

const PYTHON: LangConfig = LangConfig {
    name: "python",
    comment_types: &["comment"],
    symbol_types: &[
        ("function_definition", SymbolKind::Function),
        ("class_definition", SymbolKind::Class),
    ],
    wrapper_types: &["decorated_definition"],
};

const TYPESCRIPT: LangConfig = LangConfig {
    name: "typescript",
    comment_types: &["comment"],
    symbol_types: &[
        ("function_declaration", SymbolKind::Function),
        ("class_declaration", SymbolKind::Class),
        ("interface_declaration", SymbolKind::Type),
        ("type_alias_declaration", SymbolKind::Type),
    ],
    wrapper_types: &["export_statement"],
};

const GO: LangConfig = LangConfig {
    name: "go",
    comment_types: &["comment"],
    symbol_types: &[
        ("function_declaration", SymbolKind::Function),
        ("method_declaration", SymbolKind::Function),
        ("type_declaration", SymbolKind::Type),
    ],
    wrapper_types: &[],
};

const RUST: LangConfig = LangConfig {
    name: "rust",
    comment_types: &["line_comment"],
    symbol_types: &[
        ("function_item", SymbolKind::Function),
        ("struct_item", SymbolKind::Class),
        ("enum_item", SymbolKind::Type),
        ("trait_item", SymbolKind::Type),
    ],
    wrapper_types: &[],
};

const KOTLIN: LangConfig = LangConfig {
    name: "kotlin",
    comment_types: &["line_comment", "block_comment", "comment"],
    symbol_types: &[
        ("class_declaration", SymbolKind::Class),
        ("object_declaration", SymbolKind::Class),
        ("function_declaration", SymbolKind::Function),
    ],
    wrapper_types: &[],
};

const JAVA: LangConfig = LangConfig {
    name: "java",
    comment_types: &["line_comment", "block_comment"],
    symbol_types: &[
        ("class_declaration", SymbolKind::Class),
        ("interface_declaration", SymbolKind::Type),
        ("enum_declaration", SymbolKind::Class),
        ("record_declaration", SymbolKind::Class),
        ("annotation_type_declaration", SymbolKind::Type),
        ("method_declaration", SymbolKind::Function),
    ],
    wrapper_types: &[],
};

const C: LangConfig = LangConfig {
    name: "c",
    comment_types: &["comment"],
    symbol_types: &[
        ("function_definition", SymbolKind::Function),
        ("struct_specifier", SymbolKind::Class),
        ("enum_specifier", SymbolKind::Class),
        ("type_definition", SymbolKind::Type),
    ],
    wrapper_types: &[],
};

const CPP: LangConfig = LangConfig {
    name: "cpp",
    comment_types: &["comment"],
    symbol_types: &[
        ("function_definition", SymbolKind::Function),
        ("struct_specifier", SymbolKind::Class),
        ("class_specifier", SymbolKind::Class),
        ("enum_specifier", SymbolKind::Class),
        ("type_definition", SymbolKind::Type),
    ],
    wrapper_types: &[],
};

#[cfg(feature = "swift")]
const SWIFT: LangConfig = LangConfig {
    name: "swift",
    comment_types: &["comment", "multiline_comment"],
    symbol_types: &[
        ("class_declaration", SymbolKind::Class),
        ("protocol_declaration", SymbolKind::Type),
        ("function_declaration", SymbolKind::Function),
    ],
    wrapper_types: &[],
};

#[cfg(feature = "objc")]
const OBJC: LangConfig = LangConfig {
    name: "objc",
    comment_types: &["comment"],
    symbol_types: &[
        ("class_interface", SymbolKind::Class),
        ("class_implementation", SymbolKind::Class),
        ("protocol_declaration", SymbolKind::Type),
        ("function_definition", SymbolKind::Function),
    ],
    wrapper_types: &[],
};

/// Grammar + config for one file extension.
pub struct LangSupport {
    pub language: Language,
    pub config: &'static LangConfig,
}

fn load_language(ext: &str) -> Option<LangSupport> {
    let (language, config): (Language, &'static LangConfig) = match ext {
        ".py" => (tree_sitter_python::language(), &PYTHON),
        ".ts" | ".js" => (tree_sitter_typescript::language_typescript(), &TYPESCRIPT),
        ".tsx" | ".jsx" => (tree_sitter_typescript::language_tsx(), &TYPESCRIPT),
        ".go" => (tree_sitter_go::language(), &GO),
        ".rs" => (tree_sitter_rust::language(), &RUST),
        ".kt" | ".kts" => (tree_sitter_kotlin::language(), &KOTLIN),
        ".java" => (tree_sitter_java::language(), &JAVA),
        ".c" | ".h" => (tree_sitter_c::language(), &C),
        ".cc" | ".cpp" | ".cxx" | ".hpp" => (tree_sitter_cpp::language(), &CPP),
        #[cfg(feature = "swift")]
        ".swift" => (tree_sitter_swift::language(), &SWIFT),
        #[cfg(feature = "objc")]
        ".m" | ".mm" => (tree_sitter_objc::language(), &OBJC),
        _ => return None,
    };
    Some(LangSupport { language, config })
}

/// Extensions with compiled-in grammars, sorted. Cached per process.
pub fn supported_extensions() -> &'static [String] {
    static EXTENSIONS: OnceLock<Vec<String>> = OnceLock::new();
    EXTENSIONS.get_or_init(|| {
        let mut all = vec![
            ".py", ".ts", ".tsx", ".js", ".jsx", ".go", ".rs", ".kt", ".kts", ".java", ".c",
            ".h", ".cc", ".cpp", ".cxx", ".hpp", ".m", ".mm", ".swift",
        ];
        all.retain(|ext| load_language(ext).is_some());
        let mut out: Vec<String> = all.into_iter().map(str::to_string).collect();
        out.sort();
        out
    })
}

/// Get the language support for a file extension, `None` when unsupported
/// or the grammar is not compiled in.
pub fn get_lang_support(extension: &str) -> Option<LangSupport> {
    load_language(extension)
}

/// Digest of the currently available grammar set. A change in this value
/// (e.g. a build with new grammar features) forces the next incremental
/// reindex to upgrade to a full one.
pub fn parser_fingerprint() -> String {
    sha256_hex(supported_extensions().join("|").as_bytes())
}

fn annotation_regexes() -> (&'static Regex, &'static Regex) {
    static ANNOTATION_RE: OnceLock<Regex> = OnceLock::new();
    static KV_RE: OnceLock<Regex> = OnceLock::new();
    (
        ANNOTATION_RE.get_or_init(|| Regex::new(r"beadloom:(.+)").unwrap()),
        KV_RE.get_or_init(|| Regex::new(r"(\w+)=(\S+)").unwrap()),
    )
}

/// All ref_ids a symbol's annotation map points at, in both bare-value and
/// `kind:value` form (`domain=auth` can bind to node `auth` or
/// `domain:auth`).
pub fn annotation_refs(annotations: &BTreeMap<String, String>) -> Vec<String> {
    let mut refs = Vec::new();
    for (key, value) in annotations {
        refs.push(value.clone());
        refs.push(format!("{key}:{value}"));
    }
    refs
}

/// Parse a beadloom annotation from a comment line.
///
/// Format: `beadloom:<key>=<value>[ <key>=<value>]*`
/// Returns an empty map when the line carries no annotation.
pub fn parse_annotations(line: &str) -> BTreeMap<String, String> {
    let (annotation_re, kv_re) = annotation_regexes();
    let mut out = BTreeMap::new();
    if let Some(caps) = annotation_re.captures(line) {
        let payload = &caps[1];
        for kv in kv_re.captures_iter(payload) {
            out.insert(kv[1].to_string(), kv[2].to_string());
        }
    }
    out
}

fn node_text(node: Node<'_>, source: &[u8]) -> Option<String> {
    node.utf8_text(source).ok().map(str::to_string)
}

/// Extract the symbol name from a definition node.
///
/// Handles the standard `name` field, the Go `type_declaration` (name lives
/// inside a `type_spec` child), C-family declarators, and grammars that
/// expose no fields at all (Kotlin, Objective-C).
fn symbol_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return node_text(name, source);
    }

    // Go type_declaration: name is in a type_spec child.
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "type_spec" {
            if let Some(name) = child.child_by_field_name("name") {
                return node_text(name, source);
            }
        }
    }

    // C/C++ definitions carry their identifier under the declarator.
    if let Some(declarator) = node.child_by_field_name("declarator") {
        if let Some(name) = first_identifier(declarator, source) {
            return Some(name);
        }
    }

    // Field-less grammars: first identifier-like direct child.
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(
            child.kind(),
            "type_identifier" | "simple_identifier" | "identifier"
        ) {
            return node_text(child, source);
        }
    }

    None
}

fn first_identifier(node: Node<'_>, source: &[u8]) -> Option<String> {
    if matches!(
        node.kind(),
        "identifier" | "type_identifier" | "field_identifier"
    ) {
        return node_text(node, source);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(name) = first_identifier(child, source) {
            return Some(name);
        }
    }
    None
}

/// Unwrap wrapper types (decorators, export statements) to find the actual
/// definition one level down.
fn unwrap_node<'a>(node: Node<'a>, config: &LangConfig) -> Option<Node<'a>> {
    if !config.is_wrapper(node.kind()) {
        return Some(node);
    }
    let mut cursor = node.walk();
    let child = node
        .children(&mut cursor)
        .find(|c| config.symbol_kind(c.kind()).is_some());
    child
}

/// Extract top-level symbols from a source file using tree-sitter.
///
/// Language is detected by file extension; an unsupported extension or
/// empty file yields an empty list. Walks the root children as a small
/// state machine: a comment carrying a beadloom annotation becomes the
/// pending annotation (and seeds the module-level annotation until the
/// first symbol is emitted); wrapper nodes are unwrapped one level; any
/// other child clears the pending annotation.
pub fn extract_symbols(file_path: &Path) -> Result<Vec<Symbol>, BeadloomError> {
    let ext = extension_of(file_path);
    let Some(support) = get_lang_support(&ext) else {
        return Ok(Vec::new());
    };

    let content = fs::read_to_string(file_path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file_hash = sha256_hex(content.as_bytes());
    let source = content.as_bytes();

    let mut parser = Parser::new();
    parser
        .set_language(&support.language)
        .map_err(|e| BeadloomError::Validation(format!("grammar init failed: {e}")))?;
    let Some(tree) = parser.parse(source, None) else {
        return Ok(Vec::new());
    };

    let config = support.config;
    let mut symbols = Vec::new();
    let mut pending: BTreeMap<String, String> = BTreeMap::new();
    let mut module: BTreeMap<String, String> = BTreeMap::new();
    let mut found_first_symbol = false;

    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if config.is_comment(child.kind()) {
            let text = node_text(child, source).unwrap_or_default();
            let ann = parse_annotations(&text);
            if !ann.is_empty() {
                if !found_first_symbol {
                    module.extend(ann.clone());
                }
                pending = ann;
            }
            continue;
        }

        let actual = if config.is_wrapper(child.kind()) {
            match unwrap_node(child, config) {
                Some(inner) => inner,
                None => {
                    pending.clear();
                    continue;
                }
            }
        } else if config.symbol_kind(child.kind()).is_none() {
            pending.clear();
            continue;
        } else {
            child
        };

        let Some(kind) = config.symbol_kind(actual.kind()) else {
            pending.clear();
            continue;
        };
        let Some(name) = symbol_name(actual, source) else {
            pending.clear();
            continue;
        };

        found_first_symbol = true;
        // Module-level annotations apply to every symbol; the pending
        // symbol-specific map overrides on key collision.
        let mut annotations = module.clone();
        annotations.extend(pending.clone());

        symbols.push(Symbol {
            symbol_name: name,
            kind: kind.as_str().to_string(),
            line_start: child.start_position().row as i64 + 1,
            line_end: child.end_position().row as i64 + 1,
            annotations,
            file_hash: file_hash.clone(),
        });
        pending.clear();
    }

    Ok(symbols)
}

/// File extension with leading dot, lowercased (`.py`, `.rs`, ...).
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}
