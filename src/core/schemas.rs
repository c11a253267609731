// src/core/schemas.rs
// Centralized database schema definitions for the Beadloom store.

pub const DB_NAME: &str = "beadloom.db";
pub const SCHEMA_VERSION: &str = "2";

/// Reserved file_index path for the tree-sitter grammar fingerprint.
pub const PARSER_FINGERPRINT_KEY: &str = "__parser_fingerprint__";

// --- Graph ---

pub const SCHEMA_NODES: &str = "
    CREATE TABLE IF NOT EXISTS nodes (
        ref_id  TEXT PRIMARY KEY,
        kind    TEXT NOT NULL CHECK(kind IN ('domain','feature','service','entity','adr')),
        summary TEXT NOT NULL DEFAULT '',
        source  TEXT,
        extra   TEXT DEFAULT '{}'
    )
";

pub const SCHEMA_EDGES: &str = "
    CREATE TABLE IF NOT EXISTS edges (
        src_ref_id TEXT NOT NULL REFERENCES nodes(ref_id) ON DELETE CASCADE,
        dst_ref_id TEXT NOT NULL REFERENCES nodes(ref_id) ON DELETE CASCADE,
        kind       TEXT NOT NULL CHECK(kind IN (
            'part_of','depends_on','uses','implements',
            'touches_entity','touches_code'
        )),
        extra      TEXT DEFAULT '{}',
        PRIMARY KEY (src_ref_id, dst_ref_id, kind)
    )
";

// --- Documentation ---

pub const SCHEMA_DOCS: &str = "
    CREATE TABLE IF NOT EXISTS docs (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        path     TEXT NOT NULL UNIQUE,
        kind     TEXT NOT NULL CHECK(kind IN (
            'feature','domain','service','adr','architecture','other'
        )),
        ref_id   TEXT REFERENCES nodes(ref_id) ON DELETE SET NULL,
        metadata TEXT DEFAULT '{}',
        hash     TEXT NOT NULL
    )
";

pub const SCHEMA_CHUNKS: &str = "
    CREATE TABLE IF NOT EXISTS chunks (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_id      INTEGER NOT NULL REFERENCES docs(id) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        heading     TEXT NOT NULL DEFAULT '',
        section     TEXT NOT NULL DEFAULT '',
        content     TEXT NOT NULL,
        node_ref_id TEXT REFERENCES nodes(ref_id) ON DELETE SET NULL
    )
";

// --- Code ---

pub const SCHEMA_CODE_SYMBOLS: &str = "
    CREATE TABLE IF NOT EXISTS code_symbols (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path   TEXT NOT NULL,
        symbol_name TEXT NOT NULL,
        kind        TEXT NOT NULL CHECK(kind IN (
            'function','class','type','route','component'
        )),
        line_start  INTEGER NOT NULL,
        line_end    INTEGER NOT NULL,
        annotations TEXT DEFAULT '{}',
        file_hash   TEXT NOT NULL
    )
";

pub const SCHEMA_CODE_IMPORTS: &str = "
    CREATE TABLE IF NOT EXISTS code_imports (
        file_path       TEXT NOT NULL,
        line_number     INTEGER NOT NULL,
        import_path     TEXT NOT NULL,
        resolved_ref_id TEXT REFERENCES nodes(ref_id) ON DELETE SET NULL,
        file_hash       TEXT NOT NULL,
        PRIMARY KEY (file_path, line_number, import_path)
    )
";

// --- Doc/code sync ---

pub const SCHEMA_SYNC_STATE: &str = "
    CREATE TABLE IF NOT EXISTS sync_state (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_path          TEXT NOT NULL,
        code_path         TEXT NOT NULL,
        ref_id            TEXT NOT NULL REFERENCES nodes(ref_id),
        code_hash_at_sync TEXT NOT NULL,
        doc_hash_at_sync  TEXT NOT NULL,
        synced_at         TEXT NOT NULL,
        status            TEXT NOT NULL DEFAULT 'ok' CHECK(status IN ('ok','stale')),
        symbols_hash      TEXT DEFAULT '',
        UNIQUE(doc_path, code_path)
    )
";

// --- Architecture rules ---

pub const SCHEMA_RULES: &str = "
    CREATE TABLE IF NOT EXISTS rules (
        name        TEXT PRIMARY KEY,
        rule_type   TEXT NOT NULL CHECK(rule_type IN ('deny','require')),
        description TEXT NOT NULL DEFAULT '',
        severity    TEXT NOT NULL DEFAULT 'error' CHECK(severity IN ('error','warning','info')),
        rule_json   TEXT NOT NULL DEFAULT '{}',
        enabled     INTEGER NOT NULL DEFAULT 1
    )
";

// --- Index bookkeeping ---

pub const SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const SCHEMA_FILE_INDEX: &str = "
    CREATE TABLE IF NOT EXISTS file_index (
        path     TEXT PRIMARY KEY,
        hash     TEXT NOT NULL,
        mtime_ns INTEGER NOT NULL DEFAULT 0
    )
";

// --- Snapshots ---

pub const SCHEMA_GRAPH_SNAPSHOTS: &str = "
    CREATE TABLE IF NOT EXISTS graph_snapshots (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        label         TEXT,
        created_at    TEXT NOT NULL,
        nodes_json    TEXT NOT NULL,
        edges_json    TEXT NOT NULL,
        symbols_count INTEGER NOT NULL DEFAULT 0
    )
";

pub const SCHEMA_HEALTH_SNAPSHOTS: &str = "
    CREATE TABLE IF NOT EXISTS health_snapshots (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        taken_at       TEXT NOT NULL,
        nodes_count    INTEGER NOT NULL,
        edges_count    INTEGER NOT NULL,
        docs_count     INTEGER NOT NULL,
        coverage_pct   REAL NOT NULL,
        stale_count    INTEGER NOT NULL,
        isolated_count INTEGER NOT NULL
    )
";

// --- Full-text search ---

pub const SCHEMA_NODE_SEARCH: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS node_search USING fts5(
        ref_id UNINDEXED,
        kind UNINDEXED,
        summary,
        content
    )
";

pub const SCHEMA_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind)",
    "CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src_ref_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst_ref_id)",
    "CREATE INDEX IF NOT EXISTS idx_docs_ref ON docs(ref_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_node ON chunks(node_ref_id)",
    "CREATE INDEX IF NOT EXISTS idx_symbols_file ON code_symbols(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_imports_resolved ON code_imports(resolved_ref_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_status ON sync_state(status)",
    "CREATE INDEX IF NOT EXISTS idx_sync_ref ON sync_state(ref_id)",
];

/// All CREATE statements in dependency order.
pub fn all_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        SCHEMA_NODES,
        SCHEMA_EDGES,
        SCHEMA_DOCS,
        SCHEMA_CHUNKS,
        SCHEMA_CODE_SYMBOLS,
        SCHEMA_CODE_IMPORTS,
        SCHEMA_SYNC_STATE,
        SCHEMA_RULES,
        SCHEMA_META,
        SCHEMA_FILE_INDEX,
        SCHEMA_GRAPH_SNAPSHOTS,
        SCHEMA_HEALTH_SNAPSHOTS,
        SCHEMA_NODE_SEARCH,
    ];
    stmts.extend_from_slice(SCHEMA_INDEXES);
    stmts
}
