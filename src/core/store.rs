//! Database connection, schema, and hashing utilities.
//!
//! The single `.beadloom/beadloom.db` file is the source of truth for all
//! derived state. Every connection re-enables foreign keys (a per-connection
//! switch in SQLite) and selects write-ahead journaling, so one writer and
//! any number of readers can coexist.

use crate::core::error::BeadloomError;
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Path of the store file inside a project root.
pub fn db_path(project_root: &Path) -> PathBuf {
    project_root.join(".beadloom").join(schemas::DB_NAME)
}

/// Open (or create) the store with Beadloom's standard configuration.
///
/// Enables:
/// - WAL (write-ahead logging) journal mode
/// - Foreign key constraints
/// - 5-second busy timeout for lock contention
pub fn open_db(path: &Path) -> Result<Connection, BeadloomError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Create all tables and indexes if they don't exist.
///
/// Safe to call multiple times (every statement uses IF NOT EXISTS).
/// Also stamps the `schema_version` meta key when absent.
pub fn ensure_schema(conn: &Connection) -> Result<(), BeadloomError> {
    for stmt in schemas::all_statements() {
        conn.execute(stmt, [])?;
    }
    if meta_get(conn, "schema_version")?.is_none() {
        meta_set(conn, "schema_version", schemas::SCHEMA_VERSION)?;
    }
    Ok(())
}

/// Read a value from the `meta` table, `None` when the key doesn't exist.
pub fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>, BeadloomError> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    Ok(value)
}

/// Insert or update a key in the `meta` table.
pub fn meta_set(conn: &Connection, key: &str, value: &str) -> Result<(), BeadloomError> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// SHA-256 hex digest of a byte slice. All Beadloom content hashes use this.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Digest of a symbol set: `name:kind` tokens joined by `|` over a
/// lexicographically sorted list.
pub fn symbols_digest(symbols: &[(String, String)]) -> String {
    let mut tokens: Vec<String> = symbols
        .iter()
        .map(|(name, kind)| format!("{name}:{kind}"))
        .collect();
    tokens.sort();
    sha256_hex(tokens.join("|").as_bytes())
}

/// Run `f` inside a single transaction; commits on Ok, rolls back on Err.
pub fn with_tx<T>(
    conn: &mut Connection,
    f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, BeadloomError>,
) -> Result<T, BeadloomError> {
    let tx = conn.transaction()?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}
