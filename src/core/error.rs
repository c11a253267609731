//! Error types for Beadloom operations.
//!
//! This module defines the canonical error type used throughout Beadloom.
//! All subsystems return `Result<T, BeadloomError>` for error handling.

use std::io;
use thiserror::Error;

/// Canonical error type for all Beadloom operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
/// Many variants auto-convert from library errors via `#[from]`.
#[derive(Error, Debug)]
pub enum BeadloomError {
    /// SQLite database error (auto-converts from `rusqlite::Error`)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error (auto-converts from `std::io::Error`)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parse error (graph shards, rules file, config)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path resolution or validation error
    #[error("Path error: {0}")]
    Path(String),

    /// A focus/target ref_id does not exist. Carries up to five suggestions.
    #[error("{}", format_not_found(.ref_id, .suggestions))]
    RefNotFound {
        ref_id: String,
        suggestions: Vec<String>,
    },

    /// Invalid rules configuration (hard error, distinct from violations)
    #[error("Invalid rules configuration: {0}")]
    InvalidRules(String),

    /// Invalid `.beadloom/` project configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation or preflight failure (doctor, CI gate, schema check)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found (missing file, snapshot, git ref, etc.)
    #[error("Not found: {0}")]
    NotFound(String),
}

fn format_not_found(ref_id: &str, suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        format!("\"{ref_id}\" not found.")
    } else {
        format!(
            "\"{ref_id}\" not found. Did you mean: {}?",
            suggestions.join(", ")
        )
    }
}
