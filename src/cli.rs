//! CLI struct definitions for the Beadloom command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "beadloom",
    version = env!("CARGO_PKG_VERSION"),
    about = "Beadloom is the per-project knowledge graph and context oracle that AI coding assistants call on demand for focused context bundles, impact analysis, doc-drift detection, and architecture-rule enforcement.",
    disable_version_flag = true
)]
pub struct Cli {
    /// Project root (defaults to the current working directory).
    #[clap(long, global = true)]
    pub project: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize `.beadloom/` scaffolding in a project
    Init {
        /// Seed the graph from the project's source directories
        #[clap(long)]
        bootstrap: bool,
        /// Import existing YAML shards from a directory
        #[clap(long, value_name = "DIR", conflicts_with = "bootstrap")]
        import: Option<PathBuf>,
        /// Seed from a named preset (webapp, library)
        #[clap(long, value_name = "NAME", conflicts_with_all = ["bootstrap", "import"])]
        preset: Option<String>,
    },
    /// Rebuild the index from graph YAML, docs, and source code
    Reindex {
        /// Full rebuild instead of the incremental default
        #[clap(long)]
        full: bool,
        /// Docs directory override (default `docs/`)
        #[clap(long, value_name = "PATH")]
        docs_dir: Option<PathBuf>,
    },
    /// Build a context bundle for one or more nodes
    Ctx {
        /// Focus node ref_ids
        #[clap(required = true)]
        ref_ids: Vec<String>,
        /// Graph traversal depth
        #[clap(long, default_value_t = 2)]
        depth: usize,
        /// Max nodes in the subgraph
        #[clap(long, default_value_t = 20)]
        max_nodes: usize,
        /// Max text chunks in the bundle
        #[clap(long, default_value_t = 10)]
        max_chunks: usize,
        /// Emit the bundle as JSON
        #[clap(long)]
        json: bool,
        /// Emit the bundle as Markdown
        #[clap(long, conflicts_with = "json")]
        markdown: bool,
    },
    /// Evaluate architecture rules against the index
    Lint {
        /// Exit 1 when violations are present
        #[clap(long)]
        strict: bool,
        /// Skip the incremental reindex before evaluating
        #[clap(long)]
        no_reindex: bool,
        /// Output format
        #[clap(long, value_enum, default_value = "rich")]
        format: LintFormat,
    },
    /// Impact analysis: what depends on a node, what it depends on
    Why {
        ref_id: String,
        /// Lead with dependents instead of dependencies
        #[clap(long)]
        reverse: bool,
        #[clap(long)]
        json: bool,
    },
    /// Graph diff since a git ref or against a snapshot
    Diff {
        /// Git ref to compare against
        #[clap(long, default_value = "HEAD", conflicts_with = "snapshot")]
        since: String,
        /// Snapshot id to compare against
        #[clap(long)]
        snapshot: Option<i64>,
        #[clap(long)]
        json: bool,
    },
    /// Capture the current graph as a snapshot
    Snapshot {
        /// Optional label (e.g. a release tag)
        #[clap(long)]
        label: Option<String>,
    },
    /// Read-only preflight health checks
    Doctor {
        #[clap(long)]
        json: bool,
    },
    /// Index statistics and a health snapshot
    Status {
        #[clap(long)]
        json: bool,
    },
    /// Full-text search over node summaries and doc content
    Search {
        query: String,
        /// Filter by node kind
        #[clap(long)]
        kind: Option<String>,
        #[clap(long, default_value_t = 10)]
        limit: usize,
        #[clap(long)]
        json: bool,
    },
    /// Documentation maintenance
    Docs {
        #[clap(subcommand)]
        command: DocsCommand,
    },
    /// Serve the RPC tool interface over stdio
    McpServe,
}

#[derive(Subcommand, Debug)]
pub enum DocsCommand {
    /// Report numeric doc claims that disagree with the live index
    Audit {
        #[clap(long)]
        json: bool,
    },
    /// Write skeleton docs for undocumented nodes
    Generate,
    /// Report skeleton sections that still need prose
    Polish,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LintFormat {
    Rich,
    Json,
    Porcelain,
}
