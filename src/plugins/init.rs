//! Project initialization: scaffold `.beadloom/` and seed the graph.
//!
//! `--bootstrap` proposes one node per top-level source directory;
//! `--import DIR` copies existing YAML shards; `--preset NAME` seeds a
//! canned starter graph.

use crate::core::error::BeadloomError;
use std::fs;
use std::path::Path;

#[derive(Debug, Default)]
pub struct InitOptions {
    pub bootstrap: bool,
    pub import_dir: Option<std::path::PathBuf>,
    pub preset: Option<String>,
}

#[derive(Debug, Default)]
pub struct InitResult {
    pub created: Vec<String>,
    pub warnings: Vec<String>,
}

const CONFIG_TEMPLATE: &str = "\
# Beadloom project configuration.
# languages:
#   - python
#   - typescript
# scan_paths:
#   - src
# docs_audit:
#   exclude_paths: []
";

const SEED_SHARD: &str = "\
# Architecture graph shard. Add nodes and edges as the project grows.
nodes: []
edges: []
";

fn preset_shard(name: &str) -> Option<&'static str> {
    match name {
        "webapp" => Some(
            "nodes:\n  - ref_id: frontend\n    kind: domain\n    summary: UI layer\n    source: src/frontend/\n  - ref_id: backend\n    kind: domain\n    summary: API and business logic\n    source: src/backend/\n  - ref_id: storage\n    kind: domain\n    summary: Persistence layer\n    source: src/storage/\nedges:\n  - src: frontend\n    dst: backend\n    kind: depends_on\n  - src: backend\n    dst: storage\n    kind: depends_on\n",
        ),
        "library" => Some(
            "nodes:\n  - ref_id: core\n    kind: domain\n    summary: Core library\n    source: src/\n  - ref_id: api\n    kind: service\n    summary: Public API surface\nedges:\n  - src: api\n    dst: core\n    kind: part_of\n",
        ),
        _ => None,
    }
}

/// Scan top-level directories under src/ (or the root) and emit one
/// domain node per directory.
fn bootstrap_shard(project_root: &Path) -> String {
    let mut dirs: Vec<String> = Vec::new();
    for base in ["src", "lib", "app"] {
        let base_dir = project_root.join(base);
        if !base_dir.is_dir() {
            continue;
        }
        if let Ok(entries) = fs::read_dir(&base_dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if !name.starts_with('.') && name != "__pycache__" {
                        dirs.push(format!("{base}/{name}"));
                    }
                }
            }
        }
    }
    dirs.sort();

    if dirs.is_empty() {
        return SEED_SHARD.to_string();
    }

    let mut shard = String::from("nodes:\n");
    for dir in &dirs {
        let ref_id = dir.rsplit('/').next().unwrap_or(dir);
        shard.push_str(&format!(
            "  - ref_id: {ref_id}\n    kind: domain\n    summary: ''\n    source: {dir}/\n"
        ));
    }
    shard.push_str("edges: []\n");
    shard
}

/// Initialize a Beadloom project at `project_root`.
///
/// Existing files are never overwritten; re-running init on an
/// initialized project only reports what already exists.
pub fn init_project(project_root: &Path, opts: &InitOptions) -> Result<InitResult, BeadloomError> {
    let mut result = InitResult::default();
    let beadloom_dir = project_root.join(".beadloom");
    let graph_dir = beadloom_dir.join("_graph");
    fs::create_dir_all(&graph_dir)?;

    let config_path = beadloom_dir.join("config.yml");
    if !config_path.exists() {
        fs::write(&config_path, CONFIG_TEMPLATE)?;
        result.created.push(".beadloom/config.yml".into());
    }

    if let Some(import_dir) = &opts.import_dir {
        if !import_dir.is_dir() {
            return Err(BeadloomError::Path(format!(
                "import directory {} does not exist",
                import_dir.display()
            )));
        }
        let mut imported = 0;
        for entry in fs::read_dir(import_dir)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().map(|e| e == "yml").unwrap_or(false) {
                let name = path.file_name().unwrap_or_default().to_os_string();
                let target = graph_dir.join(&name);
                if target.exists() {
                    result
                        .warnings
                        .push(format!("{} already exists, skipped", name.to_string_lossy()));
                    continue;
                }
                fs::copy(&path, &target)?;
                imported += 1;
                result
                    .created
                    .push(format!(".beadloom/_graph/{}", name.to_string_lossy()));
            }
        }
        if imported == 0 {
            result
                .warnings
                .push(format!("no YAML shards found in {}", import_dir.display()));
        }
        return Ok(result);
    }

    let seed_path = graph_dir.join("graph.yml");
    if seed_path.exists() {
        result
            .warnings
            .push(".beadloom/_graph/graph.yml already exists, left untouched".into());
        return Ok(result);
    }

    let shard = if let Some(preset) = &opts.preset {
        preset_shard(preset)
            .ok_or_else(|| BeadloomError::Config(format!("unknown preset '{preset}'")))?
            .to_string()
    } else if opts.bootstrap {
        bootstrap_shard(project_root)
    } else {
        SEED_SHARD.to_string()
    };
    fs::write(&seed_path, shard)?;
    result.created.push(".beadloom/_graph/graph.yml".into());

    Ok(result)
}
