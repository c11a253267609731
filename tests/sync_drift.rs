//! End-to-end drift detection: baselines survive incremental reindex and
//! symbol changes surface as `symbols_changed`.

use beadloom::core::reindex::{incremental_reindex, ReindexOptions};
use beadloom::core::store::{db_path, open_db};
use beadloom::core::sync_engine::{check_sync, mark_synced};
use std::fs;
use std::path::{Path, PathBuf};

fn project(root: &Path) -> PathBuf {
    let project = root.join("proj");
    fs::create_dir_all(project.join(".beadloom").join("_graph")).unwrap();
    fs::create_dir_all(project.join("docs")).unwrap();
    fs::create_dir_all(project.join("src").join("auth")).unwrap();
    fs::write(
        project.join(".beadloom/_graph/domains.yml"),
        "nodes:\n  - ref_id: auth\n    kind: domain\n    summary: \"Auth domain\"\n    source: src/auth/\n    docs:\n      - docs/auth.md\n",
    )
    .unwrap();
    fs::write(
        project.join("docs/auth.md"),
        "# Auth\n\nThis domain contains the core module.\n",
    )
    .unwrap();
    fs::write(
        project.join("src/auth/core.py"),
        "# beadloom:domain=auth\ndef login():\n    return True\n",
    )
    .unwrap();
    project
}

#[test]
fn symbol_drift_detected_after_reindex() {
    let tmp = tempfile::tempdir().unwrap();
    let project = project(tmp.path());

    // Initial reindex establishes the baseline and the sync pair.
    incremental_reindex(&project, &ReindexOptions::default()).unwrap();
    {
        let conn = open_db(&db_path(&project)).unwrap();
        let docs_dir = project.join("docs");
        let results = check_sync(&conn, &project, &docs_dir).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.reason.as_deref() != Some("symbols_changed")));
    }

    // Mark synced, then add a new symbol and reindex incrementally.
    {
        let conn = open_db(&db_path(&project)).unwrap();
        mark_synced(&conn, "auth").unwrap();
    }
    fs::write(
        project.join("src/auth/core.py"),
        "# beadloom:domain=auth\ndef login():\n    return True\n\ndef logout():\n    return False\n",
    )
    .unwrap();
    incremental_reindex(&project, &ReindexOptions::default()).unwrap();

    let conn = open_db(&db_path(&project)).unwrap();
    let docs_dir = project.join("docs");
    let results = check_sync(&conn, &project, &docs_dir).unwrap();
    let stale: Vec<_> = results.iter().filter(|r| r.status == "stale").collect();
    assert!(!stale.is_empty(), "expected stale entries, got: {results:?}");
    assert!(
        stale
            .iter()
            .any(|r| r.reason.as_deref() == Some("symbols_changed")),
        "expected symbols_changed reason, got: {stale:?}"
    );
}

#[test]
fn untracked_file_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let project = project(tmp.path());
    incremental_reindex(&project, &ReindexOptions::default()).unwrap();

    // New file without an annotation.
    fs::write(project.join("src/auth/utils.py"), "def helper():\n    pass\n").unwrap();

    let conn = open_db(&db_path(&project)).unwrap();
    let gaps =
        beadloom::core::sync_engine::check_source_coverage(&conn, &project).unwrap();
    assert!(!gaps.is_empty());
    assert!(gaps[0]
        .untracked_files
        .contains(&"src/auth/utils.py".to_string()));
}

#[test]
fn missing_module_mention_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let project = project(tmp.path());
    // A second module the doc never mentions.
    fs::write(
        project.join("src/auth/sessions.py"),
        "# beadloom:domain=auth\ndef start():\n    pass\n",
    )
    .unwrap();
    incremental_reindex(&project, &ReindexOptions::default()).unwrap();

    let conn = open_db(&db_path(&project)).unwrap();
    let docs_dir = project.join("docs");
    let entries =
        beadloom::core::sync_engine::check_module_mentions(&conn, &project, &docs_dir).unwrap();
    assert!(entries
        .iter()
        .any(|e| e.missing_modules.contains(&"sessions".to_string())));
    // 'core' is mentioned in the doc.
    assert!(entries
        .iter()
        .all(|e| !e.missing_modules.contains(&"core".to_string())));
}

#[test]
fn mark_synced_clears_drift() {
    let tmp = tempfile::tempdir().unwrap();
    let project = project(tmp.path());
    incremental_reindex(&project, &ReindexOptions::default()).unwrap();

    fs::write(
        project.join("src/auth/core.py"),
        "# beadloom:domain=auth\ndef login():\n    return True\n\ndef logout():\n    return False\n",
    )
    .unwrap();
    incremental_reindex(&project, &ReindexOptions::default()).unwrap();

    let conn = open_db(&db_path(&project)).unwrap();
    let docs_dir = project.join("docs");
    let before = check_sync(&conn, &project, &docs_dir).unwrap();
    assert!(before.iter().any(|r| r.status == "stale"));

    mark_synced(&conn, "auth").unwrap();
    let drift = beadloom::core::sync_engine::check_symbol_drift(&conn).unwrap();
    assert!(drift.is_empty());
}
