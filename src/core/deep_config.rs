//! Deep config reader: excerpt scripts, workspaces, and aliases from
//! well-known project manifests.
//!
//! Parsed sources: `pyproject.toml`, `package.json`, `tsconfig.json`,
//! `Cargo.toml`, and Gradle build files. Parse failures are silent
//! degradations; the excerpt simply stays empty.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

fn gradle_plugin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Groovy `id 'java'` and Kotlin DSL `id("java")`
    RE.get_or_init(|| Regex::new(r#"id\s*\(\s*['"]([^'"]+)['"]\s*\)|id\s+['"]([^'"]+)['"]"#).unwrap())
}

fn gradle_dep_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:implementation|api|compileOnly|runtimeOnly|testImplementation|testCompileOnly|testRuntimeOnly)\s*[\('"]([^)'"]+)[\)'"]"#,
        )
        .unwrap()
    })
}

fn read_toml(path: &Path) -> Option<toml::Value> {
    let content = fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

fn read_json(path: &Path) -> Option<Value> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn toml_to_json(value: &toml::Value) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn parse_pyproject(project_root: &Path) -> Option<Value> {
    let data = read_toml(&project_root.join("pyproject.toml"))?;
    let mut result = Map::new();

    if let Some(scripts) = data.get("project").and_then(|p| p.get("scripts")) {
        result.insert("scripts".into(), toml_to_json(scripts));
    }
    if let Some(tool) = data.get("tool") {
        if let Some(pytest) = tool.get("pytest").and_then(|p| p.get("ini_options")) {
            result.insert("pytest".into(), toml_to_json(pytest));
        }
        if let Some(ruff) = tool.get("ruff") {
            result.insert("ruff".into(), toml_to_json(ruff));
        }
    }
    if let Some(build) = data.get("build-system") {
        result.insert("build_system".into(), toml_to_json(build));
    }

    (!result.is_empty()).then(|| Value::Object(result))
}

fn parse_package_json(project_root: &Path) -> Option<Value> {
    let data = read_json(&project_root.join("package.json"))?;
    let mut result = Map::new();
    for key in ["scripts", "workspaces", "engines", "type"] {
        if let Some(value) = data.get(key) {
            result.insert(key.to_string(), value.clone());
        }
    }
    (!result.is_empty()).then(|| Value::Object(result))
}

fn parse_tsconfig(project_root: &Path) -> Option<Value> {
    let data = read_json(&project_root.join("tsconfig.json"))?;
    let options = data.get("compilerOptions")?;
    let mut result = Map::new();
    for key in ["paths", "baseUrl", "target", "module"] {
        if let Some(value) = options.get(key) {
            result.insert(key.to_string(), value.clone());
        }
    }
    (!result.is_empty()).then(|| Value::Object(result))
}

fn parse_cargo_toml(project_root: &Path) -> Option<Value> {
    let data = read_toml(&project_root.join("Cargo.toml"))?;
    let mut result = Map::new();
    if let Some(workspace) = data.get("workspace").and_then(|w| w.get("members")) {
        result.insert("workspace_members".into(), toml_to_json(workspace));
    }
    if let Some(package) = data.get("package") {
        let mut pkg = Map::new();
        for key in ["name", "version", "edition"] {
            if let Some(value) = package.get(key) {
                pkg.insert(key.to_string(), toml_to_json(value));
            }
        }
        if !pkg.is_empty() {
            result.insert("package".into(), Value::Object(pkg));
        }
    }
    if let Some(bins) = data.get("bin") {
        result.insert("bins".into(), toml_to_json(bins));
    }
    (!result.is_empty()).then(|| Value::Object(result))
}

fn parse_gradle(project_root: &Path) -> Option<Value> {
    let path = ["build.gradle", "build.gradle.kts"]
        .iter()
        .map(|name| project_root.join(name))
        .find(|p| p.is_file())?;
    let content = fs::read_to_string(&path).ok()?;

    let plugins: Vec<String> = gradle_plugin_re()
        .captures_iter(&content)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
        })
        .collect();
    let dependencies: Vec<String> = gradle_dep_re()
        .captures_iter(&content)
        .map(|caps| caps[1].to_string())
        .collect();

    if plugins.is_empty() && dependencies.is_empty() {
        return None;
    }
    Some(json!({ "plugins": plugins, "dependencies": dependencies }))
}

/// Collect manifest excerpts for the root node's `extra.config`.
///
/// The excerpt is a flat merge: pyproject.toml and package.json sections
/// land at the top level (later manifests win key collisions), while
/// tsconfig/Cargo/Gradle keep a namespaced sub-map. Returns an empty map
/// when no recognized manifest yields anything.
pub fn read_deep_config(project_root: &Path) -> Map<String, Value> {
    let mut result = Map::new();
    for parsed in [
        parse_pyproject(project_root),
        parse_package_json(project_root),
    ]
    .into_iter()
    .flatten()
    {
        if let Value::Object(sections) = parsed {
            for (key, value) in sections {
                result.insert(key, value);
            }
        }
    }
    if let Some(v) = parse_tsconfig(project_root) {
        result.insert("tsconfig".into(), v);
    }
    if let Some(v) = parse_cargo_toml(project_root) {
        result.insert("cargo".into(), v);
    }
    if let Some(v) = parse_gradle(project_root) {
        result.insert("gradle".into(), v);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pyproject_scripts() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[project.scripts]\nbeadloom = \"beadloom.cli:main\"\n\n[tool.ruff]\nline-length = 100\n",
        )
        .unwrap();
        let config = read_deep_config(dir.path());
        assert_eq!(config["scripts"]["beadloom"], json!("beadloom.cli:main"));
        assert_eq!(config["ruff"]["line-length"], json!(100));
    }

    #[test]
    fn test_package_json_scripts_and_workspaces() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"build": "tsc"}, "workspaces": ["packages/*"]}"#,
        )
        .unwrap();
        let config = read_deep_config(dir.path());
        assert_eq!(config["scripts"]["build"], json!("tsc"));
        assert_eq!(config["workspaces"], json!(["packages/*"]));
    }

    #[test]
    fn test_tsconfig_paths() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{"compilerOptions": {"baseUrl": ".", "paths": {"@app/*": ["src/*"]}}}"#,
        )
        .unwrap();
        let config = read_deep_config(dir.path());
        assert_eq!(config["tsconfig"]["baseUrl"], json!("."));
    }

    #[test]
    fn test_cargo_toml_package() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        let config = read_deep_config(dir.path());
        assert_eq!(config["cargo"]["package"]["name"], json!("demo"));
    }

    #[test]
    fn test_gradle_plugins_and_deps() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("build.gradle"),
            "plugins {\n    id 'java'\n}\ndependencies {\n    implementation 'com.acme:core:1.0'\n}\n",
        )
        .unwrap();
        let config = read_deep_config(dir.path());
        assert_eq!(config["gradle"]["plugins"], json!(["java"]));
        assert_eq!(config["gradle"]["dependencies"], json!(["com.acme:core:1.0"]));
    }

    #[test]
    fn test_no_manifests_empty() {
        let dir = tempdir().unwrap();
        assert!(read_deep_config(dir.path()).is_empty());
    }

    #[test]
    fn test_malformed_manifest_degrades() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{not json").unwrap();
        assert!(read_deep_config(dir.path()).is_empty());
    }
}
