//! Route extraction: recognize common web-framework route declarations.
//!
//! Decorator patterns (FastAPI, Flask) and method-call patterns (Express)
//! are matched textually per line; the surrounding reindex pass aggregates
//! hits into each node's `extra.routes`.

use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// A single extracted HTTP route.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub handler: String,
    pub file: String,
    pub line: i64,
    pub framework: String,
}

fn decorator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // @app.get("/users"), @router.post('/x')
    RE.get_or_init(|| {
        Regex::new(r#"@(\w+)\.(get|post|put|delete|patch|head|options)\(\s*["']([^"']+)["']"#)
            .unwrap()
    })
}

fn flask_route_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // @app.route("/users", methods=["GET", "POST"])
    RE.get_or_init(|| Regex::new(r#"@(\w+)\.route\(\s*["']([^"']+)["'](.*)"#).unwrap())
}

fn methods_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["'](GET|POST|PUT|DELETE|PATCH)["']"#).unwrap())
}

fn express_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // app.get('/login', handler) / router.post("/items", ...)
    RE.get_or_init(|| {
        Regex::new(r#"\b(app|router)\.(get|post|put|delete|patch)\(\s*["']([^"']+)["']"#).unwrap()
    })
}

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:async\s+)?def\s+(\w+)").unwrap())
}

/// Name of the first function definition at or after `start` (Python
/// decorator handler lookup).
fn next_def_name(lines: &[&str], start: usize) -> String {
    for line in lines.iter().skip(start).take(5) {
        if let Some(caps) = def_re().captures(line) {
            return caps[1].to_string();
        }
    }
    String::new()
}

/// Extract routes from one source file. `rel_path` is recorded on each hit.
pub fn extract_routes(abs_path: &Path, rel_path: &str) -> Vec<Route> {
    let Ok(content) = fs::read_to_string(abs_path) else {
        return Vec::new();
    };
    let is_python = rel_path.ends_with(".py");
    let is_js = [".ts", ".tsx", ".js", ".jsx"]
        .iter()
        .any(|ext| rel_path.ends_with(ext));
    if !is_python && !is_js {
        return Vec::new();
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut routes = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx as i64 + 1;

        if is_python {
            if let Some(caps) = decorator_re().captures(line) {
                routes.push(Route {
                    method: caps[2].to_uppercase(),
                    path: caps[3].to_string(),
                    handler: next_def_name(&lines, idx + 1),
                    file: rel_path.to_string(),
                    line: line_no,
                    framework: "fastapi".to_string(),
                });
                continue;
            }
            if let Some(caps) = flask_route_re().captures(line) {
                let tail = caps.get(3).map(|m| m.as_str()).unwrap_or("");
                let methods: Vec<String> = methods_re()
                    .captures_iter(tail)
                    .map(|m| m[1].to_string())
                    .collect();
                let methods = if methods.is_empty() {
                    vec!["GET".to_string()]
                } else {
                    methods
                };
                let handler = next_def_name(&lines, idx + 1);
                for method in methods {
                    routes.push(Route {
                        method,
                        path: caps[2].to_string(),
                        handler: handler.clone(),
                        file: rel_path.to_string(),
                        line: line_no,
                        framework: "flask".to_string(),
                    });
                }
                continue;
            }
        }

        if is_js {
            if let Some(caps) = express_re().captures(line) {
                routes.push(Route {
                    method: caps[2].to_uppercase(),
                    path: caps[3].to_string(),
                    handler: String::new(),
                    file: rel_path.to_string(),
                    line: line_no,
                    framework: "express".to_string(),
                });
            }
        }
    }

    routes
}
