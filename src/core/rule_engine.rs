//! Architecture rule engine: load deny/require rules from YAML and
//! evaluate them against the indexed graph and resolved imports.
//!
//! A matcher selects nodes by `ref_id`, `kind`, or a `tag` in the node's
//! extra payload. Invalid rule configuration is a hard error, distinct
//! from violations.

use crate::core::error::BeadloomError;
use crate::core::model::{extra_tags, EdgeKind, NodeKind};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Node matcher: exactly one selector is used per matcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Matcher {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Matcher {
    fn is_empty(&self) -> bool {
        self.ref_id.is_none() && self.kind.is_none() && self.tag.is_none()
    }

    fn selector_count(&self) -> usize {
        usize::from(self.ref_id.is_some())
            + usize::from(self.kind.is_some())
            + usize::from(self.tag.is_some())
    }
}

/// The rule body: deny {from, to} or require {for, has_edge_to, edge_kind?}.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleBody {
    Deny {
        from: Matcher,
        to: Matcher,
    },
    Require {
        for_matcher: Matcher,
        has_edge_to: Matcher,
        edge_kind: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub severity: String,
    pub body: RuleBody,
}

impl Rule {
    pub fn rule_type(&self) -> &'static str {
        match self.body {
            RuleBody::Deny { .. } => "deny",
            RuleBody::Require { .. } => "require",
        }
    }

    /// Opaque JSON form of the body, as stored in the rules table.
    pub fn definition(&self) -> Value {
        match &self.body {
            RuleBody::Deny { from, to } => json!({ "from": from, "to": to }),
            RuleBody::Require {
                for_matcher,
                has_edge_to,
                edge_kind,
            } => {
                let mut map = Map::new();
                map.insert("for".into(), serde_json::to_value(for_matcher).unwrap_or(Value::Null));
                map.insert(
                    "has_edge_to".into(),
                    serde_json::to_value(has_edge_to).unwrap_or(Value::Null),
                );
                if let Some(kind) = edge_kind {
                    map.insert("edge_kind".into(), json!(kind));
                }
                Value::Object(map)
            }
        }
    }
}

/// A rule violation with location and endpoint details where applicable.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Violation {
    pub rule_name: String,
    pub rule_type: String,
    pub severity: String,
    pub file_path: Option<String>,
    pub line_number: Option<i64>,
    pub from_ref_id: Option<String>,
    pub to_ref_id: Option<String>,
    pub message: String,
    #[serde(skip)]
    pub rule_description: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RulesFile {
    version: Option<u32>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    name: Option<String>,
    #[serde(default)]
    description: String,
    severity: Option<String>,
    deny: Option<RawDeny>,
    require: Option<RawRequire>,
}

#[derive(Debug, Deserialize)]
struct RawDeny {
    from: Matcher,
    to: Matcher,
}

#[derive(Debug, Deserialize)]
struct RawRequire {
    #[serde(rename = "for")]
    for_matcher: Matcher,
    has_edge_to: Matcher,
    edge_kind: Option<String>,
}

fn validate_matcher(rule: &str, role: &str, matcher: &Matcher) -> Result<(), BeadloomError> {
    if matcher.is_empty() {
        return Err(BeadloomError::InvalidRules(format!(
            "rule '{rule}': '{role}' matcher needs ref_id, kind, or tag"
        )));
    }
    if let Some(kind) = &matcher.kind {
        if NodeKind::parse(kind).is_none() {
            return Err(BeadloomError::InvalidRules(format!(
                "rule '{rule}': '{role}' matcher has unknown kind '{kind}'"
            )));
        }
    }
    Ok(())
}

/// Load and validate `.beadloom/_graph/rules.yml`.
///
/// Accepts versions 1 and 2 (2 adds per-rule severities). Any structural
/// problem is an `InvalidRules` error.
pub fn load_rules(rules_path: &Path) -> Result<Vec<Rule>, BeadloomError> {
    let content = fs::read_to_string(rules_path)?;
    let file: RulesFile = serde_yaml::from_str(&content)
        .map_err(|e| BeadloomError::InvalidRules(e.to_string()))?;

    let version = file
        .version
        .ok_or_else(|| BeadloomError::InvalidRules("missing 'version' field".into()))?;
    if version != 1 && version != 2 {
        return Err(BeadloomError::InvalidRules(format!(
            "unsupported rules version {version}"
        )));
    }

    let mut rules = Vec::new();
    let mut seen = BTreeSet::new();
    for raw in file.rules {
        let name = raw
            .name
            .ok_or_else(|| BeadloomError::InvalidRules("rule without a 'name'".into()))?;
        if !seen.insert(name.clone()) {
            return Err(BeadloomError::InvalidRules(format!(
                "duplicate rule name '{name}'"
            )));
        }
        let severity = raw.severity.unwrap_or_else(|| "error".to_string());
        if !matches!(severity.as_str(), "error" | "warning" | "info") {
            return Err(BeadloomError::InvalidRules(format!(
                "rule '{name}': unknown severity '{severity}'"
            )));
        }

        let body = match (raw.deny, raw.require) {
            (Some(deny), None) => {
                validate_matcher(&name, "from", &deny.from)?;
                validate_matcher(&name, "to", &deny.to)?;
                RuleBody::Deny {
                    from: deny.from,
                    to: deny.to,
                }
            }
            (None, Some(require)) => {
                validate_matcher(&name, "for", &require.for_matcher)?;
                validate_matcher(&name, "has_edge_to", &require.has_edge_to)?;
                if let Some(kind) = &require.edge_kind {
                    if EdgeKind::parse(kind).is_none() {
                        return Err(BeadloomError::InvalidRules(format!(
                            "rule '{name}': unknown edge_kind '{kind}'"
                        )));
                    }
                }
                RuleBody::Require {
                    for_matcher: require.for_matcher,
                    has_edge_to: require.has_edge_to,
                    edge_kind: require.edge_kind,
                }
            }
            (Some(_), Some(_)) => {
                return Err(BeadloomError::InvalidRules(format!(
                    "rule '{name}' declares both 'deny' and 'require'"
                )))
            }
            (None, None) => {
                return Err(BeadloomError::InvalidRules(format!(
                    "rule '{name}' needs a 'deny' or 'require' block"
                )))
            }
        };

        rules.push(Rule {
            name,
            description: raw.description,
            severity,
            body,
        });
    }
    Ok(rules)
}

/// Validation warnings for otherwise-loadable rules (ambiguous matchers).
pub fn validate_rules(rules: &[Rule]) -> Vec<String> {
    let mut warnings = Vec::new();
    for rule in rules {
        let matchers: Vec<(&str, &Matcher)> = match &rule.body {
            RuleBody::Deny { from, to } => vec![("from", from), ("to", to)],
            RuleBody::Require {
                for_matcher,
                has_edge_to,
                ..
            } => vec![("for", for_matcher), ("has_edge_to", has_edge_to)],
        };
        for (role, matcher) in matchers {
            if matcher.selector_count() > 1 {
                warnings.push(format!(
                    "rule '{}': '{role}' matcher sets multiple selectors; ref_id wins",
                    rule.name
                ));
            }
        }
    }
    warnings
}

/// Persist loaded rules into the rules table (replace-all).
pub fn sync_rules_table(conn: &Connection, rules: &[Rule]) -> Result<(), BeadloomError> {
    conn.execute("DELETE FROM rules", [])?;
    for rule in rules {
        conn.execute(
            "INSERT INTO rules (name, rule_type, description, severity, rule_json, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            rusqlite::params![
                rule.name,
                rule.rule_type(),
                rule.description,
                rule.severity,
                serde_json::to_string(&rule.definition())?,
            ],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct NodeFacts {
    kind: String,
    tags: Vec<String>,
}

fn load_node_facts(conn: &Connection) -> Result<BTreeMap<String, NodeFacts>, BeadloomError> {
    let mut stmt = conn.prepare("SELECT ref_id, kind, extra FROM nodes")?;
    let rows: Vec<(String, String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<_, _>>()?;
    let mut facts = BTreeMap::new();
    for (ref_id, kind, extra_raw) in rows {
        let extra: Map<String, Value> = serde_json::from_str(&extra_raw).unwrap_or_default();
        facts.insert(
            ref_id,
            NodeFacts {
                kind,
                tags: extra_tags(&extra),
            },
        );
    }
    Ok(facts)
}

fn matches(matcher: &Matcher, ref_id: &str, facts: &BTreeMap<String, NodeFacts>) -> bool {
    if let Some(want) = &matcher.ref_id {
        return want == ref_id;
    }
    let Some(node) = facts.get(ref_id) else {
        return false;
    };
    if let Some(kind) = &matcher.kind {
        return &node.kind == kind;
    }
    if let Some(tag) = &matcher.tag {
        return node.tags.iter().any(|t| t == tag);
    }
    false
}

/// Resolve the node that owns a source file: annotated symbols first, then
/// the longest `nodes.source` prefix.
fn file_owner(
    conn: &Connection,
    file_path: &str,
    facts: &BTreeMap<String, NodeFacts>,
) -> Result<Option<String>, BeadloomError> {
    let annotations: Vec<String> = {
        let mut stmt =
            conn.prepare("SELECT annotations FROM code_symbols WHERE file_path = ?1")?;
        let mapped = stmt.query_map([file_path], |r| r.get(0))?;
        mapped.collect::<Result<_, _>>()?
    };
    for raw in annotations {
        let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(&raw) else {
            continue;
        };
        for (key, value) in &map {
            let qualified = format!("{key}:{value}");
            if facts.contains_key(&qualified) {
                return Ok(Some(qualified));
            }
            if facts.contains_key(value) {
                return Ok(Some(value.clone()));
            }
        }
    }

    let mut stmt = conn.prepare(
        "SELECT ref_id, source FROM nodes WHERE source IS NOT NULL AND source != ''",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    let mut best: Option<(String, usize)> = None;
    for (ref_id, source) in rows {
        let prefix = source.trim_end_matches('/');
        let hit = file_path == prefix || file_path.starts_with(&format!("{prefix}/"));
        if hit && best.as_ref().map(|(_, len)| prefix.len() > *len).unwrap_or(true) {
            best = Some((ref_id, prefix.len()));
        }
    }
    Ok(best.map(|(ref_id, _)| ref_id))
}

/// Evaluate all rules against the current store state.
///
/// Deny: fires for every resolved cross-module import whose source file
/// belongs to a node matching `from` and whose resolved target matches
/// `to`. Require: fires for every node matching `for` without a
/// qualifying outgoing edge.
pub fn evaluate_all(conn: &Connection, rules: &[Rule]) -> Result<Vec<Violation>, BeadloomError> {
    let facts = load_node_facts(conn)?;
    let mut violations = Vec::new();

    let imports: Vec<(String, i64, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT file_path, line_number, import_path, resolved_ref_id FROM code_imports
             WHERE resolved_ref_id IS NOT NULL
             ORDER BY file_path, line_number",
        )?;
        let mapped = stmt.query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?;
        mapped.collect::<Result<_, _>>()?
    };

    for rule in rules {
        match &rule.body {
            RuleBody::Deny { from, to } => {
                for (file_path, line_number, import_path, resolved) in &imports {
                    let Some(owner) = file_owner(conn, file_path, &facts)? else {
                        continue;
                    };
                    // Self-imports are not cross-module.
                    if &owner == resolved {
                        continue;
                    }
                    if matches(from, &owner, &facts) && matches(to, resolved, &facts) {
                        violations.push(Violation {
                            rule_name: rule.name.clone(),
                            rule_type: "deny".to_string(),
                            severity: rule.severity.clone(),
                            file_path: Some(file_path.clone()),
                            line_number: Some(*line_number),
                            from_ref_id: Some(owner.clone()),
                            to_ref_id: Some(resolved.clone()),
                            message: format!("imports {resolved} ({import_path})"),
                            rule_description: rule.description.clone(),
                        });
                    }
                }
            }
            RuleBody::Require {
                for_matcher,
                has_edge_to,
                edge_kind,
            } => {
                for ref_id in facts.keys() {
                    if !matches(for_matcher, ref_id, &facts) {
                        continue;
                    }
                    let targets: Vec<(String, String)> = {
                        let mut stmt = conn.prepare(
                            "SELECT dst_ref_id, kind FROM edges WHERE src_ref_id = ?1",
                        )?;
                        let mapped = stmt.query_map([ref_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
                        mapped.collect::<Result<_, _>>()?
                    };
                    let satisfied = targets.iter().any(|(dst, kind)| {
                        let kind_ok = edge_kind.as_deref().map(|k| k == kind).unwrap_or(true);
                        kind_ok && matches(has_edge_to, dst, &facts)
                    });
                    if !satisfied {
                        let wanted = edge_kind
                            .as_deref()
                            .map(|k| format!("'{k}' edge"))
                            .unwrap_or_else(|| "edge".to_string());
                        violations.push(Violation {
                            rule_name: rule.name.clone(),
                            rule_type: "require".to_string(),
                            severity: rule.severity.clone(),
                            file_path: None,
                            line_number: None,
                            from_ref_id: Some(ref_id.clone()),
                            to_ref_id: None,
                            message: format!("'{ref_id}' is missing a required {wanted}"),
                            rule_description: rule.description.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(violations)
}
