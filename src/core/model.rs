//! Closed vocabularies and shared record types for the knowledge graph.
//!
//! Node kinds, edge kinds, doc kinds, section tags, and symbol kinds are
//! fixed sets; the database CHECK constraints mirror these enums, so a write
//! outside the vocabulary fails at either layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Domain,
    Feature,
    Service,
    Entity,
    Adr,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Domain => "domain",
            NodeKind::Feature => "feature",
            NodeKind::Service => "service",
            NodeKind::Entity => "entity",
            NodeKind::Adr => "adr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "domain" => Some(NodeKind::Domain),
            "feature" => Some(NodeKind::Feature),
            "service" => Some(NodeKind::Service),
            "entity" => Some(NodeKind::Entity),
            "adr" => Some(NodeKind::Adr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    PartOf,
    DependsOn,
    Uses,
    Implements,
    TouchesEntity,
    TouchesCode,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::PartOf => "part_of",
            EdgeKind::DependsOn => "depends_on",
            EdgeKind::Uses => "uses",
            EdgeKind::Implements => "implements",
            EdgeKind::TouchesEntity => "touches_entity",
            EdgeKind::TouchesCode => "touches_code",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "part_of" => Some(EdgeKind::PartOf),
            "depends_on" => Some(EdgeKind::DependsOn),
            "uses" => Some(EdgeKind::Uses),
            "implements" => Some(EdgeKind::Implements),
            "touches_entity" => Some(EdgeKind::TouchesEntity),
            "touches_code" => Some(EdgeKind::TouchesCode),
            _ => None,
        }
    }

    /// Traversal priority for subgraph BFS (lower = expanded first).
    /// `uses` and `implements` tie; insertion order breaks the tie.
    pub fn priority(self) -> u8 {
        match self {
            EdgeKind::PartOf => 1,
            EdgeKind::TouchesEntity => 2,
            EdgeKind::Uses | EdgeKind::Implements => 3,
            EdgeKind::DependsOn => 4,
            EdgeKind::TouchesCode => 5,
        }
    }
}

/// Priority of an edge-kind string as stored; unknown kinds sort last.
pub fn edge_priority(kind: &str) -> u8 {
    EdgeKind::parse(kind).map(EdgeKind::priority).unwrap_or(99)
}

/// Classified section tag of a documentation chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Spec,
    Invariants,
    Api,
    Tests,
    Constraints,
    Other,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Spec => "spec",
            Section::Invariants => "invariants",
            Section::Api => "api",
            Section::Tests => "tests",
            Section::Constraints => "constraints",
            Section::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Type,
    Route,
    Component,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Type => "type",
            SymbolKind::Route => "route",
            SymbolKind::Component => "component",
        }
    }
}

/// Merge reindex-produced values into an existing extra blob.
///
/// Known reindex keys overwrite their previous values; unrelated keys
/// survive. A `None` value for a known key removes it.
pub fn merge_extra(
    existing: &Map<String, Value>,
    updates: &[(&str, Option<Value>)],
) -> Map<String, Value> {
    let mut merged = existing.clone();
    for (key, value) in updates {
        match value {
            Some(v) => {
                merged.insert((*key).to_string(), v.clone());
            }
            None => {
                merged.remove(*key);
            }
        }
    }
    merged
}

/// Tag list from a node's extra blob (`extra.tags`), empty when absent.
pub fn extra_tags(extra: &Map<String, Value>) -> Vec<String> {
    extra
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
