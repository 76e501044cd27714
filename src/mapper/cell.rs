//! Backend-native result cells.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::types::Value;

/// A node as returned by the native engine: labels are names, not codes.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeNode {
    /// Engine identity.
    pub id: i64,
    /// Label names.
    pub labels: Vec<String>,
    /// Property map.
    pub properties: BTreeMap<String, Value>,
}

/// A relationship as returned by the native engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRelationship {
    /// Engine identity.
    pub id: i64,
    /// Start node identity.
    pub start_id: i64,
    /// End node identity.
    pub end_id: i64,
    /// Relationship type name.
    pub rel_type: String,
    /// Property map.
    pub properties: BTreeMap<String, Value>,
}

/// A path as returned by the native engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NativePath {
    /// Nodes in walk order.
    pub nodes: Vec<NativeNode>,
    /// Relationships in walk order.
    pub relationships: Vec<NativeRelationship>,
}

/// One value of a result row before it is mapped into the domain model.
///
/// The relational backend produces scalars, arrays, and JSON composites
/// (`Map` cells with `id` / `kind_ids` / `properties` fields); the native
/// backend produces scalars and structural `Node` / `Relationship` / `Path`
/// cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    /// SQL `NULL` or Cypher `null`.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer width.
    Int(i64),
    /// Any float width.
    Float(f64),
    /// Text.
    String(String),
    /// Timestamp.
    DateTime(DateTime<Utc>),
    /// Array or list.
    List(Vec<Cell>),
    /// JSON object, Cypher map, or relational composite.
    Map(BTreeMap<String, Cell>),
    /// Native node.
    Node(NativeNode),
    /// Native relationship.
    Relationship(NativeRelationship),
    /// Native path.
    Path(NativePath),
}

impl Cell {
    /// Shape name used in mapping errors.
    pub fn shape(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::String(_) => "string",
            Cell::DateTime(_) => "datetime",
            Cell::List(_) => "list",
            Cell::Map(_) => "map",
            Cell::Node(_) => "node",
            Cell::Relationship(_) => "relationship",
            Cell::Path(_) => "path",
        }
    }

    /// Build a cell from JSON. Integral numbers become `Int`.
    pub fn from_json(json: serde_json::Value) -> Cell {
        match json {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            serde_json::Value::String(s) => Cell::String(s),
            serde_json::Value::Array(items) => Cell::List(items.into_iter().map(Cell::from_json).collect()),
            serde_json::Value::Object(map) => {
                Cell::Map(map.into_iter().map(|(k, v)| (k, Cell::from_json(v))).collect())
            }
        }
    }

    /// Field of a map cell.
    pub fn field(&self, name: &str) -> Option<&Cell> {
        match self {
            Cell::Map(map) => map.get(name),
            _ => None,
        }
    }

    /// Render as JSON for display. Structural cells become objects.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => Value::Float(*f).to_json(),
            Cell::String(s) => serde_json::Value::String(s.clone()),
            Cell::DateTime(dt) => Value::DateTime(*dt).to_json(),
            Cell::List(items) => serde_json::Value::Array(items.iter().map(Cell::to_json).collect()),
            Cell::Map(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Cell::Node(node) => serde_json::json!({
                "id": node.id,
                "labels": node.labels,
                "properties": Value::Map(node.properties.clone()).to_json(),
            }),
            Cell::Relationship(rel) => serde_json::json!({
                "id": rel.id,
                "start_id": rel.start_id,
                "end_id": rel.end_id,
                "type": rel.rel_type,
                "properties": Value::Map(rel.properties.clone()).to_json(),
            }),
            Cell::Path(path) => serde_json::json!({
                "nodes": path.nodes.iter().map(|n| Cell::Node(n.clone()).to_json()).collect::<Vec<_>>(),
                "relationships": path.relationships.iter().map(|r| Cell::Relationship(r.clone()).to_json()).collect::<Vec<_>>(),
            }),
        }
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(b),
            Value::Int(i) => Cell::Int(i),
            Value::Float(f) => Cell::Float(f),
            Value::String(s) => Cell::String(s),
            Value::DateTime(dt) => Cell::DateTime(dt),
            Value::List(items) => Cell::List(items.into_iter().map(Cell::from).collect()),
            Value::Map(map) => Cell::Map(map.into_iter().map(|(k, v)| (k, Cell::from(v))).collect()),
        }
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::String(v.to_string())
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}
