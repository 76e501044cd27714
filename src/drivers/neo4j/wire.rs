//! JSON shapes of the transactional HTTP endpoint.
//!
//! Rows are requested in both `row` and `graph` formats: `row` carries
//! scalars and property maps, `meta` says which positions are entities, and
//! `graph` carries the labels, types and endpoints needed to rebuild them.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::json;

use super::CypherRows;
use crate::error::{MappingError, Result};
use crate::mapper::{Cell, NativeNode, NativePath, NativeRelationship};
use crate::query::cypher::Statement;
use crate::types::Value;

/// Response to any transactional endpoint call.
#[derive(Debug, Deserialize)]
pub struct TxResponse {
    /// Commit URL of an open transaction.
    #[serde(default)]
    pub commit: Option<String>,
    /// One result per submitted statement.
    #[serde(default)]
    pub results: Vec<TxResult>,
    /// Statement or transaction errors.
    #[serde(default)]
    pub errors: Vec<TxError>,
}

/// Result of one statement.
#[derive(Debug, Deserialize)]
pub struct TxResult {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows.
    #[serde(default)]
    pub data: Vec<TxRow>,
}

/// One row in `row` + `graph` format.
#[derive(Debug, Deserialize)]
pub struct TxRow {
    /// Cell values.
    #[serde(default)]
    pub row: Vec<serde_json::Value>,
    /// Entity metadata aligned with `row`.
    #[serde(default)]
    pub meta: Vec<serde_json::Value>,
    /// Entities referenced by the row.
    #[serde(default)]
    pub graph: Option<TxGraph>,
}

/// Entities referenced by a row.
#[derive(Debug, Default, Deserialize)]
pub struct TxGraph {
    #[serde(default)]
    nodes: Vec<GraphNode>,
    #[serde(default)]
    relationships: Vec<GraphRelationship>,
}

#[derive(Debug, Deserialize)]
struct GraphNode {
    id: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphRelationship {
    id: String,
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(rename = "startNode")]
    start_node: String,
    #[serde(rename = "endNode")]
    end_node: String,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

/// A reported error.
#[derive(Debug, Clone, Deserialize)]
pub struct TxError {
    /// Status code, e.g. `Neo.ClientError.Statement.SyntaxError`.
    pub code: String,
    /// Detail.
    pub message: String,
}

impl std::fmt::Display for TxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for TxError {}

/// Request body running one statement.
pub fn request_body(statement: &Statement) -> serde_json::Value {
    let parameters: serde_json::Map<String, serde_json::Value> = statement
        .parameters
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect();

    json!({
        "statements": [{
            "statement": statement.text,
            "parameters": parameters,
            "resultDataContents": ["row", "graph"],
        }]
    })
}

/// Transaction ID from a commit URL (`…/db/neo4j/tx/42/commit`).
pub fn transaction_id(commit_url: &str) -> Option<String> {
    commit_url
        .trim_end_matches('/')
        .strip_suffix("/commit")?
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn parse_id(id: &str, target: &'static str) -> std::result::Result<i64, MappingError> {
    id.parse().map_err(|_| MappingError::MalformedComposite {
        target,
        reason: format!("non-numeric id {id}"),
    })
}

fn properties(map: serde_json::Map<String, serde_json::Value>) -> BTreeMap<String, Value> {
    map.into_iter().map(|(key, value)| (key, Value::from_json(value))).collect()
}

#[derive(Default)]
struct Entities {
    nodes: HashMap<i64, NativeNode>,
    relationships: HashMap<i64, NativeRelationship>,
}

impl Entities {
    fn index(graph: TxGraph) -> std::result::Result<Self, MappingError> {
        let mut entities = Entities::default();

        for node in graph.nodes {
            let id = parse_id(&node.id, "node")?;
            entities.nodes.insert(
                id,
                NativeNode {
                    id,
                    labels: node.labels,
                    properties: properties(node.properties),
                },
            );
        }

        for relationship in graph.relationships {
            let id = parse_id(&relationship.id, "relationship")?;
            entities.relationships.insert(
                id,
                NativeRelationship {
                    id,
                    start_id: parse_id(&relationship.start_node, "relationship")?,
                    end_id: parse_id(&relationship.end_node, "relationship")?,
                    rel_type: relationship.rel_type,
                    properties: properties(relationship.properties),
                },
            );
        }

        Ok(entities)
    }

    fn node(&self, meta: &serde_json::Value) -> std::result::Result<NativeNode, MappingError> {
        let id = meta_id(meta, "node")?;
        self.nodes.get(&id).cloned().ok_or_else(|| MappingError::MalformedComposite {
            target: "node",
            reason: format!("node {id} missing from graph data"),
        })
    }

    fn relationship(&self, meta: &serde_json::Value) -> std::result::Result<NativeRelationship, MappingError> {
        let id = meta_id(meta, "relationship")?;
        self.relationships
            .get(&id)
            .cloned()
            .ok_or_else(|| MappingError::MalformedComposite {
                target: "relationship",
                reason: format!("relationship {id} missing from graph data"),
            })
    }
}

fn meta_id(meta: &serde_json::Value, target: &'static str) -> std::result::Result<i64, MappingError> {
    meta.get("id")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| MappingError::MalformedComposite {
            target,
            reason: "meta entry without id".to_string(),
        })
}

fn meta_type(meta: &serde_json::Value) -> Option<&str> {
    meta.get("type").and_then(serde_json::Value::as_str)
}

/// Metas alternating node, relationship, node, … describe a path.
fn is_path(metas: &[serde_json::Value]) -> bool {
    metas.len() % 2 == 1
        && metas.iter().enumerate().all(|(position, meta)| {
            let expected = if position % 2 == 0 { "node" } else { "relationship" };
            meta_type(meta) == Some(expected)
        })
}

fn decode_cell(value: serde_json::Value, meta: &serde_json::Value, entities: &Entities) -> std::result::Result<Cell, MappingError> {
    match meta {
        serde_json::Value::Object(_) => match meta_type(meta) {
            Some("node") => Ok(Cell::Node(entities.node(meta)?)),
            Some("relationship") => Ok(Cell::Relationship(entities.relationship(meta)?)),
            _ => Ok(Cell::from_json(value)),
        },
        serde_json::Value::Array(metas) if is_path(metas) && metas.len() > 1 => {
            let mut path = NativePath {
                nodes: Vec::new(),
                relationships: Vec::new(),
            };
            for (position, meta) in metas.iter().enumerate() {
                if position % 2 == 0 {
                    path.nodes.push(entities.node(meta)?);
                } else {
                    path.relationships.push(entities.relationship(meta)?);
                }
            }
            Ok(Cell::Path(path))
        }
        serde_json::Value::Array(metas) => match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(position, item)| {
                    let meta = metas.get(position).unwrap_or(&serde_json::Value::Null);
                    decode_cell(item, meta, entities)
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Cell::List),
            other => Ok(Cell::from_json(other)),
        },
        _ => Ok(Cell::from_json(value)),
    }
}

/// Combine `row`, `meta` and `graph` data into cells.
pub fn decode_result(result: TxResult) -> Result<CypherRows> {
    let mut rows = Vec::with_capacity(result.data.len());

    for data in result.data {
        let entities = Entities::index(data.graph.unwrap_or_default())?;
        let cells = data
            .row
            .into_iter()
            .enumerate()
            .map(|(position, value)| {
                let meta = data.meta.get(position).unwrap_or(&serde_json::Value::Null);
                decode_cell(value, meta, &entities)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.push(cells);
    }

    Ok(CypherRows {
        columns: result.columns,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_from_commit_url() {
        assert_eq!(
            transaction_id("http://localhost:7474/db/neo4j/tx/42/commit"),
            Some("42".to_string())
        );
        assert_eq!(transaction_id("http://localhost:7474/db/neo4j/tx"), None);
    }

    #[test]
    fn test_request_body_asks_for_graph_format() {
        let statement = Statement::new(
            "match (n) where n.name = $p0 return n",
            BTreeMap::from([("p0".to_string(), Value::from("alice"))]),
        );
        let body = request_body(&statement);

        assert_eq!(body["statements"][0]["parameters"]["p0"], json!("alice"));
        assert_eq!(body["statements"][0]["resultDataContents"], json!(["row", "graph"]));
    }

    #[test]
    fn test_decode_nodes_and_paths_from_meta() {
        let response: TxResponse = serde_json::from_value(json!({
            "results": [{
                "columns": ["n", "p", "c"],
                "data": [{
                    "row": [
                        {"name": "alice"},
                        [{"name": "alice"}, {}, {"name": "admins"}],
                        3
                    ],
                    "meta": [
                        {"id": 1, "type": "node", "deleted": false},
                        [
                            {"id": 1, "type": "node", "deleted": false},
                            {"id": 7, "type": "relationship", "deleted": false},
                            {"id": 2, "type": "node", "deleted": false}
                        ],
                        null
                    ],
                    "graph": {
                        "nodes": [
                            {"id": "1", "labels": ["Base", "User"], "properties": {"name": "alice"}},
                            {"id": "2", "labels": ["Group"], "properties": {"name": "admins"}}
                        ],
                        "relationships": [
                            {"id": "7", "type": "MemberOf", "startNode": "1", "endNode": "2", "properties": {}}
                        ]
                    }
                }]
            }],
            "errors": []
        }))
        .unwrap();

        let rows = decode_result(response.results.into_iter().next().unwrap()).unwrap();
        let row = &rows.rows[0];

        assert!(matches!(&row[0], Cell::Node(node) if node.labels == vec!["Base", "User"]));
        match &row[1] {
            Cell::Path(path) => {
                assert_eq!(path.nodes.len(), 2);
                assert_eq!(path.relationships[0].rel_type, "MemberOf");
            }
            other => panic!("expected path, got {other:?}"),
        }
        assert_eq!(row[2], Cell::Int(3));
    }
}
