//! Identity-keyed upserts used by bulk ingestion.
//!
//! An update-by-identity does not know the backend ID of its target. It names
//! an identity kind and a set of identity properties; the backend merges on
//! those and creates the entity if nothing matches.

use super::kind::{Kind, Kinds};
use super::node::Node;
use super::properties::PropertyError;
use super::relationship::Relationship;

/// Grouping key for update-by-identity operations.
///
/// Updates with the same shape are rendered as one parameterized bulk
/// statement with one payload row per update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeShape {
    /// Kind matched on during the merge.
    pub identity_kind: Option<Kind>,
    /// Sorted identity property names.
    pub identity_properties: Vec<String>,
    /// Kinds applied to the merged node.
    pub kinds: Vec<Kind>,
}

/// Grouping key for relationship updates-by-identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipShape {
    /// Relationship kind.
    pub kind: Kind,
    /// Sorted relationship identity property names.
    pub identity_properties: Vec<String>,
    /// Shape of the start node merge.
    pub start: NodeShape,
    /// Shape of the end node merge.
    pub end: NodeShape,
}

/// Merge a node on its identity properties.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    /// Node payload. Its kinds are applied and its properties merged.
    pub node: Node,
    /// Kind to match on, if any.
    pub identity_kind: Option<Kind>,
    /// Properties that identify the node.
    pub identity_properties: Vec<String>,
}

impl NodeUpdate {
    /// Create an update matching on `identity_kind` and `identity_properties`.
    pub fn new(node: Node, identity_kind: Option<Kind>, identity_properties: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            node,
            identity_kind,
            identity_properties: identity_properties.into_iter().map(Into::into).collect(),
        }
    }

    fn sorted_identity(&self) -> Vec<String> {
        let mut properties = self.identity_properties.clone();
        properties.sort();
        properties
    }

    /// Identity key: the sorted identity properties' values concatenated.
    pub fn key(&self) -> Result<String, PropertyError> {
        identity_key(&self.node.properties, &self.sorted_identity())
    }

    /// All kinds applied to the merged node, identity kind first.
    pub fn applied_kinds(&self) -> Kinds {
        let mut kinds = Kinds::new();
        if let Some(identity_kind) = &self.identity_kind {
            kinds.add(identity_kind.clone());
        }
        kinds.concatenate(&self.node.kinds)
    }

    /// Grouping shape.
    pub fn shape(&self) -> NodeShape {
        NodeShape {
            identity_kind: self.identity_kind.clone(),
            identity_properties: self.sorted_identity(),
            kinds: self.applied_kinds().into_iter().collect(),
        }
    }
}

/// Merge a relationship and both of its endpoints on identity properties.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipUpdate {
    /// Relationship payload.
    pub relationship: Relationship,
    /// Relationship identity properties (may be empty: then start, end, and kind identify it).
    pub identity_properties: Vec<String>,
    /// Start node payload.
    pub start: Node,
    /// Start node identity kind.
    pub start_identity_kind: Option<Kind>,
    /// Start node identity properties.
    pub start_identity_properties: Vec<String>,
    /// End node payload.
    pub end: Node,
    /// End node identity kind.
    pub end_identity_kind: Option<Kind>,
    /// End node identity properties.
    pub end_identity_properties: Vec<String>,
}

impl RelationshipUpdate {
    /// The start endpoint as a node update.
    pub fn start_update(&self) -> NodeUpdate {
        NodeUpdate {
            node: self.start.clone(),
            identity_kind: self.start_identity_kind.clone(),
            identity_properties: self.start_identity_properties.clone(),
        }
    }

    /// The end endpoint as a node update.
    pub fn end_update(&self) -> NodeUpdate {
        NodeUpdate {
            node: self.end.clone(),
            identity_kind: self.end_identity_kind.clone(),
            identity_properties: self.end_identity_properties.clone(),
        }
    }

    fn sorted_identity(&self) -> Vec<String> {
        let mut properties = self.identity_properties.clone();
        properties.sort();
        properties
    }

    /// Identity key: kind, start key, relationship identity values, end key.
    pub fn key(&self) -> Result<String, PropertyError> {
        let start_key = self.start_update().key()?;
        let end_key = self.end_update().key()?;

        let relationship_key = identity_values(&self.relationship.properties, &self.sorted_identity())?;

        let mut parts = vec![self.relationship.kind.to_string(), start_key];
        parts.extend(relationship_key);
        parts.push(end_key);
        Ok(parts.join(KEY_SEPARATOR))
    }

    /// Grouping shape.
    pub fn shape(&self) -> RelationshipShape {
        RelationshipShape {
            kind: self.relationship.kind.clone(),
            identity_properties: self.sorted_identity(),
            start: self.start_update().shape(),
            end: self.end_update().shape(),
        }
    }
}

/// Joins identity values so that `{a: "ab", b: "c"}` and `{a: "a", b: "bc"}` stay distinct.
const KEY_SEPARATOR: &str = "\u{1f}";

fn identity_values(properties: &super::properties::Properties, identity: &[String]) -> Result<Vec<String>, PropertyError> {
    identity
        .iter()
        .map(|property| {
            properties
                .value(property)
                .map(|value| value.to_string())
                .ok_or_else(|| PropertyError::NotFound(property.clone()))
        })
        .collect()
}

fn identity_key(properties: &super::properties::Properties, identity: &[String]) -> Result<String, PropertyError> {
    if identity.is_empty() {
        return Err(PropertyError::MissingIdentity);
    }

    Ok(identity_values(properties, identity)?.join(KEY_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Properties;

    fn user(objectid: &str) -> Node {
        Node::prepare(
            Properties::new().with("objectid", objectid).with("name", "n"),
            [Kind::new("Base"), Kind::new("User")],
        )
    }

    #[test]
    fn test_node_key_uses_sorted_identity() {
        let node = Node::prepare(Properties::new().with("b", "2").with("a", "1"), [Kind::new("Base")]);
        let update = NodeUpdate::new(node, None, ["b", "a"]);
        assert_eq!(update.key().unwrap(), "1\u{1f}2");
    }

    #[test]
    fn test_node_key_keeps_value_boundaries() {
        let a = Node::prepare(Properties::new().with("a", "ab").with("b", "c"), [Kind::new("Base")]);
        let b = Node::prepare(Properties::new().with("a", "a").with("b", "bc"), [Kind::new("Base")]);
        assert_ne!(
            NodeUpdate::new(a, None, ["a", "b"]).key().unwrap(),
            NodeUpdate::new(b, None, ["a", "b"]).key().unwrap()
        );
    }

    #[test]
    fn test_node_key_requires_identity() {
        let update = NodeUpdate::new(user("1"), Some(Kind::new("Base")), Vec::<String>::new());
        assert_eq!(update.key().unwrap_err(), PropertyError::MissingIdentity);
    }

    #[test]
    fn test_shape_ignores_payload_values() {
        let a = NodeUpdate::new(user("1"), Some(Kind::new("Base")), ["objectid"]);
        let b = NodeUpdate::new(user("2"), Some(Kind::new("Base")), ["objectid"]);
        assert_eq!(a.shape(), b.shape());
        assert_ne!(a.key().unwrap(), b.key().unwrap());
        assert_eq!(a.applied_kinds().strings(), vec!["Base", "User"]);
    }

    #[test]
    fn test_relationship_key() {
        let update = RelationshipUpdate {
            relationship: Relationship::prepare(Properties::new(), Kind::new("HasSession")),
            identity_properties: vec![],
            start: user("s"),
            start_identity_kind: Some(Kind::new("Base")),
            start_identity_properties: vec!["objectid".into()],
            end: user("e"),
            end_identity_kind: Some(Kind::new("Base")),
            end_identity_properties: vec!["objectid".into()],
        };

        assert_eq!(update.key().unwrap(), "HasSession\u{1f}s\u{1f}e");
    }
}
