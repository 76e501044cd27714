//! Graph vertices.

use serde::Serialize;
use std::collections::BTreeMap;

use super::id::ID;
use super::kind::{Kind, Kinds};
use super::properties::Properties;

/// A graph vertex.
///
/// `added_kinds` and `deleted_kinds` record kind changes made since load; the
/// update path renders them and then clears them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    /// Backend identity, or [`ID::UNREGISTERED`] before create.
    pub id: ID,
    /// Kinds carried by the node.
    pub kinds: Kinds,
    /// Kinds added since load.
    #[serde(skip)]
    pub added_kinds: Kinds,
    /// Kinds removed since load.
    #[serde(skip)]
    pub deleted_kinds: Kinds,
    /// Property bag.
    pub properties: Properties,
}

impl Node {
    /// A node as loaded from a backend.
    pub fn new(id: ID, properties: Properties, kinds: impl Into<Kinds>) -> Self {
        Self {
            id,
            kinds: kinds.into(),
            added_kinds: Kinds::new(),
            deleted_kinds: Kinds::new(),
            properties,
        }
    }

    /// A node that has not been persisted yet.
    pub fn prepare(properties: Properties, kinds: impl Into<Kinds>) -> Self {
        Self::new(ID::UNREGISTERED, properties, kinds)
    }

    /// Add kinds, tracking the delta.
    pub fn add_kinds(&mut self, kinds: impl IntoIterator<Item = Kind>) {
        for kind in kinds {
            self.deleted_kinds.remove(&kind);
            if self.kinds.add(kind.clone()) {
                self.added_kinds.add(kind);
            }
        }
    }

    /// Remove kinds, tracking the delta.
    pub fn delete_kinds(&mut self, kinds: impl IntoIterator<Item = Kind>) {
        for kind in kinds {
            self.added_kinds.remove(&kind);
            if self.kinds.remove(&kind) {
                self.deleted_kinds.add(kind);
            }
        }
    }

    /// Whether kind or property changes are pending.
    pub fn has_deltas(&self) -> bool {
        !self.added_kinds.is_empty() || !self.deleted_kinds.is_empty() || self.properties.has_deltas()
    }

    /// Forget pending kind and property deltas.
    pub fn clear_deltas(&mut self) {
        self.added_kinds = Kinds::new();
        self.deleted_kinds = Kinds::new();
        self.properties.clear_deltas();
    }

    /// Fold another node into this one: kinds are unioned, properties merged.
    pub fn merge(&mut self, other: &Node) {
        self.add_kinds(other.kinds.iter().cloned());
        self.properties.merge(&other.properties);
    }
}

/// Nodes keyed by ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSet(BTreeMap<ID, Node>);

impl NodeSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node.
    pub fn add(&mut self, node: Node) {
        self.0.insert(node.id, node);
    }

    /// Node by ID.
    pub fn get(&self, id: ID) -> Option<&Node> {
        self.0.get(&id)
    }

    /// Whether the set has a node with this ID.
    pub fn contains(&self, id: ID) -> bool {
        self.0.contains_key(&id)
    }

    /// IDs in ascending order.
    pub fn ids(&self) -> Vec<ID> {
        self.0.keys().copied().collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over nodes in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.0.values()
    }
}

impl FromIterator<Node> for NodeSet {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        let mut set = NodeSet::new();
        for node in iter {
            set.add(node);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(name: &str) -> Kind {
        Kind::new(name)
    }

    #[test]
    fn test_kind_deltas_cancel() {
        let mut node = Node::new(ID::new(1), Properties::new(), [kind("Base")]);

        node.add_kinds([kind("User")]);
        assert_eq!(node.added_kinds.strings(), vec!["User"]);

        node.delete_kinds([kind("User")]);
        assert!(node.added_kinds.is_empty());
        assert!(node.deleted_kinds.is_empty());
        assert_eq!(node.kinds.strings(), vec!["Base"]);

        node.delete_kinds([kind("Base")]);
        assert_eq!(node.deleted_kinds.strings(), vec!["Base"]);
    }

    #[test]
    fn test_merge_unions_kinds() {
        let mut left = Node::prepare(Properties::new().with("a", 1), [kind("Base")]);
        let right = Node::prepare(Properties::new().with("b", 2), [kind("Base"), kind("User")]);

        left.merge(&right);

        assert_eq!(left.kinds.strings(), vec!["Base", "User"]);
        assert_eq!(left.properties.len(), 2);
    }

    #[test]
    fn test_node_set_is_keyed_by_id() {
        let set: NodeSet = [
            Node::new(ID::new(2), Properties::new(), [kind("A")]),
            Node::new(ID::new(1), Properties::new(), [kind("A")]),
            Node::new(ID::new(2), Properties::new(), [kind("B")]),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.ids(), vec![ID::new(1), ID::new(2)]);
        assert_eq!(set.get(ID::new(2)).unwrap().kinds.strings(), vec!["B"]);
    }
}
