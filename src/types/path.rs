//! Traversal results.

use serde::Serialize;

use super::id::ID;
use super::node::Node;
use super::relationship::Relationship;

/// An ordered alternation of nodes and relationships.
///
/// A non-empty path has exactly one more node than it has edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Path {
    /// Nodes in walk order.
    pub nodes: Vec<Node>,
    /// Edges in walk order; edge `i` joins node `i` and node `i + 1`.
    pub edges: Vec<Relationship>,
}

/// One step of a path walk.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    /// Node the step leaves from.
    pub from: &'a Node,
    /// Edge taken.
    pub edge: &'a Relationship,
    /// Node the step arrives at.
    pub to: &'a Node,
}

impl Path {
    /// Build a path, checking the node/edge count invariant.
    pub fn new(nodes: Vec<Node>, edges: Vec<Relationship>) -> Option<Self> {
        let valid = if nodes.is_empty() {
            edges.is_empty()
        } else {
            nodes.len() == edges.len() + 1
        };

        valid.then_some(Self { nodes, edges })
    }

    /// First node.
    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Last node.
    pub fn terminal(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// Node by ID.
    pub fn node(&self, id: ID) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Whether the path has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Iterate over (from, edge, to) steps in order.
    pub fn walk(&self) -> impl Iterator<Item = Segment<'_>> {
        self.edges.iter().enumerate().map(move |(idx, edge)| Segment {
            from: &self.nodes[idx],
            edge,
            to: &self.nodes[idx + 1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Kind, Properties};

    fn node(id: u64) -> Node {
        Node::new(ID::new(id), Properties::new(), [Kind::new("N")])
    }

    fn edge(id: u64, start: u64, end: u64) -> Relationship {
        Relationship::new(ID::new(id), ID::new(start), ID::new(end), Properties::new(), Kind::new("E"))
    }

    #[test]
    fn test_path_invariant() {
        assert!(Path::new(vec![node(1), node(2)], vec![edge(10, 1, 2)]).is_some());
        assert!(Path::new(vec![node(1)], vec![edge(10, 1, 2)]).is_none());
        assert!(Path::new(vec![], vec![]).is_some());
    }

    #[test]
    fn test_walk_yields_segments() {
        let path = Path::new(
            vec![node(1), node(2), node(3)],
            vec![edge(10, 1, 2), edge(11, 2, 3)],
        )
        .unwrap();

        let steps: Vec<_> = path.walk().map(|s| (s.from.id.get(), s.edge.id.get(), s.to.id.get())).collect();
        assert_eq!(steps, vec![(1, 10, 2), (2, 11, 3)]);
        assert_eq!(path.terminal().unwrap().id, ID::new(3));
    }
}
