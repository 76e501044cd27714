//! Declarative schema descriptions.

use std::fmt;

use super::kind::Kinds;

/// Index flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexType {
    /// Ordered index for equality and range predicates.
    #[default]
    BTree,
    /// Trigram / full-text index for substring predicates.
    TextSearch,
}

impl std::str::FromStr for IndexType {
    type Err = String;

    /// Parse from the short name used in index names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "btree" => Ok(IndexType::BTree),
            "gin" | "text" => Ok(IndexType::TextSearch),
            _ => Err(format!("unknown index type: {s}")),
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexType::BTree => write!(f, "btree"),
            IndexType::TextSearch => write!(f, "text"),
        }
    }
}

/// A property index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Index {
    /// Backend name; derived from table/kind and field when empty.
    pub name: String,
    /// Indexed property.
    pub field: String,
    /// Index flavour.
    pub index_type: IndexType,
}

impl Index {
    /// Index on `field` with a derived name.
    pub fn new(field: impl Into<String>, index_type: IndexType) -> Self {
        Self {
            name: String::new(),
            field: field.into(),
            index_type,
        }
    }
}

/// A uniqueness constraint on a property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    /// Backend name; derived when empty.
    pub name: String,
    /// Constrained property.
    pub field: String,
    /// Backing index flavour.
    pub index_type: IndexType,
}

impl Constraint {
    /// Constraint on `field` with a derived name.
    pub fn new(field: impl Into<String>, index_type: IndexType) -> Self {
        Self {
            name: String::new(),
            field: field.into(),
            index_type,
        }
    }
}

/// Desired schema of one graph namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphSchema {
    /// Namespace name.
    pub name: String,
    /// Node kinds defined in the namespace.
    pub nodes: Kinds,
    /// Relationship kinds defined in the namespace.
    pub edges: Kinds,
    /// Node property indexes.
    pub node_indexes: Vec<Index>,
    /// Node uniqueness constraints.
    pub node_constraints: Vec<Constraint>,
    /// Relationship property indexes.
    pub edge_indexes: Vec<Index>,
    /// Relationship uniqueness constraints.
    pub edge_constraints: Vec<Constraint>,
}

impl GraphSchema {
    /// Namespace with no kinds or indexes.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Desired schema of the whole database.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    /// All namespaces.
    pub graphs: Vec<GraphSchema>,
    /// Namespace targeted when a transaction names none.
    pub default_graph: Option<GraphSchema>,
}

impl Schema {
    /// Schema with a single namespace that is also the default.
    pub fn single(graph: GraphSchema) -> Self {
        Self {
            graphs: vec![graph.clone()],
            default_graph: Some(graph),
        }
    }

    /// Every node kind across namespaces.
    pub fn node_kinds(&self) -> Kinds {
        self.graphs.iter().fold(Kinds::new(), |acc, graph| acc.concatenate(&graph.nodes))
    }

    /// Every relationship kind across namespaces.
    pub fn edge_kinds(&self) -> Kinds {
        self.graphs.iter().fold(Kinds::new(), |acc, graph| acc.concatenate(&graph.edges))
    }
}
