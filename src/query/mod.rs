//! Declarative criteria queries.
//!
//! Queries are built from free functions and compiled per backend:
//!
//! ```
//! use graph_access::query::{self, Query};
//!
//! let query = Query::matching(query::and([
//!     query::kind(query::Symbol::Node, "User"),
//!     query::equals(query::node_property("name"), "alice"),
//! ]))
//! .returning([query::node()]);
//!
//! let statement = graph_access::query::cypher::render(&query).unwrap();
//! assert_eq!(statement.text, "match (n) where n:User and n.name = $p0 return n");
//! ```

pub mod cypher;
pub mod model;
pub mod parser;
pub mod pgsql;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub use model::{Create, Expr, Operator, Pattern, Query, SortDirection, SortItem, Symbol, Traversal, Update};

use crate::types::{Kind, Kinds, Properties, Value, ID};

macro_rules! literal_expr {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Literal(Value::from(value))
                }
            }
        )*
    };
}

literal_expr!(Value, bool, i64, i32, u32, usize, f64, &str, String, DateTime<Utc>, ID, Kind, Kinds);

impl From<Vec<Value>> for Expr {
    fn from(values: Vec<Value>) -> Self {
        Expr::Literal(Value::List(values))
    }
}

// ─── References ───────────────────────────────────────────────────────────────

/// The node of a node query.
pub fn node() -> Expr {
    Expr::Variable(Symbol::Node)
}

/// The relationship of a relationship query.
pub fn relationship() -> Expr {
    Expr::Variable(Symbol::Relationship)
}

/// The start node of a relationship query.
pub fn start() -> Expr {
    Expr::Variable(Symbol::Start)
}

/// The end node of a relationship query.
pub fn end() -> Expr {
    Expr::Variable(Symbol::End)
}

/// The path of a relationship query.
pub fn path() -> Expr {
    Expr::Variable(Symbol::Path)
}

/// `id(n)`
pub fn node_id() -> Expr {
    Expr::Identity(Symbol::Node)
}

/// `id(r)`
pub fn relationship_id() -> Expr {
    Expr::Identity(Symbol::Relationship)
}

/// `id(s)`
pub fn start_id() -> Expr {
    Expr::Identity(Symbol::Start)
}

/// `id(e)`
pub fn end_id() -> Expr {
    Expr::Identity(Symbol::End)
}

/// A property of any variable.
pub fn property(symbol: Symbol, name: impl Into<String>) -> Expr {
    Expr::Property(symbol, name.into())
}

/// `n.<name>`
pub fn node_property(name: impl Into<String>) -> Expr {
    property(Symbol::Node, name)
}

/// `r.<name>`
pub fn relationship_property(name: impl Into<String>) -> Expr {
    property(Symbol::Relationship, name)
}

/// `s.<name>`
pub fn start_property(name: impl Into<String>) -> Expr {
    property(Symbol::Start, name)
}

/// `e.<name>`
pub fn end_property(name: impl Into<String>) -> Expr {
    property(Symbol::End, name)
}

/// `labels(n)` for nodes, `type(r)` for relationships.
pub fn kinds_of(symbol: Symbol) -> Expr {
    Expr::KindsOf(symbol)
}

/// A literal operand.
pub fn literal(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

// ─── Predicates ───────────────────────────────────────────────────────────────

fn compare(left: Expr, operator: Operator, right: impl Into<Expr>) -> Expr {
    Expr::Comparison {
        left: Box::new(left),
        operator,
        right: Box::new(right.into()),
    }
}

/// `left = right`
pub fn equals(left: Expr, right: impl Into<Expr>) -> Expr {
    compare(left, Operator::Equals, right)
}

/// `left <> right`
pub fn not_equals(left: Expr, right: impl Into<Expr>) -> Expr {
    compare(left, Operator::NotEquals, right)
}

/// `left > right`
pub fn greater_than(left: Expr, right: impl Into<Expr>) -> Expr {
    compare(left, Operator::GreaterThan, right)
}

/// `left >= right`
pub fn greater_than_or_equals(left: Expr, right: impl Into<Expr>) -> Expr {
    compare(left, Operator::GreaterThanOrEquals, right)
}

/// `left < right`
pub fn less_than(left: Expr, right: impl Into<Expr>) -> Expr {
    compare(left, Operator::LessThan, right)
}

/// `left <= right`
pub fn less_than_or_equals(left: Expr, right: impl Into<Expr>) -> Expr {
    compare(left, Operator::LessThanOrEquals, right)
}

/// Temporal `left < instant`.
pub fn before(left: Expr, instant: DateTime<Utc>) -> Expr {
    less_than(left, instant)
}

/// Temporal `left > instant`.
pub fn after(left: Expr, instant: DateTime<Utc>) -> Expr {
    greater_than(left, instant)
}

/// `left in [values]`
pub fn in_values<V: Into<Value>>(left: Expr, values: impl IntoIterator<Item = V>) -> Expr {
    compare(left, Operator::In, Value::List(values.into_iter().map(Into::into).collect()))
}

/// `left in [ids]`
pub fn in_ids(left: Expr, ids: &[ID]) -> Expr {
    in_values(left, ids.iter().copied())
}

/// Substring match.
pub fn string_contains(left: Expr, value: impl Into<String>) -> Expr {
    compare(left, Operator::Contains, value.into())
}

/// Prefix match.
pub fn string_starts_with(left: Expr, value: impl Into<String>) -> Expr {
    compare(left, Operator::StartsWith, value.into())
}

/// Suffix match.
pub fn string_ends_with(left: Expr, value: impl Into<String>) -> Expr {
    compare(left, Operator::EndsWith, value.into())
}

/// Case-insensitive substring match.
pub fn case_insensitive_string_contains(left: Expr, value: impl Into<String>) -> Expr {
    compare(to_lower(left), Operator::Contains, value.into().to_lowercase())
}

/// Case-insensitive prefix match.
pub fn case_insensitive_string_starts_with(left: Expr, value: impl Into<String>) -> Expr {
    compare(to_lower(left), Operator::StartsWith, value.into().to_lowercase())
}

/// Case-insensitive suffix match.
pub fn case_insensitive_string_ends_with(left: Expr, value: impl Into<String>) -> Expr {
    compare(to_lower(left), Operator::EndsWith, value.into().to_lowercase())
}

/// `toLower(expr)`
pub fn to_lower(expr: Expr) -> Expr {
    Expr::ToLower(Box::new(expr))
}

/// The operand is present.
pub fn exists(expr: Expr) -> Expr {
    is_not_null(expr)
}

/// `expr is null`
pub fn is_null(expr: Expr) -> Expr {
    Expr::IsNull(Box::new(expr))
}

/// `expr is not null`
pub fn is_not_null(expr: Expr) -> Expr {
    Expr::IsNotNull(Box::new(expr))
}

/// The node has relationships in either direction.
pub fn has_relationships(symbol: Symbol) -> Expr {
    Expr::HasRelationships(symbol)
}

/// The variable carries `kind`.
pub fn kind(symbol: Symbol, kind: impl Into<Kind>) -> Expr {
    Expr::KindMatch {
        symbol,
        kinds: Kinds::from(kind.into()),
    }
}

/// The variable carries any of `kinds`.
pub fn kind_in(symbol: Symbol, kinds: impl Into<Kinds>) -> Expr {
    Expr::KindMatch {
        symbol,
        kinds: kinds.into(),
    }
}

/// Conjunction. Empty conjunctions are dropped during compilation.
pub fn and(items: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::And(items.into_iter().collect())
}

/// Disjunction. Empty disjunctions are dropped during compilation.
pub fn or(items: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Or(items.into_iter().collect())
}

/// Negation.
pub fn not(expr: Expr) -> Expr {
    Expr::Not(Box::new(expr))
}

// ─── Projection ───────────────────────────────────────────────────────────────

/// `count(expr)`
pub fn count(expr: Expr) -> Expr {
    Expr::Count {
        expr: Box::new(expr),
        distinct: false,
    }
}

/// `count(distinct expr)`
pub fn count_distinct(expr: Expr) -> Expr {
    Expr::Count {
        expr: Box::new(expr),
        distinct: true,
    }
}

/// Ascending sort term.
pub fn asc(expr: Expr) -> SortItem {
    SortItem {
        expr,
        direction: SortDirection::Ascending,
    }
}

/// Descending sort term.
pub fn desc(expr: Expr) -> SortItem {
    SortItem {
        expr,
        direction: SortDirection::Descending,
    }
}

// ─── Mutation ─────────────────────────────────────────────────────────────────

/// Set property values.
pub fn set_properties(symbol: Symbol, properties: BTreeMap<String, Value>) -> Update {
    Update::SetProperties { symbol, properties }
}

/// Remove properties.
pub fn delete_properties(symbol: Symbol, keys: impl IntoIterator<Item = impl Into<String>>) -> Update {
    Update::RemoveProperties {
        symbol,
        keys: keys.into_iter().map(Into::into).collect(),
    }
}

/// Add node kinds.
pub fn add_kinds(symbol: Symbol, kinds: impl Into<Kinds>) -> Update {
    Update::AddKinds {
        symbol,
        kinds: kinds.into(),
    }
}

/// Remove node kinds.
pub fn delete_kinds(symbol: Symbol, kinds: impl Into<Kinds>) -> Update {
    Update::RemoveKinds {
        symbol,
        kinds: kinds.into(),
    }
}

/// Delete the matched entities.
pub fn delete(symbols: impl IntoIterator<Item = Symbol>) -> Update {
    Update::Delete(symbols.into_iter().collect())
}

/// Translate property deltas into mutation clauses.
pub fn property_updates(symbol: Symbol, properties: &Properties) -> Vec<Update> {
    let mut updates = Vec::new();

    let modified = properties.modified();
    if !modified.is_empty() {
        updates.push(set_properties(symbol, modified));
    }

    let deleted = properties.deleted();
    if !deleted.is_empty() {
        updates.push(delete_properties(symbol, deleted));
    }

    updates
}

/// Create a node.
pub fn create_node(kinds: impl Into<Kinds>, properties: &Properties) -> Create {
    Create::Node {
        kinds: kinds.into(),
        properties: properties.map().clone(),
    }
}

/// Create a relationship between the matched start and end nodes.
pub fn create_relationship(kind: impl Into<Kind>, properties: &Properties) -> Create {
    Create::Relationship {
        kind: kind.into(),
        properties: properties.map().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lowercases_operand() {
        let expr = case_insensitive_string_contains(node_property("name"), "ALICE");
        match expr {
            Expr::Comparison { left, right, .. } => {
                assert!(matches!(*left, Expr::ToLower(_)));
                assert_eq!(*right, Expr::Literal(Value::from("alice")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_property_updates_split_deltas() {
        let mut properties = Properties::new();
        properties.set("a", 1i64);
        properties.delete("b");

        let updates = property_updates(Symbol::Node, &properties);
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[1], Update::RemoveProperties { keys, .. } if keys == &vec!["b".to_string()]));
    }
}
