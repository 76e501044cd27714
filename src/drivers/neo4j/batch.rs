//! Bulk `unwind` statements.
//!
//! Every statement takes a single list parameter `$p` with one entry per
//! record and, where IDs come back, returns them in payload order.

use std::collections::BTreeMap;

use crate::query::cypher::{label_suffix, quote_identifier, Statement};
use crate::types::{Kind, Kinds, Node, NodeShape, NodeUpdate, Relationship, RelationshipShape, RelationshipUpdate, Value, ID};

fn payload(rows: Vec<Value>) -> BTreeMap<String, Value> {
    BTreeMap::from([("p".to_string(), Value::List(rows))])
}

fn properties_value(properties: &crate::types::Properties) -> Value {
    Value::Map(properties.map().clone())
}

/// Create nodes that share one label set.
pub fn create_nodes(kinds: &Kinds, nodes: &[&Node]) -> Statement {
    let text = format!(
        "unwind $p as p create (n{}) set n = p return id(n)",
        label_suffix(kinds)
    );
    let rows = nodes.iter().map(|node| properties_value(&node.properties)).collect();
    Statement::new(text, payload(rows))
}

/// Create relationships of one kind between existing nodes.
pub fn create_relationships(kind: &Kind, relationships: &[&Relationship]) -> Statement {
    let text = format!(
        "unwind $p as p match (s) where id(s) = p.s match (e) where id(e) = p.e create (s)-[r:{}]->(e) set r = p.r return id(r)",
        quote_identifier(kind.as_str())
    );
    let rows = relationships
        .iter()
        .map(|relationship| {
            Value::Map(BTreeMap::from([
                ("s".to_string(), Value::from(relationship.start_id)),
                ("e".to_string(), Value::from(relationship.end_id)),
                ("r".to_string(), properties_value(&relationship.properties)),
            ]))
        })
        .collect();
    Statement::new(text, payload(rows))
}

fn merge_map(source: &str, identity: &[String]) -> String {
    if identity.is_empty() {
        return String::new();
    }

    let fields: Vec<String> = identity
        .iter()
        .map(|name| {
            let name = quote_identifier(name);
            format!("{name}: {source}.{name}")
        })
        .collect();
    format!(" {{{}}}", fields.join(", "))
}

fn merge_node(variable: &str, source: &str, shape: &NodeShape) -> String {
    let identity_label = shape
        .identity_kind
        .as_ref()
        .map(|kind| format!(":{}", quote_identifier(kind.as_str())))
        .unwrap_or_default();

    let extra: Kinds = shape
        .kinds
        .iter()
        .filter(|kind| Some(*kind) != shape.identity_kind.as_ref())
        .cloned()
        .collect();

    let mut clause = format!(
        "merge ({variable}{identity_label}{}) set {variable} += {source}",
        merge_map(source, &shape.identity_properties)
    );
    if !extra.is_empty() {
        clause.push_str(&format!(", {variable}{}", label_suffix(&extra)));
    }
    clause
}

/// Merge nodes that share one shape.
pub fn update_nodes(shape: &NodeShape, updates: &[&NodeUpdate]) -> Statement {
    let text = format!("unwind $p as p {} return id(n)", merge_node("n", "p", shape));
    let rows = updates.iter().map(|update| properties_value(&update.node.properties)).collect();
    Statement::new(text, payload(rows))
}

/// Merge relationships, and both endpoints, that share one shape.
pub fn update_relationships(shape: &RelationshipShape, updates: &[&RelationshipUpdate]) -> Statement {
    let text = format!(
        "unwind $p as p {} {} merge (s)-[r:{}{}]->(e) set r += p.r return id(r)",
        merge_node("s", "p.s", &shape.start),
        merge_node("e", "p.e", &shape.end),
        quote_identifier(shape.kind.as_str()),
        merge_map("p.r", &shape.identity_properties),
    );
    let rows = updates
        .iter()
        .map(|update| {
            Value::Map(BTreeMap::from([
                ("s".to_string(), properties_value(&update.start.properties)),
                ("e".to_string(), properties_value(&update.end.properties)),
                ("r".to_string(), properties_value(&update.relationship.properties)),
            ]))
        })
        .collect();
    Statement::new(text, payload(rows))
}

/// Delete nodes with their relationships.
pub fn delete_nodes(ids: &[ID]) -> Statement {
    let rows = ids.iter().map(|id| Value::from(*id)).collect();
    Statement::new("match (n) where id(n) in $p detach delete n", payload(rows))
}

/// Delete relationships.
pub fn delete_relationships(ids: &[ID]) -> Statement {
    let rows = ids.iter().map(|id| Value::from(*id)).collect();
    Statement::new("match ()-[r]->() where id(r) in $p delete r", payload(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Properties;

    fn user(name: &str) -> NodeUpdate {
        NodeUpdate::new(
            Node::prepare(Properties::new().with("objectid", name).with("name", name), Kinds::from(Kind::new("User"))),
            Some(Kind::new("Base")),
            ["objectid"],
        )
    }

    #[test]
    fn test_create_nodes_sets_labels() {
        let node = Node::prepare(Properties::new().with("name", "alice"), Kinds::from(&["Base", "User"][..]));
        let statement = create_nodes(&node.kinds, &[&node]);

        assert_eq!(statement.text, "unwind $p as p create (n:Base:User) set n = p return id(n)");
        assert!(matches!(&statement.parameters["p"], Value::List(rows) if rows.len() == 1));
    }

    #[test]
    fn test_update_nodes_merges_on_identity() {
        let alice = user("alice");
        let bob = user("bob");
        let statement = update_nodes(&alice.shape(), &[&alice, &bob]);

        assert_eq!(
            statement.text,
            "unwind $p as p merge (n:Base {objectid: p.objectid}) set n += p, n:User return id(n)"
        );
        assert!(matches!(&statement.parameters["p"], Value::List(rows) if rows.len() == 2));
    }

    #[test]
    fn test_update_relationships_merges_endpoints_first() {
        let update = RelationshipUpdate {
            relationship: Relationship::between(ID::UNREGISTERED, ID::UNREGISTERED, Kind::new("MemberOf"), Properties::new()),
            identity_properties: Vec::new(),
            start: Node::prepare(Properties::new().with("objectid", "u1"), Kinds::new()),
            start_identity_kind: Some(Kind::new("User")),
            start_identity_properties: vec!["objectid".to_string()],
            end: Node::prepare(Properties::new().with("objectid", "g1"), Kinds::new()),
            end_identity_kind: Some(Kind::new("Group")),
            end_identity_properties: vec!["objectid".to_string()],
        };

        let statement = update_relationships(&update.shape(), &[&update]);
        assert_eq!(
            statement.text,
            "unwind $p as p merge (s:User {objectid: p.s.objectid}) set s += p.s \
             merge (e:Group {objectid: p.e.objectid}) set e += p.e \
             merge (s)-[r:MemberOf]->(e) set r += p.r return id(r)"
        );
    }

    #[test]
    fn test_delete_nodes_detaches() {
        let statement = delete_nodes(&[ID::new(1), ID::new(2)]);
        assert_eq!(statement.text, "match (n) where id(n) in $p detach delete n");
        assert_eq!(
            statement.parameters["p"],
            Value::List(vec![Value::from(ID::new(1)), Value::from(ID::new(2))])
        );
    }
}
