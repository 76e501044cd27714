//! Integration tests for query lowering.
//!
//! The same criteria must lower to both dialects with values bound as
//! parameters, never spliced into statement text.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use graph_access::drivers::mock::MockSqlClient;
use graph_access::mapper::StaticKindMapper;
use graph_access::query::pgsql::{self, SqlArg};
use graph_access::query::{self, cypher, parser, Pattern, Query, Symbol};
use graph_access::{Context, Database, DriverConfig, GraphError, GraphSchema, PgDriver, Value};

fn kinds() -> StaticKindMapper {
    StaticKindMapper::new([(1, "Base"), (2, "User"), (3, "MemberOf"), (4, "Group")])
}

fn params(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Text to Both Dialects
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_parsed_text_lowers_to_both_dialects() {
    let parsed = parser::parse(
        "match (n:User) where n.name = $name return n",
        &params(&[("name", Value::from("alice"))]),
    )
    .unwrap();

    let native = cypher::render(&parsed).unwrap();
    assert_eq!(native.text, "match (n) where n:User and n.name = $p0 return n");
    assert_eq!(native.parameters["p0"], Value::from("alice"));

    let relational = pgsql::compile(&parsed, &kinds(), 3).unwrap();
    assert_eq!(
        relational.sql,
        "select jsonb_build_object('id', n.id, 'kind_ids', n.kind_ids, 'properties', n.properties) from node n where n.graph_id = $1 and (n.kind_ids operator (pg_catalog.@>) $2::int2[] and (n.properties -> 'name') = $3::jsonb)"
    );
    assert_eq!(
        relational.args,
        vec![SqlArg::Int4(3), SqlArg::Int2Array(vec![2]), SqlArg::Jsonb(json!("alice"))]
    );
}

#[test]
fn test_parsed_and_built_queries_agree() {
    let parsed = parser::parse("match (n:User) return n", &BTreeMap::new()).unwrap();
    let built = Query::matching(query::kind(Symbol::Node, "User"))
        .pattern(Pattern::Node)
        .returning([query::node()]);

    assert_eq!(cypher::render(&parsed).unwrap(), cypher::render(&built).unwrap());
    assert_eq!(
        pgsql::compile(&parsed, &kinds(), 1).unwrap(),
        pgsql::compile(&built, &kinds(), 1).unwrap()
    );
}

#[test]
fn test_awkward_property_names_are_quoted() {
    let query = Query::matching(query::equals(query::node_property("o'brien"), 1i64)).returning([query::node_id()]);

    assert!(cypher::render(&query).unwrap().text.contains("n.`o'brien`"));
    assert!(pgsql::compile(&query, &kinds(), 1).unwrap().sql.contains("'o''brien'"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Binding
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_values_are_bound_not_spliced(value in "[a-zA-Z0-9 '%_;-]{1,24}") {
        let query = Query::matching(query::equals(query::node_property("name"), value.as_str()))
            .returning([query::node()]);

        let native = cypher::render(&query).unwrap();
        prop_assert_eq!(native.text.as_str(), "match (n) where n.name = $p0 return n");
        prop_assert_eq!(&native.parameters["p0"], &Value::from(value.as_str()));

        let relational = pgsql::compile(&query, &kinds(), 1).unwrap();
        prop_assert!(relational.sql.ends_with("(n.properties -> 'name') = $2::jsonb)"));
        prop_assert_eq!(&relational.args[1], &SqlArg::Jsonb(json!(value)));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Predicate Semantics Across Dialects
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_null_equality_matches_nothing_on_both_backends() {
    let query = Query::matching(query::equals(query::node_property("x"), Value::Null)).returning([query::node()]);

    let native = cypher::render(&query).unwrap();
    assert_eq!(native.text, "match (n) where n.x = $p0 return n");
    assert_eq!(native.parameters["p0"], Value::Null);

    // `x = null` is unknown in both engines, so absent properties must not match.
    let relational = pgsql::compile(&query, &kinds(), 1).unwrap();
    assert!(relational.sql.ends_with("where n.graph_id = $1 and (null)"));
    assert!(!relational.sql.contains("is null"));

    let negated = Query::matching(query::not_equals(query::node_property("x"), Value::Null)).returning([query::node()]);
    assert!(pgsql::compile(&negated, &kinds(), 1).unwrap().sql.ends_with("and (null)"));
}

#[test]
fn test_absence_is_tested_with_is_null_on_both_backends() {
    let query = Query::matching(query::is_null(query::node_property("x"))).returning([query::node()]);

    assert_eq!(cypher::render(&query).unwrap().text, "match (n) where n.x is null return n");
    assert!(pgsql::compile(&query, &kinds(), 1)
        .unwrap()
        .sql
        .ends_with("and ((n.properties ->> 'x') is null)"));
}

#[test]
fn test_ordering_ignores_properties_of_another_type() {
    let query = Query::matching(query::greater_than(query::node_property("x"), 10i64)).returning([query::node()]);

    assert_eq!(cypher::render(&query).unwrap().text, "match (n) where n.x > $p0 return n");

    // A stored "n/a" yields null for the row instead of a cast error.
    let relational = pgsql::compile(&query, &kinds(), 1).unwrap();
    assert!(relational
        .sql
        .contains("case when jsonb_typeof(n.properties -> 'x') = 'number' then (n.properties ->> 'x')::numeric end"));
    assert!(!relational.sql.contains("float8"));
}

#[test]
fn test_membership_does_not_match_array_subsets() {
    let query = Query::matching(query::in_values(query::node_property("x"), [1i64, 2, 3])).returning([query::node()]);

    let native = cypher::render(&query).unwrap();
    assert_eq!(native.text, "match (n) where n.x in $p0 return n");

    // A stored [1, 2] is contained in [1, 2, 3] but is not one of its elements.
    let relational = pgsql::compile(&query, &kinds(), 1).unwrap();
    assert!(relational
        .sql
        .contains("(n.properties -> 'x') = any(array(select jsonb_array_elements($2::jsonb)))"));
    assert!(!relational.sql.contains("@>"));
    assert_eq!(relational.args[1], SqlArg::Jsonb(json!([1, 2, 3])));
}

proptest! {
    #[test]
    fn prop_integer_bounds_bind_exactly(bound in any::<i64>()) {
        let query = Query::matching(query::greater_than(query::node_property("x"), bound)).returning([query::node_id()]);

        let native = cypher::render(&query).unwrap();
        prop_assert_eq!(&native.parameters["p0"], &Value::Int(bound));

        let relational = pgsql::compile(&query, &kinds(), 1).unwrap();
        prop_assert!(relational.sql.ends_with("> $2::int8)"));
        prop_assert_eq!(&relational.args[1], &SqlArg::Int8(bound));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors Through a Transaction
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_parse_errors_surface_from_transactions() {
    let client = MockSqlClient::new();
    let config = DriverConfig::relational();
    let db = Database::new(Arc::new(PgDriver::new(Arc::new(client.clone()), &config)), config);
    let ctx = Context::background();
    db.set_default_graph(&ctx, &GraphSchema::named("default")).await.unwrap();
    client.clear_statements();

    let result = db
        .read_transaction(&ctx, |tx| async move { tx.query("match (n) return m", &BTreeMap::new()).await }, None)
        .await;

    match result {
        Err(GraphError::Parse(err)) => assert_eq!(err.offset, 17),
        other => panic!("expected a parse error, got {other:?}"),
    }
    assert!(client.statements().is_empty());
}
