//! Integration tests for transaction lifecycle across both drivers.
//!
//! These tests validate:
//! 1. Commit on success, rollback on delegate error
//! 2. The session limiter and transaction timeouts
//! 3. Native write-volume rotation in batches only
//! 4. Relational kind and graph definitions
//! 5. Idempotent schema assertion

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

use graph_access::drivers::mock::{MockCypherClient, MockSqlClient};
use graph_access::drivers::pg::SqlRows;
use graph_access::query::{self, Symbol};
use graph_access::{
    Cell, Constraint, Context, Database, DriverConfig, GraphError, GraphSchema, Index, IndexType, Kind, Kinds,
    MappingError, Neo4jDriver, Node, PgDriver, Properties, Schema, TransactionConfig, ID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn native(client: &MockCypherClient, config: DriverConfig) -> Database {
    let driver = Neo4jDriver::new(Arc::new(client.clone()), &config);
    Database::new(Arc::new(driver), config)
}

fn relational(client: &MockSqlClient, config: DriverConfig) -> Database {
    let driver = PgDriver::new(Arc::new(client.clone()), &config);
    Database::new(Arc::new(driver), config)
}

fn user(name: &str) -> Node {
    Node::prepare(Properties::new().with("name", name), [Kind::new("Base"), Kind::new("User")])
}

fn default_graph() -> GraphSchema {
    GraphSchema {
        nodes: Kinds::from([Kind::new("Base"), Kind::new("User")]),
        ..GraphSchema::named("default")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commit / Rollback
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_successful_delegate_commits() {
    let client = MockCypherClient::new();
    let db = native(&client, DriverConfig::native());

    let node = db
        .write_transaction(
            &Context::background(),
            |tx| async move { tx.create_node(Properties::new().with("name", "alice"), Kind::new("User")).await },
            None,
        )
        .await
        .unwrap();

    assert!(node.id.is_registered());
    let counts = client.counts();
    assert_eq!((counts.begins, counts.commits, counts.rollbacks), (1, 1, 0));
}

#[tokio::test]
async fn test_delegate_error_rolls_back() {
    let client = MockCypherClient::new();
    let db = native(&client, DriverConfig::native());

    let result: Result<(), GraphError> = db
        .write_transaction(
            &Context::background(),
            |tx| async move {
                tx.create_node(Properties::new(), Kind::new("User")).await?;
                Err(GraphError::NoResults)
            },
            None,
        )
        .await;

    assert!(matches!(result, Err(GraphError::NoResults)));
    let counts = client.counts();
    assert_eq!((counts.begins, counts.commits, counts.rollbacks), (1, 0, 1));
}

#[tokio::test]
async fn test_transaction_handle_is_closed_after_delegate() {
    let client = MockCypherClient::new();
    let db = native(&client, DriverConfig::native());

    let leaked = db
        .read_transaction(&Context::background(), |tx| async move { Ok(tx) }, None)
        .await
        .unwrap();

    let result = leaked.create_node(Properties::new(), Kind::new("User")).await;
    assert!(matches!(result, Err(GraphError::TransactionClosed)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Limiter
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_limit_blocks_until_timeout() {
    let client = MockCypherClient::new();
    let db = Arc::new(native(&client, DriverConfig::native().with_max_concurrent_sessions(2)));
    let release = Arc::new(Semaphore::new(0));
    let (opened_tx, mut opened_rx) = mpsc::channel(2);

    let mut holders = Vec::new();
    for _ in 0..2 {
        let db = db.clone();
        let release = release.clone();
        let opened = opened_tx.clone();
        holders.push(tokio::spawn(async move {
            db.read_transaction(
                &Context::background(),
                |_tx| async move {
                    let _ = opened.send(()).await;
                    let _permit = release.acquire().await;
                    Ok(())
                },
                None,
            )
            .await
        }));
    }
    opened_rx.recv().await.unwrap();
    opened_rx.recv().await.unwrap();

    let blocked = db
        .read_transaction(
            &Context::background(),
            |_tx| async move { Ok(()) },
            Some(TransactionConfig::with_timeout(Duration::from_millis(50))),
        )
        .await;
    assert!(matches!(blocked, Err(GraphError::Timeout)));
    assert_eq!(client.counts().begins, 2);

    release.add_permits(2);
    for holder in holders {
        holder.await.unwrap().unwrap();
    }

    db.read_transaction(&Context::background(), |_tx| async move { Ok(()) }, None)
        .await
        .unwrap();
    assert_eq!(client.counts().begins, 3);
}

#[tokio::test]
async fn test_cancelled_context_fails_fast() {
    let client = MockCypherClient::new();
    let db = native(&client, DriverConfig::native());
    let (ctx, handle) = Context::background().with_cancel();
    handle.cancel();

    let result = db.read_transaction(&ctx, |_tx| async move { Ok(()) }, None).await;
    assert!(matches!(result, Err(GraphError::Cancelled)));
    assert_eq!(client.counts().begins, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Native Rotation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_rotates_native_transaction_on_write_volume() {
    let client = MockCypherClient::new();
    let config = DriverConfig::native().with_batch_write_size(2).with_write_flush_size(3);
    let db = native(&client, config);

    db.batch_operation(&Context::background(), |batch| async move {
        for index in 0..7 {
            batch.create_node(user(&format!("u{index}"))).await?;
        }
        Ok(())
    })
    .await
    .unwrap();

    // Flushes of 2, 2, 2, 1 records rotate after the second and the fourth.
    let counts = client.counts();
    assert_eq!((counts.begins, counts.commits, counts.rollbacks), (3, 3, 0));
}

#[tokio::test]
async fn test_write_transaction_never_rotates() {
    let client = MockCypherClient::new();
    let config = DriverConfig::native().with_batch_write_size(2).with_write_flush_size(3);
    let db = native(&client, config);

    let nodes: Vec<Node> = (0..7).map(|index| user(&format!("u{index}"))).collect();
    let ids = db
        .write_transaction(&Context::background(), |tx| async move { tx.create_nodes(&nodes).await }, None)
        .await
        .unwrap();

    assert_eq!(ids.len(), 7);
    let counts = client.counts();
    assert_eq!((counts.begins, counts.commits), (1, 1));
}

// ─────────────────────────────────────────────────────────────────────────────
// Relational Kinds and Graphs
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_relational_write_without_graph_target_fails() {
    let client = MockSqlClient::new();
    let db = relational(&client, DriverConfig::relational());

    let result = db
        .write_transaction(&Context::background(), |tx| async move { tx.create_nodes(&[user("a")]).await }, None)
        .await;
    assert!(matches!(result, Err(GraphError::MissingGraphTarget)));
}

#[tokio::test]
async fn test_kinds_are_defined_once_across_batches() {
    let client = MockSqlClient::new();
    let db = relational(&client, DriverConfig::relational());
    let ctx = Context::background();
    db.set_default_graph(&ctx, &GraphSchema::named("default")).await.unwrap();

    for round in 0..2 {
        db.batch_operation(&ctx, |batch| async move {
            batch.create_node(user(&format!("r{round}"))).await?;
            Ok(())
        })
        .await
        .unwrap();
    }

    let definitions = client.statements_starting_with("insert into kind");
    assert_eq!(definitions.len(), 1);
    assert_eq!(client.statements_starting_with("insert into node").len(), 2);
}

#[tokio::test]
async fn test_concurrent_kind_assertions_issue_one_definition() {
    let client = MockSqlClient::new();
    let driver = Arc::new(PgDriver::new(Arc::new(client.clone()), &DriverConfig::relational()));
    let schema = driver.schema_manager().clone();
    schema.init(&Context::background()).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let schema = schema.clone();
        tasks.push(tokio::spawn(async move {
            let kinds = Kinds::from([Kind::new("Computer"), Kind::new("Domain")]);
            schema.assert_kinds(&Context::background(), &kinds).await
        }));
    }

    let mut codes = Vec::new();
    for task in tasks {
        codes.push(task.await.unwrap().unwrap());
    }

    assert!(codes.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(client.statements_starting_with("insert into kind").len(), 1);
}

#[tokio::test]
async fn test_mixed_preset_ids_are_rejected() {
    let client = MockSqlClient::new();
    let db = relational(&client, DriverConfig::relational());
    let ctx = Context::background();
    db.set_default_graph(&ctx, &default_graph()).await.unwrap();

    let preset = Node::new(ID::new(500), Properties::new(), [Kind::new("User")]);
    let result = db
        .write_transaction(
            &ctx,
            |tx| async move { tx.create_nodes(&[preset, user("fresh")]).await },
            None,
        )
        .await;

    assert!(matches!(result, Err(GraphError::Batch(message)) if message.contains("preset node IDs")));
    assert!(client.statements_starting_with("insert into node").is_empty());
}

#[tokio::test]
async fn test_unknown_kind_in_read_is_mapping_error() {
    let client = MockSqlClient::new();
    let db = relational(&client, DriverConfig::relational());
    let ctx = Context::background();
    db.set_default_graph(&ctx, &default_graph()).await.unwrap();

    let result = db
        .read_transaction(
            &ctx,
            |tx| async move {
                tx.nodes()
                    .filter(query::kind(Symbol::Node, "Computer"))
                    .fetch()
                    .await
            },
            None,
        )
        .await;

    assert!(matches!(result, Err(GraphError::Mapping(MappingError::UnknownKind(_)))));
}

#[tokio::test]
async fn test_relational_composite_decodes_to_node() {
    let client = MockSqlClient::with_responder(|statement| {
        statement
            .sql
            .starts_with("select jsonb_build_object('id', n.id")
            .then(|| {
                Ok(SqlRows {
                    columns: vec!["n".to_string()],
                    rows: vec![vec![Cell::from_json(json!({
                        "id": 10,
                        "kind_ids": [1, 2],
                        "properties": {"name": "alice"}
                    }))]],
                })
            })
    });
    let db = relational(&client, DriverConfig::relational());
    let ctx = Context::background();
    db.set_default_graph(&ctx, &default_graph()).await.unwrap();

    let nodes = db
        .read_transaction(
            &ctx,
            |tx| async move {
                tx.nodes()
                    .filter(query::equals(query::node_property("name"), "alice"))
                    .fetch()
                    .await
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, ID::new(10));
    assert_eq!(nodes[0].kinds, Kinds::from([Kind::new("Base"), Kind::new("User")]));
    assert_eq!(nodes[0].properties.get("name").as_string().unwrap(), "alice");
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema Assertion
// ─────────────────────────────────────────────────────────────────────────────

fn indexed_schema() -> Schema {
    Schema::single(GraphSchema {
        node_indexes: vec![Index::new("name", IndexType::TextSearch)],
        node_constraints: vec![Constraint::new("objectid", IndexType::BTree)],
        ..default_graph()
    })
}

#[tokio::test]
async fn test_relational_schema_assertion_is_idempotent() {
    let client = MockSqlClient::new();
    let db = relational(&client, DriverConfig::relational());
    let ctx = Context::background();

    db.assert_schema(&ctx, &indexed_schema()).await.unwrap();
    assert_eq!(client.statements_starting_with("create unique index").len(), 1);

    client.clear_statements();
    db.assert_schema(&ctx, &indexed_schema()).await.unwrap();

    let changed: Vec<_> = client
        .statements()
        .into_iter()
        .filter(|statement| {
            ["create", "drop", "insert"]
                .iter()
                .any(|prefix| statement.sql.starts_with(prefix))
        })
        .collect();
    assert!(changed.is_empty(), "unexpected DDL: {changed:?}");
}

#[tokio::test]
async fn test_native_schema_assertion_is_idempotent() {
    let client = MockCypherClient::new();
    let db = native(&client, DriverConfig::native());
    let ctx = Context::background();

    db.assert_schema(&ctx, &indexed_schema()).await.unwrap();
    assert!(client
        .statements()
        .iter()
        .any(|statement| statement.text.starts_with("create text index user_name_index")));

    client.clear_statements();
    db.assert_schema(&ctx, &indexed_schema()).await.unwrap();

    let statements = client.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].text.starts_with("show indexes"));
}
