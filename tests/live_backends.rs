//! Round trips against running backends.
//!
//! Ignored by default. Run with:
//!
//! ```bash
//! PG_CONNECTION_STRING=postgresql://localhost/graph_test \
//! NEO4J_URL=http://localhost:7474 NEO4J_USER=neo4j NEO4J_PASSWORD=secret \
//! cargo test --features postgres,neo4j --test live_backends -- --ignored
//! ```

#![cfg(any(feature = "postgres", feature = "neo4j"))]

use std::sync::Arc;

use graph_access::query::{self, Symbol};
use graph_access::{
    Context, Database, DriverConfig, GraphSchema, Kind, Kinds, Node, NodeUpdate, Properties, Schema, ID,
};

fn live_graph() -> GraphSchema {
    GraphSchema {
        nodes: Kinds::from([Kind::new("LiveBase"), Kind::new("LiveUser"), Kind::new("LiveGroup")]),
        edges: Kinds::from([Kind::new("LiveMemberOf")]),
        ..GraphSchema::named("graph_access_live")
    }
}

fn member(objectid: &str) -> NodeUpdate {
    let node = Node::prepare(
        Properties::new().with("objectid", objectid).with("name", objectid.to_lowercase()),
        [Kind::new("LiveUser")],
    );
    NodeUpdate::new(node, Some(Kind::new("LiveBase")), ["objectid"])
}

/// Upsert a small membership graph twice and check nothing was duplicated.
async fn exercise(db: &Database) {
    let ctx = Context::background();
    db.assert_schema(&ctx, &Schema::single(live_graph())).await.unwrap();

    for _ in 0..2 {
        db.batch_operation(&ctx, |batch| async move {
            let group = batch
                .update_node_by(NodeUpdate::new(
                    Node::prepare(Properties::new().with("objectid", "LIVE-G"), [Kind::new("LiveGroup")]),
                    Some(Kind::new("LiveBase")),
                    ["objectid"],
                ))
                .await?;
            for objectid in ["LIVE-1", "LIVE-2", "LIVE-3"] {
                let user = batch.update_node_by(member(objectid)).await?;
                batch
                    .create_relationship(&user, &group, "LiveMemberOf", Properties::new())
                    .await?;
            }
            Ok(())
        })
        .await
        .unwrap();
    }

    let (users, memberships) = db
        .read_transaction(
            &ctx,
            |tx| async move {
                let users = tx.nodes().filter(query::kind(Symbol::Node, "LiveUser")).count().await?;
                let memberships = tx
                    .relationships()
                    .filter(query::kind(Symbol::Relationship, "LiveMemberOf"))
                    .fetch_ids()
                    .await?;
                Ok((users, memberships))
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(users, 3);
    assert!(memberships.len() >= 3);

    db.write_transaction(
        &ctx,
        |tx| async move {
            let ids: Vec<ID> = tx
                .nodes()
                .filter(query::kind(Symbol::Node, "LiveBase"))
                .fetch_ids()
                .await?;
            tx.delete_nodes(&ids).await
        },
        None,
    )
    .await
    .unwrap();
}

#[cfg(feature = "postgres")]
#[tokio::test]
#[ignore = "requires PG_CONNECTION_STRING"]
async fn test_postgres_round_trip() {
    use graph_access::{Driver, PgDriver, PostgresConfig, SqlxClient};

    let config = DriverConfig::relational();
    let client = SqlxClient::connect(&PostgresConfig::from_env(), config.query_exec_mode)
        .await
        .unwrap();
    let driver = Arc::new(PgDriver::new(Arc::new(client), &config));
    driver
        .set_default_graph(&Context::background(), &live_graph())
        .await
        .unwrap();

    let db = Database::new(driver, config);
    exercise(&db).await;
    db.close().await.unwrap();
}

#[cfg(feature = "neo4j")]
#[tokio::test]
#[ignore = "requires NEO4J_URL"]
async fn test_neo4j_round_trip() {
    use graph_access::{Neo4jConfig, Neo4jDriver, Neo4jHttpClient};

    let config = DriverConfig::native();
    let client = Neo4jHttpClient::new(&Neo4jConfig::from_env()).unwrap();
    let db = Database::new(Arc::new(Neo4jDriver::new(Arc::new(client), &config)), config);
    exercise(&db).await;
    db.close().await.unwrap();
}
