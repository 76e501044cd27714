//! Integration tests for the batch engine.
//!
//! These tests validate buffering and flushing:
//! 1. Flush cadence and completeness per buffer
//! 2. Future resolution in input order
//! 3. Pending relationship endpoints
//! 4. Relationship coalescing
//! 5. Shape grouping on the native driver

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;

use graph_access::drivers::mock::MockCypherClient;
use graph_access::mapper::LabelMapper;
use graph_access::{
    Backend, Batch, Context, Database, DriverConfig, GraphSchema, GraphTransaction, Kind, Neo4jDriver, Node,
    NodeUpdate, Properties, Query, QueryResult, Relationship, RelationshipUpdate, Result, Transaction, Value, ID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Call {
    CreateNodes(usize),
    CreateRelationships(Vec<Relationship>),
    UpdateNodes(usize),
    UpdateRelationships(usize),
    DeleteNodes(Vec<ID>),
    DeleteRelationships(Vec<ID>),
}

/// Records bulk calls and hands out sequential IDs.
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    next_id: Arc<Mutex<u64>>,
}

impl Recorder {
    fn ids(&self, count: usize) -> Vec<ID> {
        let mut next = self.next_id.lock();
        (0..count)
            .map(|_| {
                *next += 1;
                ID::new(*next)
            })
            .collect()
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GraphTransaction for Recorder {
    async fn with_graph(&mut self, _ctx: &Context, _graph: &GraphSchema) -> Result<()> {
        Ok(())
    }

    async fn execute(&mut self, _ctx: &Context, _query: &Query) -> Result<QueryResult> {
        Ok(QueryResult::empty(Arc::new(LabelMapper)))
    }

    async fn query(&mut self, _ctx: &Context, _text: &str, _parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        Ok(QueryResult::empty(Arc::new(LabelMapper)))
    }

    async fn raw(&mut self, _ctx: &Context, _text: &str, _parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        Ok(QueryResult::empty(Arc::new(LabelMapper)))
    }

    async fn create_nodes(&mut self, _ctx: &Context, nodes: &[Node]) -> Result<Vec<ID>> {
        self.calls.lock().push(Call::CreateNodes(nodes.len()));
        Ok(self.ids(nodes.len()))
    }

    async fn create_relationships(&mut self, _ctx: &Context, relationships: &[Relationship]) -> Result<Vec<ID>> {
        self.calls.lock().push(Call::CreateRelationships(relationships.to_vec()));
        Ok(self.ids(relationships.len()))
    }

    async fn update_nodes_by(&mut self, _ctx: &Context, updates: &[NodeUpdate]) -> Result<Vec<ID>> {
        self.calls.lock().push(Call::UpdateNodes(updates.len()));
        Ok(self.ids(updates.len()))
    }

    async fn update_relationships_by(&mut self, _ctx: &Context, updates: &[RelationshipUpdate]) -> Result<Vec<ID>> {
        self.calls.lock().push(Call::UpdateRelationships(updates.len()));
        Ok(self.ids(updates.len()))
    }

    async fn delete_nodes(&mut self, _ctx: &Context, ids: &[ID]) -> Result<()> {
        self.calls.lock().push(Call::DeleteNodes(ids.to_vec()));
        Ok(())
    }

    async fn delete_relationships(&mut self, _ctx: &Context, ids: &[ID]) -> Result<()> {
        self.calls.lock().push(Call::DeleteRelationships(ids.to_vec()));
        Ok(())
    }

    async fn commit(self: Box<Self>, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn batch(recorder: &Recorder, size: usize) -> Batch {
    let tx = Transaction::new(
        Context::background(),
        Backend::Native,
        Arc::new(LabelMapper),
        Box::new(recorder.clone()),
    );
    Batch::new(tx, size)
}

fn user(name: &str) -> Node {
    Node::prepare(Properties::new().with("name", name), [Kind::new("Base"), Kind::new("User")])
}

// ─────────────────────────────────────────────────────────────────────────────
// Flush Cadence
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_node_creates_flush_every_batch_size(count in 0usize..60, size in 1usize..9) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (calls, futures) = runtime.block_on(async {
            let recorder = Recorder::default();
            let batch = batch(&recorder, size);

            let mut futures = Vec::new();
            for index in 0..count {
                futures.push(batch.create_node(user(&format!("u{index}"))).await.unwrap());
            }
            batch.flush().await.unwrap();
            (recorder.calls(), futures)
        });

        let sizes: Vec<usize> = calls
            .iter()
            .map(|call| match call {
                Call::CreateNodes(len) => *len,
                other => panic!("unexpected call {other:?}"),
            })
            .collect();

        prop_assert_eq!(sizes.len(), count.div_ceil(size));
        prop_assert_eq!(sizes.iter().sum::<usize>(), count);
        prop_assert!(sizes.iter().all(|len| *len <= size));

        let ids: Vec<u64> = futures.iter().map(|future| future.get().unwrap().get()).collect();
        prop_assert_eq!(ids, (1..=count as u64).collect::<Vec<_>>());
    }

    #[test]
    fn prop_deletes_flush_every_batch_size(count in 0usize..40, size in 1usize..6) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let calls = runtime.block_on(async {
            let recorder = Recorder::default();
            let batch = batch(&recorder, size);
            for id in 0..count {
                batch.delete_node(ID::new(id as u64)).await.unwrap();
            }
            batch.flush().await.unwrap();
            recorder.calls()
        });

        let deleted: Vec<ID> = calls
            .into_iter()
            .flat_map(|call| match call {
                Call::DeleteNodes(ids) => ids,
                other => panic!("unexpected call {other:?}"),
            })
            .collect();
        prop_assert_eq!(deleted, (0..count as u64).map(ID::new).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_buffer_reaching_size_flushes_immediately() {
    let recorder = Recorder::default();
    let batch = batch(&recorder, 2);

    let first = batch.create_node(user("a")).await.unwrap();
    assert!(!first.is_resolved());
    assert!(recorder.calls().is_empty());

    batch.create_node(user("b")).await.unwrap();
    assert!(first.is_resolved());
    assert_eq!(recorder.calls(), vec![Call::CreateNodes(2)]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Relationships
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_relationship_endpoints_resolve_from_pending_nodes() {
    let recorder = Recorder::default();
    let batch = batch(&recorder, 100);

    let alice = batch.create_node(user("alice")).await.unwrap();
    let admins = batch.create_node(user("admins")).await.unwrap();
    batch
        .create_relationship(&alice, &admins, "MemberOf", Properties::new())
        .await
        .unwrap();
    batch.flush().await.unwrap();

    let calls = recorder.calls();
    assert_eq!(calls[0], Call::CreateNodes(2));
    match &calls[1] {
        Call::CreateRelationships(relationships) => {
            assert_eq!(relationships.len(), 1);
            assert_eq!(relationships[0].start_id, alice.get().unwrap());
            assert_eq!(relationships[0].end_id, admins.get().unwrap());
        }
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_relationships_coalesce_with_later_values() {
    let recorder = Recorder::default();
    let batch = batch(&recorder, 100);

    batch
        .create_relationship(ID::new(1), ID::new(2), "AdminTo", Properties::new().with("weight", 1i64).with("source", "ldap"))
        .await
        .unwrap();
    batch
        .create_relationship(ID::new(1), ID::new(2), "AdminTo", Properties::new().with("weight", 5i64))
        .await
        .unwrap();
    batch.flush().await.unwrap();

    match &recorder.calls()[0] {
        Call::CreateRelationships(relationships) => {
            assert_eq!(relationships.len(), 1);
            assert_eq!(relationships[0].properties.get("weight").as_int().unwrap(), 5);
            assert_eq!(relationships[0].properties.get("source").as_string().unwrap(), "ldap");
        }
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test]
async fn test_update_by_requires_identity() {
    let recorder = Recorder::default();
    let batch = batch(&recorder, 10);

    let update = NodeUpdate::new(user("x"), Some(Kind::new("Base")), ["objectid"]);
    assert!(batch.update_node_by(update).await.is_err());
    assert!(recorder.calls().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Native Driver Grouping
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_same_shape_updates_share_one_statement() {
    let client = MockCypherClient::new();
    let config = DriverConfig::native().with_batch_write_size(10);
    let db = Database::new(Arc::new(Neo4jDriver::new(Arc::new(client.clone()), &config)), config);

    db.batch_operation(&Context::background(), |batch| async move {
            for objectid in ["S-1", "S-2"] {
                let node = Node::prepare(
                    Properties::new().with("objectid", objectid),
                    [Kind::new("Base"), Kind::new("User")],
                );
                batch.update_node_by(NodeUpdate::new(node, Some(Kind::new("Base")), ["objectid"])).await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let statements = client.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].text.starts_with("unwind $p as p merge (n:Base {objectid: p.objectid})"));
    assert!(matches!(&statements[0].parameters["p"], Value::List(rows) if rows.len() == 2));
}
