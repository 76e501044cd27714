//! Native engine transaction with write-volume rotation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{batch, CypherClient, CypherTx};
use crate::batch::group_by_shape;
use crate::context::Context;
use crate::drivers::log_statement;
use crate::engine::{AccessMode, GraphTransaction};
use crate::error::{GraphError, Result};
use crate::mapper::{LabelMapper, QueryResult};
use crate::query::cypher::{self, Statement};
use crate::query::Query;
use crate::types::{GraphSchema, Node, NodeUpdate, Relationship, RelationshipUpdate, Value, ID};

/// Native engine [`GraphTransaction`].
///
/// Transactions opened in [`AccessMode::Batch`] count written records and,
/// once the count reaches `write_flush_size`, commit the underlying engine
/// transaction and open a fresh one. Work committed by a rotation stays
/// committed even if the batch later fails. Read and write transactions
/// never rotate.
pub struct Neo4jTransaction {
    client: Arc<dyn CypherClient>,
    inner: Option<Box<dyn CypherTx>>,
    mode: AccessMode,
    batch_write_size: usize,
    write_flush_size: usize,
    writes: usize,
    rotations: usize,
}

impl Neo4jTransaction {
    pub(crate) fn new(
        client: Arc<dyn CypherClient>,
        inner: Box<dyn CypherTx>,
        mode: AccessMode,
        batch_write_size: usize,
        write_flush_size: usize,
    ) -> Self {
        Self {
            client,
            inner: Some(inner),
            mode,
            batch_write_size: batch_write_size.max(1),
            write_flush_size: write_flush_size.max(1),
            writes: 0,
            rotations: 0,
        }
    }

    /// Underlying commits performed by rotation so far.
    pub fn rotations(&self) -> usize {
        self.rotations
    }

    async fn run(&mut self, statement: &Statement) -> Result<QueryResult> {
        log_statement("neo4j", &statement.text, statement.parameters.keys().map(String::as_str));

        let inner = self.inner.as_mut().ok_or(GraphError::TransactionClosed)?;
        let rows = inner.run(statement).await?;
        Ok(QueryResult::new(rows.columns, rows.rows, Arc::new(LabelMapper)))
    }

    async fn run_for_ids(&mut self, statement: &Statement, expected: usize) -> Result<Vec<ID>> {
        let ids: Vec<ID> = self.run(statement).await?.column()?;
        if ids.len() != expected {
            return Err(GraphError::Batch(format!(
                "statement returned {} ids for {expected} records",
                ids.len()
            )));
        }
        Ok(ids)
    }

    async fn wrote(&mut self, records: usize) -> Result<()> {
        self.writes += records;
        if self.mode != AccessMode::Batch || self.writes < self.write_flush_size {
            return Ok(());
        }

        tracing::warn!(
            writes = self.writes,
            write_flush_size = self.write_flush_size,
            "Write flush threshold reached, committing and reopening native transaction"
        );

        let previous = self.inner.take().ok_or(GraphError::TransactionClosed)?;
        previous.commit().await?;
        self.inner = Some(self.client.begin(self.mode).await?);
        self.writes = 0;
        self.rotations += 1;
        Ok(())
    }

    /// Run grouped statements chunked by batch size, scattering IDs back to input order.
    async fn run_groups<T, F>(&mut self, items: &[T], groups: Vec<Vec<usize>>, render: F) -> Result<Vec<ID>>
    where
        F: Fn(&[&T]) -> Statement,
    {
        let mut ids = vec![ID::UNREGISTERED; items.len()];

        for positions in groups {
            for chunk in positions.chunks(self.batch_write_size) {
                let members: Vec<&T> = chunk.iter().map(|&index| &items[index]).collect();
                let statement = render(&members);
                let created = self.run_for_ids(&statement, chunk.len()).await?;

                for (&index, id) in chunk.iter().zip(created) {
                    ids[index] = id;
                }
                self.wrote(chunk.len()).await?;
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl GraphTransaction for Neo4jTransaction {
    async fn with_graph(&mut self, _ctx: &Context, graph: &GraphSchema) -> Result<()> {
        tracing::trace!(graph = %graph.name, "native engine ignores graph targeting");
        Ok(())
    }

    async fn execute(&mut self, _ctx: &Context, query: &Query) -> Result<QueryResult> {
        let statement = cypher::render(query)?;
        let result = self.run(&statement).await?;

        if !query.updates.is_empty() || query.create.is_some() {
            self.wrote(1).await?;
        }
        Ok(result)
    }

    async fn query(&mut self, _ctx: &Context, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        self.run(&Statement::new(text, parameters.clone())).await
    }

    async fn raw(&mut self, _ctx: &Context, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        self.run(&Statement::new(text, parameters.clone())).await
    }

    async fn create_nodes(&mut self, _ctx: &Context, nodes: &[Node]) -> Result<Vec<ID>> {
        let groups = group_by_shape(nodes, |node| node.kinds.clone())
            .into_iter()
            .map(|(_, positions)| positions)
            .collect();

        self.run_groups(nodes, groups, |members| batch::create_nodes(&members[0].kinds, members))
            .await
    }

    async fn create_relationships(&mut self, _ctx: &Context, relationships: &[Relationship]) -> Result<Vec<ID>> {
        let groups = group_by_shape(relationships, |relationship| relationship.kind.clone())
            .into_iter()
            .map(|(_, positions)| positions)
            .collect();

        self.run_groups(relationships, groups, |members| {
            batch::create_relationships(&members[0].kind, members)
        })
        .await
    }

    async fn update_nodes_by(&mut self, _ctx: &Context, updates: &[NodeUpdate]) -> Result<Vec<ID>> {
        for update in updates {
            update.key()?;
        }

        let groups = group_by_shape(updates, NodeUpdate::shape)
            .into_iter()
            .map(|(_, positions)| positions)
            .collect();

        self.run_groups(updates, groups, |members| batch::update_nodes(&members[0].shape(), members))
            .await
    }

    async fn update_relationships_by(&mut self, _ctx: &Context, updates: &[RelationshipUpdate]) -> Result<Vec<ID>> {
        for update in updates {
            update.key()?;
        }

        let groups = group_by_shape(updates, RelationshipUpdate::shape)
            .into_iter()
            .map(|(_, positions)| positions)
            .collect();

        self.run_groups(updates, groups, |members| {
            batch::update_relationships(&members[0].shape(), members)
        })
        .await
    }

    async fn delete_nodes(&mut self, _ctx: &Context, ids: &[ID]) -> Result<()> {
        for chunk in ids.chunks(self.batch_write_size) {
            self.run(&batch::delete_nodes(chunk)).await?;
            self.wrote(chunk.len()).await?;
        }
        Ok(())
    }

    async fn delete_relationships(&mut self, _ctx: &Context, ids: &[ID]) -> Result<()> {
        for chunk in ids.chunks(self.batch_write_size) {
            self.run(&batch::delete_relationships(chunk)).await?;
            self.wrote(chunk.len()).await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>, _ctx: &Context) -> Result<()> {
        let mut this = self;
        let inner = this.inner.take().ok_or(GraphError::TransactionClosed)?;
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        match this.inner.take() {
            Some(inner) => inner.rollback().await,
            None => Ok(()),
        }
    }
}
