//! Caller-facing transaction handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::criteria::{NodeQuery, RelationshipQuery};
use super::{Backend, GraphTransaction};
use crate::context::Context;
use crate::error::{GraphError, Result};
use crate::mapper::{KindMapper, QueryResult};
use crate::query::{self, Query, Symbol};
use crate::types::{GraphSchema, Kind, Kinds, Node, NodeUpdate, Properties, Relationship, RelationshipUpdate, Value, ID};

type Slot = Arc<Mutex<Option<Box<dyn GraphTransaction>>>>;

/// Handle to an open transaction.
///
/// Clones share the same backend transaction. Once the owning
/// [`Database`](super::Database) call commits or rolls back, every clone
/// fails with [`GraphError::TransactionClosed`].
#[derive(Clone)]
pub struct Transaction {
    inner: Slot,
    ctx: Context,
    backend: Backend,
    kinds: Arc<dyn KindMapper>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("backend", &self.backend)
            .field("ctx", &self.ctx)
            .finish()
    }
}

macro_rules! with_tx {
    ($self:ident, $tx:ident => $call:expr) => {{
        let mut guard = $self.inner.lock().await;
        let $tx = guard.as_mut().ok_or(GraphError::TransactionClosed)?;
        $self.ctx.run($call).await
    }};
}

impl Transaction {
    /// Wrap an open backend transaction.
    pub fn new(ctx: Context, backend: Backend, kinds: Arc<dyn KindMapper>, tx: Box<dyn GraphTransaction>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
            ctx,
            backend,
            kinds,
        }
    }

    /// The context every operation runs under.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Backend family.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Mapper used to decode results.
    pub fn kind_mapper(&self) -> Arc<dyn KindMapper> {
        self.kinds.clone()
    }

    pub(crate) async fn take(&self) -> Option<Box<dyn GraphTransaction>> {
        self.inner.lock().await.take()
    }

    /// Commit now. Later operations on any clone fail.
    pub async fn commit(&self) -> Result<()> {
        let tx = self.take().await.ok_or(GraphError::TransactionClosed)?;
        self.ctx.run(tx.commit(&self.ctx)).await
    }

    /// Roll back now. Later operations on any clone fail.
    pub async fn rollback(&self) -> Result<()> {
        let tx = self.take().await.ok_or(GraphError::TransactionClosed)?;
        tx.rollback().await
    }

    /// Target a graph namespace. A no-op on the native engine.
    pub async fn with_graph(&self, graph: &GraphSchema) -> Result<()> {
        with_tx!(self, tx => tx.with_graph(&self.ctx, graph))
    }

    /// Run a criteria query.
    pub async fn execute(&self, query: &Query) -> Result<QueryResult> {
        with_tx!(self, tx => tx.execute(&self.ctx, query))
    }

    /// Run Cypher text on either backend.
    pub async fn query(&self, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        with_tx!(self, tx => tx.query(&self.ctx, text, parameters))
    }

    /// Run backend-native text: Cypher on the native engine, SQL on the relational one.
    pub async fn raw(&self, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        with_tx!(self, tx => tx.raw(&self.ctx, text, parameters))
    }

    // ─── Bulk ─────────────────────────────────────────────────────────────────

    /// Insert nodes, returning their IDs in input order.
    pub async fn create_nodes(&self, nodes: &[Node]) -> Result<Vec<ID>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        with_tx!(self, tx => tx.create_nodes(&self.ctx, nodes))
    }

    /// Insert relationships, returning their IDs in input order.
    pub async fn create_relationships(&self, relationships: &[Relationship]) -> Result<Vec<ID>> {
        if relationships.is_empty() {
            return Ok(Vec::new());
        }
        with_tx!(self, tx => tx.create_relationships(&self.ctx, relationships))
    }

    /// Merge nodes on identity, returning the merged IDs in input order.
    pub async fn update_nodes_by(&self, updates: &[NodeUpdate]) -> Result<Vec<ID>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        with_tx!(self, tx => tx.update_nodes_by(&self.ctx, updates))
    }

    /// Merge relationships on identity, returning the merged IDs in input order.
    pub async fn update_relationships_by(&self, updates: &[RelationshipUpdate]) -> Result<Vec<ID>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        with_tx!(self, tx => tx.update_relationships_by(&self.ctx, updates))
    }

    /// Delete nodes with their relationships.
    pub async fn delete_nodes(&self, ids: &[ID]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        with_tx!(self, tx => tx.delete_nodes(&self.ctx, ids))
    }

    /// Delete relationships.
    pub async fn delete_relationships(&self, ids: &[ID]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        with_tx!(self, tx => tx.delete_relationships(&self.ctx, ids))
    }

    // ─── Typed operations ─────────────────────────────────────────────────────

    /// Create a node and return it as stored.
    pub async fn create_node(&self, properties: Properties, kinds: impl Into<Kinds>) -> Result<Node> {
        let query = Query::new()
            .create(query::create_node(kinds, &properties))
            .returning([query::node()]);

        self.execute(&query).await?.first()
    }

    /// Write a node's pending kind and property deltas, then clear them.
    pub async fn update_node(&self, node: &mut Node) -> Result<()> {
        let mut updates = Vec::new();
        if !node.added_kinds.is_empty() {
            updates.push(query::add_kinds(Symbol::Node, node.added_kinds.clone()));
        }
        if !node.deleted_kinds.is_empty() {
            updates.push(query::delete_kinds(Symbol::Node, node.deleted_kinds.clone()));
        }
        updates.extend(query::property_updates(Symbol::Node, &node.properties));

        if updates.is_empty() {
            return Ok(());
        }

        let mut query = Query::matching(query::equals(query::node_id(), node.id));
        for update in updates {
            query = query.update(update);
        }

        self.execute(&query).await?;
        node.clear_deltas();
        Ok(())
    }

    /// Create a relationship between two existing nodes.
    pub async fn create_relationship_by_ids(
        &self,
        start_id: ID,
        end_id: ID,
        kind: impl Into<Kind>,
        properties: Properties,
    ) -> Result<Relationship> {
        let query = Query::matching(query::and([
            query::equals(query::start_id(), start_id),
            query::equals(query::end_id(), end_id),
        ]))
        .create(query::create_relationship(kind, &properties))
        .returning([query::relationship()]);

        self.execute(&query).await?.first()
    }

    /// Write a relationship's pending property deltas, then clear them.
    pub async fn update_relationship(&self, relationship: &mut Relationship) -> Result<()> {
        let updates = query::property_updates(Symbol::Relationship, &relationship.properties);
        if updates.is_empty() {
            return Ok(());
        }

        let mut query = Query::matching(query::equals(query::relationship_id(), relationship.id));
        for update in updates {
            query = query.update(update);
        }

        self.execute(&query).await?;
        relationship.properties.clear_deltas();
        Ok(())
    }

    /// Delete one node with its relationships.
    pub async fn delete_node(&self, id: ID) -> Result<()> {
        self.delete_nodes(&[id]).await
    }

    /// Delete one relationship.
    pub async fn delete_relationship(&self, id: ID) -> Result<()> {
        self.delete_relationships(&[id]).await
    }

    /// Merge one node on identity.
    pub async fn update_node_by(&self, update: NodeUpdate) -> Result<ID> {
        let ids = self.update_nodes_by(std::slice::from_ref(&update)).await?;
        ids.into_iter().next().ok_or(GraphError::NoResults)
    }

    /// Merge one relationship on identity.
    pub async fn update_relationship_by(&self, update: RelationshipUpdate) -> Result<ID> {
        let ids = self.update_relationships_by(std::slice::from_ref(&update)).await?;
        ids.into_iter().next().ok_or(GraphError::NoResults)
    }

    // ─── Criteria ─────────────────────────────────────────────────────────────

    /// Node criteria query.
    pub fn nodes(&self) -> NodeQuery {
        NodeQuery::new(self.clone())
    }

    /// Relationship criteria query.
    pub fn relationships(&self) -> RelationshipQuery {
        RelationshipQuery::new(self.clone())
    }
}
