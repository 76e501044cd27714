//! Relational engine transaction.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use super::statements::{self, EdgeRows, EdgeUpserts, EDGE_ID_SEQUENCE, NODE_ID_SEQUENCE};
use super::{run, SchemaManager, SqlRows, SqlSession};
use crate::batch::group_by_shape;
use crate::context::Context;
use crate::engine::GraphTransaction;
use crate::error::{GraphError, MappingError, Result};
use crate::mapper::{KindMapper, QueryResult};
use crate::query::model::{Create, Update};
use crate::query::pgsql::{self, SqlStatement};
use crate::query::{parser, Query};
use crate::types::{GraphSchema, Kind, Kinds, Node, NodeUpdate, Relationship, RelationshipUpdate, Value, ID};

/// Relational [`GraphTransaction`].
///
/// Statements target the graph set by [`GraphTransaction::with_graph`], or
/// the driver's default graph when none was set.
pub struct PgTransaction {
    session: Option<Box<dyn SqlSession>>,
    schema: Arc<SchemaManager>,
    graph: Option<i32>,
    batch_write_size: usize,
}

impl PgTransaction {
    pub(crate) fn new(session: Box<dyn SqlSession>, schema: Arc<SchemaManager>, batch_write_size: usize) -> Self {
        Self {
            session: Some(session),
            schema,
            graph: None,
            batch_write_size: batch_write_size.max(1),
        }
    }

    /// Graph id statements run against.
    pub fn graph_id(&self) -> Result<i32> {
        self.graph
            .or_else(|| self.schema.default_graph())
            .ok_or(GraphError::MissingGraphTarget)
    }

    fn result(&self, rows: SqlRows) -> QueryResult {
        let kinds: Arc<dyn KindMapper> = self.schema.clone();
        QueryResult::new(rows.columns, rows.rows, kinds)
    }

    async fn run(&mut self, ctx: &Context, statement: &SqlStatement) -> Result<QueryResult> {
        let session = self.session.as_mut().ok_or(GraphError::TransactionClosed)?;
        let rows = ctx.run(run(session.as_mut(), statement)).await?;
        Ok(self.result(rows))
    }

    async fn allocate(&mut self, ctx: &Context, sequence: &str, count: usize) -> Result<Vec<i64>> {
        let ids: Vec<i64> = self.run(ctx, &statements::allocate_ids(sequence, count)).await?.column()?;
        if ids.len() != count {
            return Err(GraphError::Batch(format!("allocated {} ids for {count} records", ids.len())));
        }
        Ok(ids)
    }

    /// `(o, id)` rows of an upsert, checked against the payload size.
    async fn run_upsert(&mut self, ctx: &Context, statement: &SqlStatement, expected: usize) -> Result<Vec<ID>> {
        let rows: Vec<(i64, ID)> = self.run(ctx, statement).await?.scan_all()?;
        if rows.len() != expected {
            return Err(GraphError::Batch(format!(
                "statement returned {} ids for {expected} records",
                rows.len()
            )));
        }
        Ok(rows.into_iter().map(|(_, id)| id).collect())
    }

    async fn execute_query(&mut self, ctx: &Context, query: &Query) -> Result<QueryResult> {
        let mut defined = Kinds::new();
        match &query.create {
            Some(Create::Node { kinds, .. }) => defined = defined.concatenate(kinds),
            Some(Create::Relationship { kind, .. }) => {
                defined.add(kind.clone());
            }
            None => {}
        }
        for update in &query.updates {
            if let Update::AddKinds { kinds, .. } = update {
                defined = defined.concatenate(kinds);
            }
        }
        if !defined.is_empty() {
            self.schema.assert_kinds(ctx, &defined).await?;
        }

        let statement = pgsql::compile(query, self.schema.as_ref(), self.graph_id()?)?;
        self.run(ctx, &statement).await
    }

    async fn merge_nodes(&mut self, ctx: &Context, updates: &[NodeUpdate]) -> Result<Vec<ID>> {
        let graph_id = self.graph_id()?;
        let (unique, slots) = coalesce(updates, |update| Ok((update.shape(), update.key()?)), |into, from| {
            into.node.merge(&from.node)
        })?;

        let applied = unique.iter().fold(Kinds::new(), |acc, update| acc.concatenate(&update.applied_kinds()));
        self.schema.assert_kinds(ctx, &applied).await?;

        let mut ids = vec![ID::UNREGISTERED; unique.len()];
        for (shape, positions) in group_by_shape(&unique, NodeUpdate::shape) {
            let identity_kind = match &shape.identity_kind {
                Some(kind) => Some(kind_code(&self.schema, kind)?),
                None => None,
            };
            let kind_ids = self.schema.map_kinds(&Kinds::from(shape.kinds.clone()))?;

            for chunk in positions.chunks(self.batch_write_size) {
                let payloads = chunk.iter().map(|&index| unique[index].node.properties.to_json()).collect();
                let statement = statements::upsert_nodes(
                    graph_id,
                    identity_kind,
                    &shape.identity_properties,
                    kind_ids.clone(),
                    payloads,
                );

                let merged = self.run_upsert(ctx, &statement, chunk.len()).await?;
                for (&index, id) in chunk.iter().zip(merged) {
                    ids[index] = id;
                }
            }
        }

        Ok(slots.into_iter().map(|slot| ids[slot]).collect())
    }
}

fn kind_code(schema: &SchemaManager, kind: &Kind) -> Result<i16> {
    schema
        .id_for_kind(kind)
        .ok_or_else(|| MappingError::UnknownKind(kind.clone()).into())
}

/// Collapse entries sharing a key, merging later payloads into the first.
///
/// Returns the unique entries and, per input position, the index of the
/// unique entry it collapsed into.
fn coalesce<T, K, F, M>(items: &[T], key: F, merge: M) -> Result<(Vec<T>, Vec<usize>)>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> Result<K>,
    M: Fn(&mut T, &T),
{
    let mut unique: Vec<T> = Vec::new();
    let mut seen: HashMap<K, usize> = HashMap::new();
    let mut slots = Vec::with_capacity(items.len());

    for item in items {
        let key = key(item)?;
        match seen.get(&key) {
            Some(&slot) => {
                merge(&mut unique[slot], item);
                slots.push(slot);
            }
            None => {
                seen.insert(key, unique.len());
                slots.push(unique.len());
                unique.push(item.clone());
            }
        }
    }

    Ok((unique, slots))
}

#[async_trait]
impl GraphTransaction for PgTransaction {
    async fn with_graph(&mut self, ctx: &Context, graph: &GraphSchema) -> Result<()> {
        let graph_id = self.schema.assert_graph(ctx, graph).await?;
        tracing::debug!(graph = %graph.name, graph_id, "Targeting graph");
        self.graph = Some(graph_id);
        Ok(())
    }

    async fn execute(&mut self, ctx: &Context, query: &Query) -> Result<QueryResult> {
        self.execute_query(ctx, query).await
    }

    async fn query(&mut self, ctx: &Context, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        let query = parser::parse(text, parameters)?;
        self.execute_query(ctx, &query).await
    }

    async fn raw(&mut self, ctx: &Context, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        let statement = statements::bind_named(text, parameters)?;
        self.run(ctx, &statement).await
    }

    async fn create_nodes(&mut self, ctx: &Context, nodes: &[Node]) -> Result<Vec<ID>> {
        let graph_id = self.graph_id()?;
        let preset = nodes.iter().filter(|node| node.id.is_registered()).count();
        if preset != 0 && preset != nodes.len() {
            return Err(GraphError::Batch(
                "batch may not mix preset node IDs with entries that require an auto-generated ID".to_string(),
            ));
        }

        let kinds = nodes.iter().fold(Kinds::new(), |acc, node| acc.concatenate(&node.kinds));
        self.schema.assert_kinds(ctx, &kinds).await?;

        let mut ids = Vec::with_capacity(nodes.len());
        for chunk in nodes.chunks(self.batch_write_size) {
            let chunk_ids = if preset == 0 {
                self.allocate(ctx, NODE_ID_SEQUENCE, chunk.len()).await?
            } else {
                chunk.iter().map(|node| node.id.as_i64()).collect()
            };

            let mut kind_ids = Vec::with_capacity(chunk.len());
            let mut properties = Vec::with_capacity(chunk.len());
            for node in chunk {
                kind_ids.push(statements::kind_ids_literal(&self.schema.map_kinds(&node.kinds)?));
                properties.push(node.properties.to_json());
            }

            let statement = statements::insert_nodes(graph_id, chunk_ids.clone(), kind_ids, properties);
            self.run(ctx, &statement).await?;
            for id in chunk_ids {
                ids.push(ID::try_from(id).map_err(|_| GraphError::Batch(format!("invalid node id {id}")))?);
            }
        }

        Ok(ids)
    }

    async fn create_relationships(&mut self, ctx: &Context, relationships: &[Relationship]) -> Result<Vec<ID>> {
        let graph_id = self.graph_id()?;
        let kinds: Kinds = relationships.iter().map(|relationship| relationship.kind.clone()).collect();
        self.schema.assert_kinds(ctx, &kinds).await?;

        let mut ids = Vec::with_capacity(relationships.len());
        for chunk in relationships.chunks(self.batch_write_size) {
            let chunk_ids = self.allocate(ctx, EDGE_ID_SEQUENCE, chunk.len()).await?;

            let mut rows = EdgeRows {
                ids: chunk_ids.clone(),
                ..EdgeRows::default()
            };
            for relationship in chunk {
                let kind_id = kind_code(&self.schema, &relationship.kind)?;
                rows.start_ids.push(relationship.start_id.as_i64());
                rows.end_ids.push(relationship.end_id.as_i64());
                rows.kind_ids.push(kind_id);
                rows.properties.push(relationship.properties.to_json());
            }

            self.run(ctx, &statements::insert_edges(graph_id, rows)).await?;
            for id in chunk_ids {
                ids.push(ID::try_from(id).map_err(|_| GraphError::Batch(format!("invalid relationship id {id}")))?);
            }
        }

        Ok(ids)
    }

    async fn update_nodes_by(&mut self, ctx: &Context, updates: &[NodeUpdate]) -> Result<Vec<ID>> {
        self.merge_nodes(ctx, updates).await
    }

    async fn update_relationships_by(&mut self, ctx: &Context, updates: &[RelationshipUpdate]) -> Result<Vec<ID>> {
        let graph_id = self.graph_id()?;
        let (unique, slots) = coalesce(updates, |update| Ok(update.key()?), |into, from| {
            into.relationship.merge(&from.relationship)
        })?;

        let starts: Vec<NodeUpdate> = unique.iter().map(RelationshipUpdate::start_update).collect();
        let ends: Vec<NodeUpdate> = unique.iter().map(RelationshipUpdate::end_update).collect();
        let start_ids = self.merge_nodes(ctx, &starts).await?;
        let end_ids = self.merge_nodes(ctx, &ends).await?;

        let kinds: Kinds = unique.iter().map(|update| update.relationship.kind.clone()).collect();
        self.schema.assert_kinds(ctx, &kinds).await?;

        let mut ids = vec![ID::UNREGISTERED; unique.len()];
        for (shape, positions) in group_by_shape(&unique, RelationshipUpdate::shape) {
            let kind_id = kind_code(&self.schema, &shape.kind)?;

            for chunk in positions.chunks(self.batch_write_size) {
                let mut rows = EdgeUpserts::default();
                for &index in chunk {
                    rows.start_ids.push(start_ids[index].as_i64());
                    rows.end_ids.push(end_ids[index].as_i64());
                    rows.properties.push(unique[index].relationship.properties.to_json());
                }

                let statement = statements::upsert_edges(graph_id, kind_id, &shape.identity_properties, rows);
                let merged = self.run_upsert(ctx, &statement, chunk.len()).await?;
                for (&index, id) in chunk.iter().zip(merged) {
                    ids[index] = id;
                }
            }
        }

        Ok(slots.into_iter().map(|slot| ids[slot]).collect())
    }

    async fn delete_nodes(&mut self, ctx: &Context, ids: &[ID]) -> Result<()> {
        let graph_id = self.graph_id()?;
        for chunk in ids.chunks(self.batch_write_size) {
            let ids = chunk.iter().map(|id| id.as_i64()).collect();
            self.run(ctx, &statements::delete_nodes(graph_id, ids)).await?;
        }
        Ok(())
    }

    async fn delete_relationships(&mut self, ctx: &Context, ids: &[ID]) -> Result<()> {
        let graph_id = self.graph_id()?;
        for chunk in ids.chunks(self.batch_write_size) {
            let ids = chunk.iter().map(|id| id.as_i64()).collect();
            self.run(ctx, &statements::delete_edges(graph_id, ids)).await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>, ctx: &Context) -> Result<()> {
        let mut this = self;
        let session = this.session.take().ok_or(GraphError::TransactionClosed)?;
        ctx.run(session.commit()).await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        match this.session.take() {
            Some(session) => session.rollback().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_maps_duplicates_onto_first_entry() {
        let items = vec![("a", 1), ("b", 2), ("a", 3)];
        let (unique, slots) = coalesce(&items, |item| Ok(item.0), |into, from| into.1 += from.1).unwrap();

        assert_eq!(unique, vec![("a", 4), ("b", 2)]);
        assert_eq!(slots, vec![0, 1, 0]);
    }
}
