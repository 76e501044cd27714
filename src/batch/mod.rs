//! Buffered bulk writes.
//!
//! A [`Batch`] keeps one buffer per operation type. A buffer is flushed as a
//! single bulk call on the underlying transaction once it holds
//! `batch_size` entries, and every non-empty buffer is flushed before the
//! batch commits, in this order:
//!
//! 1. node updates-by-identity
//! 2. relationship updates-by-identity
//! 3. node creates
//! 4. relationship creates
//! 5. node deletes
//! 6. relationship deletes
//!
//! Node writes hand back an [`IdFuture`]. Relationship creates may use such a
//! future as an endpoint; pending node writes are always flushed, and their
//! futures resolved, before the relationship buffer is sent.

pub mod future;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

pub use future::{Endpoint, IdFuture};

use crate::engine::Transaction;
use crate::error::{GraphError, Result};
use crate::types::{Kind, Node, NodeUpdate, Properties, Relationship, RelationshipUpdate, ID};

/// Group items by a structural key, preserving first-appearance order.
///
/// Returns each key with the input positions that share it.
pub fn group_by_shape<T, K, F>(items: &[T], shape: F) -> Vec<(K, Vec<usize>)>
where
    K: Eq + std::hash::Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut groups: Vec<(K, Vec<usize>)> = Vec::new();
    let mut positions: HashMap<K, usize> = HashMap::new();

    for (index, item) in items.iter().enumerate() {
        let key = shape(item);
        match positions.get(&key) {
            Some(&group) => groups[group].1.push(index),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![index]));
            }
        }
    }

    groups
}

#[derive(Debug)]
struct PendingRelationship {
    start: Endpoint,
    end: Endpoint,
    kind: Kind,
    properties: Properties,
}

#[derive(Debug, Default)]
struct Buffers {
    node_updates: Vec<(NodeUpdate, IdFuture)>,
    relationship_updates: Vec<RelationshipUpdate>,
    node_creates: Vec<(Node, IdFuture)>,
    relationship_creates: Vec<PendingRelationship>,
    node_deletes: Vec<ID>,
    relationship_deletes: Vec<ID>,
    futures: usize,
}

impl Buffers {
    fn next_future(&mut self) -> IdFuture {
        let future = IdFuture::new(self.futures);
        self.futures += 1;
        future
    }
}

/// Bulk write handle passed to a [`Database::batch_operation`](crate::engine::Database::batch_operation) delegate.
#[derive(Clone)]
pub struct Batch {
    tx: Transaction,
    batch_size: usize,
    buffers: Arc<Mutex<Buffers>>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch").field("batch_size", &self.batch_size).finish()
    }
}

impl Batch {
    /// Buffer writes for `tx`, flushing every `batch_size` entries.
    pub fn new(tx: Transaction, batch_size: usize) -> Self {
        Self {
            tx,
            batch_size: batch_size.max(1),
            buffers: Arc::new(Mutex::new(Buffers::default())),
        }
    }

    /// Records per bulk call.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The underlying transaction, for reads that must see flushed writes.
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Queue a node create. The future resolves to the new node's ID.
    pub async fn create_node(&self, node: Node) -> Result<IdFuture> {
        let mut buffers = self.buffers.lock().await;
        let future = buffers.next_future();
        buffers.node_creates.push((node, future.clone()));

        if buffers.node_creates.len() >= self.batch_size {
            self.flush_node_creates(&mut buffers).await?;
        }
        Ok(future)
    }

    /// Queue a node merge. The future resolves to the merged node's ID.
    pub async fn update_node_by(&self, update: NodeUpdate) -> Result<IdFuture> {
        update.key()?;

        let mut buffers = self.buffers.lock().await;
        let future = buffers.next_future();
        buffers.node_updates.push((update, future.clone()));

        if buffers.node_updates.len() >= self.batch_size {
            self.flush_node_updates(&mut buffers).await?;
        }
        Ok(future)
    }

    /// Queue a relationship create between two known or pending nodes.
    pub async fn create_relationship(
        &self,
        start: impl Into<Endpoint>,
        end: impl Into<Endpoint>,
        kind: impl Into<Kind>,
        properties: Properties,
    ) -> Result<()> {
        let mut buffers = self.buffers.lock().await;
        buffers.relationship_creates.push(PendingRelationship {
            start: start.into(),
            end: end.into(),
            kind: kind.into(),
            properties,
        });

        if buffers.relationship_creates.len() >= self.batch_size {
            self.flush_relationship_creates(&mut buffers).await?;
        }
        Ok(())
    }

    /// Queue a relationship merge.
    pub async fn update_relationship_by(&self, update: RelationshipUpdate) -> Result<()> {
        update.key()?;

        let mut buffers = self.buffers.lock().await;
        buffers.relationship_updates.push(update);

        if buffers.relationship_updates.len() >= self.batch_size {
            self.flush_relationship_updates(&mut buffers).await?;
        }
        Ok(())
    }

    /// Queue a node delete.
    pub async fn delete_node(&self, id: ID) -> Result<()> {
        let mut buffers = self.buffers.lock().await;
        buffers.node_deletes.push(id);

        if buffers.node_deletes.len() >= self.batch_size {
            self.flush_node_deletes(&mut buffers).await?;
        }
        Ok(())
    }

    /// Queue a relationship delete.
    pub async fn delete_relationship(&self, id: ID) -> Result<()> {
        let mut buffers = self.buffers.lock().await;
        buffers.relationship_deletes.push(id);

        if buffers.relationship_deletes.len() >= self.batch_size {
            self.flush_relationship_deletes(&mut buffers).await?;
        }
        Ok(())
    }

    /// Flush every non-empty buffer in commit order.
    pub async fn flush(&self) -> Result<()> {
        let mut buffers = self.buffers.lock().await;
        self.flush_node_updates(&mut buffers).await?;
        self.flush_relationship_updates(&mut buffers).await?;
        self.flush_node_creates(&mut buffers).await?;
        self.flush_relationship_creates(&mut buffers).await?;
        self.flush_node_deletes(&mut buffers).await?;
        self.flush_relationship_deletes(&mut buffers).await
    }

    pub(crate) async fn commit(&self) -> Result<()> {
        self.flush().await
    }

    async fn flush_node_creates(&self, buffers: &mut Buffers) -> Result<()> {
        if buffers.node_creates.is_empty() {
            return Ok(());
        }

        let (nodes, futures): (Vec<Node>, Vec<IdFuture>) = std::mem::take(&mut buffers.node_creates).into_iter().unzip();
        tracing::debug!(count = nodes.len(), "flushing node creates");

        let ids = self.tx.create_nodes(&nodes).await?;
        resolve_all("node create", &futures, &ids)
    }

    async fn flush_node_updates(&self, buffers: &mut Buffers) -> Result<()> {
        if buffers.node_updates.is_empty() {
            return Ok(());
        }

        let (updates, futures): (Vec<NodeUpdate>, Vec<IdFuture>) =
            std::mem::take(&mut buffers.node_updates).into_iter().unzip();
        tracing::debug!(count = updates.len(), "flushing node updates");

        let ids = self.tx.update_nodes_by(&updates).await?;
        resolve_all("node update", &futures, &ids)
    }

    async fn flush_relationship_creates(&self, buffers: &mut Buffers) -> Result<()> {
        if buffers.relationship_creates.is_empty() {
            return Ok(());
        }

        // Endpoints may still be waiting on buffered node writes.
        self.flush_node_updates(buffers).await?;
        self.flush_node_creates(buffers).await?;

        let pending = std::mem::take(&mut buffers.relationship_creates);
        let relationships = coalesce(pending)?;
        tracing::debug!(count = relationships.len(), "flushing relationship creates");

        self.tx.create_relationships(&relationships).await.map(|_| ())
    }

    async fn flush_relationship_updates(&self, buffers: &mut Buffers) -> Result<()> {
        if buffers.relationship_updates.is_empty() {
            return Ok(());
        }

        let updates = std::mem::take(&mut buffers.relationship_updates);
        tracing::debug!(count = updates.len(), "flushing relationship updates");
        self.tx.update_relationships_by(&updates).await.map(|_| ())
    }

    async fn flush_node_deletes(&self, buffers: &mut Buffers) -> Result<()> {
        if buffers.node_deletes.is_empty() {
            return Ok(());
        }

        let ids = std::mem::take(&mut buffers.node_deletes);
        tracing::debug!(count = ids.len(), "flushing node deletes");
        self.tx.delete_nodes(&ids).await
    }

    async fn flush_relationship_deletes(&self, buffers: &mut Buffers) -> Result<()> {
        if buffers.relationship_deletes.is_empty() {
            return Ok(());
        }

        let ids = std::mem::take(&mut buffers.relationship_deletes);
        tracing::debug!(count = ids.len(), "flushing relationship deletes");
        self.tx.delete_relationships(&ids).await
    }
}

fn resolve_all(operation: &str, futures: &[IdFuture], ids: &[ID]) -> Result<()> {
    if futures.len() != ids.len() {
        return Err(GraphError::Batch(format!(
            "{operation} returned {} ids for {} entries",
            ids.len(),
            futures.len()
        )));
    }

    for (future, id) in futures.iter().zip(ids) {
        future.resolve(*id)?;
    }
    Ok(())
}

/// Resolve endpoints and merge entries sharing (start, end, kind).
///
/// Merged entries keep the position of their first occurrence; later
/// property values win.
fn coalesce(pending: Vec<PendingRelationship>) -> Result<Vec<Relationship>> {
    let mut relationships: Vec<Relationship> = Vec::with_capacity(pending.len());
    let mut positions: HashMap<(ID, ID, Kind), usize> = HashMap::new();

    for entry in pending {
        let start = resolve_endpoint(&entry.start)?;
        let end = resolve_endpoint(&entry.end)?;

        match positions.get(&(start, end, entry.kind.clone())) {
            Some(&position) => relationships[position].properties.merge(&entry.properties),
            None => {
                positions.insert((start, end, entry.kind.clone()), relationships.len());
                relationships.push(Relationship::between(start, end, entry.kind, entry.properties));
            }
        }
    }

    Ok(relationships)
}

fn resolve_endpoint(endpoint: &Endpoint) -> Result<ID> {
    match endpoint {
        Endpoint::Id(id) => Ok(*id),
        Endpoint::Pending(future) => future.get().ok_or_else(|| {
            GraphError::Batch(format!(
                "relationship endpoint {} was never resolved by a node write in this batch",
                future.index()
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_shape_keeps_first_appearance_order() {
        let items = ["b", "a", "b", "c", "a"];
        let groups = group_by_shape(&items, |item| item.to_string());

        assert_eq!(
            groups,
            vec![
                ("b".to_string(), vec![0, 2]),
                ("a".to_string(), vec![1, 4]),
                ("c".to_string(), vec![3]),
            ]
        );
    }

    #[test]
    fn test_coalesce_merges_same_triple() {
        let pending = vec![
            PendingRelationship {
                start: Endpoint::Id(ID::new(1)),
                end: Endpoint::Id(ID::new(2)),
                kind: Kind::new("MemberOf"),
                properties: Properties::new().with("a", 1i64).with("shared", "first"),
            },
            PendingRelationship {
                start: Endpoint::Id(ID::new(1)),
                end: Endpoint::Id(ID::new(3)),
                kind: Kind::new("MemberOf"),
                properties: Properties::new(),
            },
            PendingRelationship {
                start: Endpoint::Id(ID::new(1)),
                end: Endpoint::Id(ID::new(2)),
                kind: Kind::new("MemberOf"),
                properties: Properties::new().with("b", 2i64).with("shared", "second"),
            },
        ];

        let relationships = coalesce(pending).unwrap();
        assert_eq!(relationships.len(), 2);
        assert_eq!(relationships[0].end_id, ID::new(2));
        assert_eq!(relationships[0].properties.get("a").as_int().unwrap(), 1);
        assert_eq!(relationships[0].properties.get("b").as_int().unwrap(), 2);
        assert_eq!(relationships[0].properties.get("shared").as_string().unwrap(), "second");
    }

    #[test]
    fn test_unresolved_endpoint_is_a_batch_error() {
        let pending = vec![PendingRelationship {
            start: Endpoint::Pending(IdFuture::new(7)),
            end: Endpoint::Id(ID::new(2)),
            kind: Kind::new("MemberOf"),
            properties: Properties::new(),
        }];

        let err = coalesce(pending).unwrap_err();
        assert!(matches!(err, GraphError::Batch(message) if message.contains("endpoint 7")));
    }
}
