//! Transaction engine.
//!
//! A [`Driver`] opens backend sessions; [`Database`] wraps one driver with a
//! bounded session limiter and the commit/rollback lifecycle, and hands the
//! caller's delegate a [`Transaction`] handle.

pub mod criteria;
pub mod database;
pub mod transaction;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::mapper::{KindMapper, QueryResult};
use crate::query::Query;
use crate::types::{GraphSchema, Node, NodeUpdate, Relationship, RelationshipUpdate, Schema, Value, ID};

pub use criteria::{NodeQuery, RelationshipQuery};
pub use database::Database;
pub use transaction::Transaction;

/// How a session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Read-only session.
    Read,
    /// Read-write session, all-or-nothing.
    Write,
    /// Bulk ingestion session. The native engine may rotate it.
    Batch,
}

impl AccessMode {
    /// Whether the session may write.
    pub fn is_write(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

/// Which backend family a driver speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Cypher-native graph database.
    Native,
    /// Relational graph emulation.
    Relational,
}

impl Backend {
    /// Short name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Native => "neo4j",
            Backend::Relational => "pg",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend connection factory.
///
/// Implementations must be safe to share across tasks; every open
/// transaction is exclusively owned by one caller.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend family.
    fn backend(&self) -> Backend;

    /// Mapper used to decode kinds in results.
    fn kind_mapper(&self) -> Arc<dyn KindMapper>;

    /// Open a session and begin a transaction.
    async fn begin(&self, ctx: &Context, mode: AccessMode) -> Result<Box<dyn GraphTransaction>>;

    /// Sync kinds, namespaces, indexes and constraints with `schema`.
    async fn assert_schema(&self, ctx: &Context, schema: &Schema) -> Result<()>;

    /// Make `graph` the fallback namespace for new transactions.
    async fn set_default_graph(&self, ctx: &Context, graph: &GraphSchema) -> Result<()>;

    /// Records per bulk statement.
    fn batch_write_size(&self) -> usize;

    /// Change the records-per-bulk-statement threshold.
    fn set_batch_write_size(&self, size: usize);

    /// Change the native rotation threshold. Ignored by the relational driver.
    fn set_write_flush_size(&self, size: usize);

    /// Release backend resources.
    async fn close(&self) -> Result<()>;
}

/// One open backend transaction.
///
/// Bulk methods take whole slices and return IDs in input order.
#[async_trait]
pub trait GraphTransaction: Send {
    /// Target a graph namespace for the rest of the transaction.
    async fn with_graph(&mut self, ctx: &Context, graph: &GraphSchema) -> Result<()>;

    /// Run a criteria query.
    async fn execute(&mut self, ctx: &Context, query: &Query) -> Result<QueryResult>;

    /// Run Cypher text.
    async fn query(&mut self, ctx: &Context, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult>;

    /// Run backend-native text untouched.
    async fn raw(&mut self, ctx: &Context, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult>;

    /// Insert nodes.
    async fn create_nodes(&mut self, ctx: &Context, nodes: &[Node]) -> Result<Vec<ID>>;

    /// Insert relationships between existing nodes.
    async fn create_relationships(&mut self, ctx: &Context, relationships: &[Relationship]) -> Result<Vec<ID>>;

    /// Merge nodes on their identity properties.
    async fn update_nodes_by(&mut self, ctx: &Context, updates: &[NodeUpdate]) -> Result<Vec<ID>>;

    /// Merge relationships and their endpoints on identity properties.
    async fn update_relationships_by(&mut self, ctx: &Context, updates: &[RelationshipUpdate]) -> Result<Vec<ID>>;

    /// Delete nodes and every relationship touching them.
    async fn delete_nodes(&mut self, ctx: &Context, ids: &[ID]) -> Result<()>;

    /// Delete relationships.
    async fn delete_relationships(&mut self, ctx: &Context, ids: &[ID]) -> Result<()>;

    /// Commit and close.
    async fn commit(self: Box<Self>, ctx: &Context) -> Result<()>;

    /// Roll back and close.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
