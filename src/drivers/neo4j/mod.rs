//! Native engine driver.
//!
//! Criteria render straight to Cypher; bulk writes are `unwind` statements
//! grouped by label set or merge shape. Namespaces are emulated, so graph
//! targeting is recorded and otherwise ignored.

pub mod batch;
#[cfg(feature = "neo4j")]
pub mod http;
pub mod schema;
pub mod transaction;
pub mod wire;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

#[cfg(feature = "neo4j")]
pub use http::Neo4jHttpClient;
pub use transaction::Neo4jTransaction;

use crate::config::DriverConfig;
use crate::context::Context;
use crate::engine::{AccessMode, Backend, Driver, GraphTransaction};
use crate::error::Result;
use crate::mapper::{Cell, KindMapper, LabelMapper};
use crate::query::cypher::Statement;
use crate::types::{GraphSchema, Schema};

/// Rows returned by one Cypher statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CypherRows {
    /// Column names.
    pub columns: Vec<String>,
    /// Row cells.
    pub rows: Vec<Vec<Cell>>,
}

/// Opens native engine transactions.
#[async_trait]
pub trait CypherClient: Send + Sync {
    /// Begin a transaction.
    async fn begin(&self, mode: AccessMode) -> Result<Box<dyn CypherTx>>;

    /// Release pooled connections.
    async fn close(&self) -> Result<()>;
}

/// One open native engine transaction.
#[async_trait]
pub trait CypherTx: Send {
    /// Run a statement.
    async fn run(&mut self, statement: &Statement) -> Result<CypherRows>;

    /// Commit.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Native engine [`Driver`].
pub struct Neo4jDriver {
    client: Arc<dyn CypherClient>,
    batch_write_size: AtomicUsize,
    write_flush_size: AtomicUsize,
    default_graph: RwLock<Option<String>>,
}

impl std::fmt::Debug for Neo4jDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jDriver")
            .field("batch_write_size", &self.batch_write_size)
            .field("write_flush_size", &self.write_flush_size)
            .finish()
    }
}

impl Neo4jDriver {
    /// Driver over `client`, tuned by `config`.
    pub fn new(client: Arc<dyn CypherClient>, config: &DriverConfig) -> Self {
        tracing::info!(
            batch_write_size = config.batch_write_size,
            write_flush_size = config.write_flush_size,
            "Initializing native graph driver"
        );

        Self {
            client,
            batch_write_size: AtomicUsize::new(config.batch_write_size.max(1)),
            write_flush_size: AtomicUsize::new(config.write_flush_size.max(1)),
            default_graph: RwLock::new(None),
        }
    }

    /// The namespace last recorded by [`Driver::set_default_graph`].
    pub fn default_graph(&self) -> Option<String> {
        self.default_graph.read().clone()
    }

    /// Current rotation threshold.
    pub fn write_flush_size(&self) -> usize {
        self.write_flush_size.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Driver for Neo4jDriver {
    fn backend(&self) -> Backend {
        Backend::Native
    }

    fn kind_mapper(&self) -> Arc<dyn KindMapper> {
        Arc::new(LabelMapper)
    }

    async fn begin(&self, _ctx: &Context, mode: AccessMode) -> Result<Box<dyn GraphTransaction>> {
        let inner = self.client.begin(mode).await?;
        Ok(Box::new(Neo4jTransaction::new(
            self.client.clone(),
            inner,
            mode,
            self.batch_write_size(),
            self.write_flush_size(),
        )))
    }

    async fn assert_schema(&self, ctx: &Context, desired: &Schema) -> Result<()> {
        schema::assert_schema(ctx, self.client.as_ref(), desired).await
    }

    async fn set_default_graph(&self, _ctx: &Context, graph: &GraphSchema) -> Result<()> {
        *self.default_graph.write() = Some(graph.name.clone());
        Ok(())
    }

    fn batch_write_size(&self) -> usize {
        self.batch_write_size.load(Ordering::Relaxed)
    }

    fn set_batch_write_size(&self, size: usize) {
        self.batch_write_size.store(size.max(1), Ordering::Relaxed);
    }

    fn set_write_flush_size(&self, size: usize) {
        self.write_flush_size.store(size.max(1), Ordering::Relaxed);
    }

    async fn close(&self) -> Result<()> {
        self.client.close().await
    }
}
