//! Relational engine driver.
//!
//! Nodes and edges live in the `node` / `edge` tables, list-partitioned by
//! graph id, with kinds stored as `int2` codes and properties as JSONB.
//! Criteria and query text are lowered to SQL by [`crate::query::pgsql`].

pub mod schema;
#[cfg(feature = "postgres")]
pub mod sqlx_client;
pub mod statements;
pub mod transaction;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

pub use schema::SchemaManager;
#[cfg(feature = "postgres")]
pub use sqlx_client::SqlxClient;
pub use transaction::PgTransaction;

use crate::config::DriverConfig;
use crate::context::Context;
use crate::drivers::log_statement;
use crate::engine::{AccessMode, Backend, Driver, GraphTransaction};
use crate::error::Result;
use crate::mapper::{Cell, KindMapper};
use crate::query::pgsql::SqlStatement;
use crate::types::{GraphSchema, Schema};

/// Rows returned by one SQL statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRows {
    /// Column names.
    pub columns: Vec<String>,
    /// Row cells.
    pub rows: Vec<Vec<Cell>>,
}

/// Opens relational sessions.
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Check out a connection and begin a transaction.
    async fn begin(&self, mode: AccessMode) -> Result<Box<dyn SqlSession>>;

    /// Close the pool.
    async fn close(&self) -> Result<()>;
}

/// One open relational transaction.
#[async_trait]
pub trait SqlSession: Send {
    /// Run a statement and collect its rows.
    async fn query(&mut self, statement: &SqlStatement) -> Result<SqlRows>;

    /// Commit.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

pub(crate) async fn run(session: &mut dyn SqlSession, statement: &SqlStatement) -> Result<SqlRows> {
    let keys = statement.parameter_keys();
    log_statement("pg", &statement.sql, keys.iter().map(String::as_str));
    session.query(statement).await
}

/// Relational [`Driver`].
pub struct PgDriver {
    client: Arc<dyn SqlClient>,
    schema: Arc<SchemaManager>,
    batch_write_size: AtomicUsize,
}

impl std::fmt::Debug for PgDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDriver")
            .field("batch_write_size", &self.batch_write_size)
            .finish()
    }
}

impl PgDriver {
    /// Driver over `client`, tuned by `config`. Tables are created on first use.
    pub fn new(client: Arc<dyn SqlClient>, config: &DriverConfig) -> Self {
        tracing::info!(
            batch_write_size = config.batch_write_size,
            query_exec_mode = ?config.query_exec_mode,
            result_format = ?config.result_format,
            "Initializing relational graph driver"
        );

        Self {
            schema: Arc::new(SchemaManager::new(client.clone())),
            client,
            batch_write_size: AtomicUsize::new(config.batch_write_size.max(1)),
        }
    }

    /// The kind and namespace manager.
    pub fn schema_manager(&self) -> &Arc<SchemaManager> {
        &self.schema
    }
}

#[async_trait]
impl Driver for PgDriver {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    fn kind_mapper(&self) -> Arc<dyn KindMapper> {
        self.schema.clone()
    }

    async fn begin(&self, ctx: &Context, mode: AccessMode) -> Result<Box<dyn GraphTransaction>> {
        self.schema.init(ctx).await?;
        let session = self.client.begin(mode).await?;

        Ok(Box::new(PgTransaction::new(
            session,
            self.schema.clone(),
            self.batch_write_size(),
        )))
    }

    async fn assert_schema(&self, ctx: &Context, desired: &Schema) -> Result<()> {
        self.schema.assert_schema(ctx, desired).await
    }

    async fn set_default_graph(&self, ctx: &Context, graph: &GraphSchema) -> Result<()> {
        let graph_id = self.schema.assert_graph(ctx, graph).await?;
        self.schema.set_default_graph(graph_id);
        Ok(())
    }

    fn batch_write_size(&self) -> usize {
        self.batch_write_size.load(Ordering::Relaxed)
    }

    fn set_batch_write_size(&self, size: usize) {
        self.batch_write_size.store(size.max(1), Ordering::Relaxed);
    }

    fn set_write_flush_size(&self, _size: usize) {}

    async fn close(&self) -> Result<()> {
        self.client.close().await
    }
}
