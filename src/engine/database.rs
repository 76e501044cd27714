//! Session-bounded transaction lifecycle.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::transaction::Transaction;
use super::{AccessMode, Backend, Driver};
use crate::batch::Batch;
use crate::config::{DriverConfig, TransactionConfig};
use crate::context::Context;
use crate::error::{GraphError, Result};
use crate::mapper::{KindMapper, QueryResult};
use crate::types::{GraphSchema, Schema, Value};

/// A driver plus the process-wide session limiter.
///
/// Every transaction first takes one slot; with `max_concurrent_sessions`
/// slots taken, further callers wait until a slot frees or their context
/// expires.
pub struct Database {
    driver: Arc<dyn Driver>,
    limiter: Arc<Semaphore>,
    config: DriverConfig,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.driver.backend())
            .field("available_sessions", &self.limiter.available_permits())
            .field("config", &self.config)
            .finish()
    }
}

impl Database {
    /// Wrap a driver.
    pub fn new(driver: Arc<dyn Driver>, config: DriverConfig) -> Self {
        let sessions = config.max_concurrent_sessions.max(1);
        tracing::info!(
            backend = %driver.backend(),
            max_concurrent_sessions = sessions,
            batch_write_size = config.batch_write_size,
            "Initializing graph database"
        );

        Self {
            driver,
            limiter: Arc::new(Semaphore::new(sessions)),
            config,
        }
    }

    /// Backend family.
    pub fn backend(&self) -> Backend {
        self.driver.backend()
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Mapper used to decode kinds in results.
    pub fn kind_mapper(&self) -> Arc<dyn KindMapper> {
        self.driver.kind_mapper()
    }

    async fn open(
        &self,
        ctx: &Context,
        mode: AccessMode,
        config: Option<TransactionConfig>,
    ) -> Result<(OwnedSemaphorePermit, Transaction)> {
        let timeout = config
            .and_then(|config| config.timeout)
            .or(self.config.transaction_timeout);
        let ctx = match timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };

        let limiter = self.limiter.clone();
        let permit = ctx
            .run(async move {
                limiter
                    .acquire_owned()
                    .await
                    .map_err(|_| GraphError::Connection("session limiter closed".to_string()))
            })
            .await?;

        tracing::debug!(backend = %self.driver.backend(), ?mode, "opening transaction");
        let inner = ctx.run(self.driver.begin(&ctx, mode)).await?;
        let tx = Transaction::new(ctx, self.driver.backend(), self.driver.kind_mapper(), inner);

        Ok((permit, tx))
    }

    async fn finish<T>(tx: &Transaction, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                if let Some(inner) = tx.take().await {
                    tx.context().run(inner.commit(tx.context())).await?;
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(inner) = tx.take().await {
                    if let Err(rollback_err) = inner.rollback().await {
                        tracing::warn!(error = %rollback_err, cause = %err, "rollback failed");
                    }
                }
                Err(err)
            }
        }
    }

    async fn transact<T, F, Fut>(
        &self,
        ctx: &Context,
        mode: AccessMode,
        delegate: F,
        config: Option<TransactionConfig>,
    ) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (_permit, tx) = self.open(ctx, mode, config).await?;
        let outcome = delegate(tx.clone()).await;
        Self::finish(&tx, outcome).await
    }

    /// Run `delegate` in a read-only transaction.
    pub async fn read_transaction<T, F, Fut>(
        &self,
        ctx: &Context,
        delegate: F,
        config: Option<TransactionConfig>,
    ) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transact(ctx, AccessMode::Read, delegate, config).await
    }

    /// Run `delegate` in a write transaction, committing on success.
    pub async fn write_transaction<T, F, Fut>(
        &self,
        ctx: &Context,
        delegate: F,
        config: Option<TransactionConfig>,
    ) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transact(ctx, AccessMode::Write, delegate, config).await
    }

    /// Run `delegate` against a write batch. Buffered work is flushed before commit.
    ///
    /// On the native engine the underlying transaction is committed and
    /// reopened every `write_flush_size` writes, so a failed batch may leave a
    /// committed prefix behind.
    pub async fn batch_operation<F, Fut>(&self, ctx: &Context, delegate: F) -> Result<()>
    where
        F: FnOnce(Batch) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (_permit, tx) = self.open(ctx, AccessMode::Batch, None).await?;
        let batch = Batch::new(tx.clone(), self.driver.batch_write_size());

        let outcome = match delegate(batch.clone()).await {
            Ok(()) => batch.commit().await,
            Err(err) => Err(err),
        };
        Self::finish(&tx, outcome).await
    }

    /// Run backend-native text in its own write transaction.
    pub async fn run(&self, ctx: &Context, text: &str, parameters: &BTreeMap<String, Value>) -> Result<QueryResult> {
        let text = text.to_string();
        let parameters = parameters.clone();
        self.write_transaction(
            ctx,
            |tx| async move { tx.raw(&text, &parameters).await },
            None,
        )
        .await
    }

    /// Sync kinds, namespaces, indexes and constraints.
    pub async fn assert_schema(&self, ctx: &Context, schema: &Schema) -> Result<()> {
        ctx.run(self.driver.assert_schema(ctx, schema)).await
    }

    /// Make `graph` the fallback namespace for relational transactions.
    pub async fn set_default_graph(&self, ctx: &Context, graph: &GraphSchema) -> Result<()> {
        ctx.run(self.driver.set_default_graph(ctx, graph)).await
    }

    /// Change the records-per-bulk-statement threshold for new batches.
    pub fn set_batch_write_size(&self, size: usize) {
        self.driver.set_batch_write_size(size);
    }

    /// Change the native rotation threshold.
    pub fn set_write_flush_size(&self, size: usize) {
        self.driver.set_write_flush_size(size);
    }

    /// Close the driver. Open transactions are unaffected.
    pub async fn close(&self) -> Result<()> {
        tracing::info!(backend = %self.driver.backend(), "closing graph database");
        self.driver.close().await
    }
}
