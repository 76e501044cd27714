//! PostgreSQL [`SqlClient`] over a sqlx pool.
//!
//! ## Configuration
//!
//! Pool settings come from [`PostgresConfig`]:
//! - `PG_CONNECTION_STRING` / `DATABASE_URL`: connection string
//! - `DB_MAX_CONNECTIONS`: maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: acquire timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: max connection lifetime (default: 1800)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row, TypeInfo};

use super::{SqlClient, SqlRows, SqlSession};
use crate::config::{PostgresConfig, QueryExecMode};
use crate::engine::AccessMode;
use crate::error::{GraphError, Result};
use crate::mapper::Cell;
use crate::query::pgsql::{SqlArg, SqlStatement};

/// Pooled PostgreSQL client.
#[derive(Debug, Clone)]
pub struct SqlxClient {
    pool: PgPool,
    exec_mode: QueryExecMode,
}

impl SqlxClient {
    /// Connect a pool with the given configuration.
    pub async fn connect(config: &PostgresConfig, exec_mode: QueryExecMode) -> Result<Self> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await
            .map_err(|err| GraphError::Connection(err.to_string()))?;

        Ok(Self { pool, exec_mode })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, exec_mode: QueryExecMode) -> Self {
        Self { pool, exec_mode }
    }

    /// The connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SqlClient for SqlxClient {
    async fn begin(&self, mode: AccessMode) -> Result<Box<dyn SqlSession>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| GraphError::Connection(err.to_string()))?;

        if !mode.is_write() {
            sqlx::query("set transaction read only")
                .execute(&mut *tx)
                .await
                .map_err(|err| GraphError::Connection(err.to_string()))?;
        }

        Ok(Box::new(SqlxSession {
            tx,
            persistent: self.exec_mode == QueryExecMode::CacheStatement,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

struct SqlxSession {
    tx: sqlx::Transaction<'static, Postgres>,
    persistent: bool,
}

fn bind<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    arg: &SqlArg,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match arg.clone() {
        SqlArg::Null => query.bind(None::<String>),
        SqlArg::Bool(value) => query.bind(value),
        SqlArg::Int2(value) => query.bind(value),
        SqlArg::Int4(value) => query.bind(value),
        SqlArg::Int8(value) => query.bind(value),
        SqlArg::Float8(value) => query.bind(value),
        SqlArg::Text(value) => query.bind(value),
        SqlArg::Timestamp(value) => query.bind(value),
        SqlArg::Jsonb(value) => query.bind(sqlx::types::Json(value)),
        SqlArg::Int2Array(values) => query.bind(values),
        SqlArg::Int8Array(values) => query.bind(values),
        SqlArg::TextArray(values) => query.bind(values),
        SqlArg::JsonbArray(values) => query.bind(values),
    }
}

fn decode<T>(row: &PgRow, index: usize, map: impl Fn(T) -> Cell) -> std::result::Result<Cell, sqlx::Error>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    Ok(row.try_get::<Option<T>, _>(index)?.map_or(Cell::Null, map))
}

fn decode_row(row: &PgRow) -> std::result::Result<Vec<Cell>, sqlx::Error> {
    let mut cells = Vec::with_capacity(row.columns().len());

    for (index, column) in row.columns().iter().enumerate() {
        let cell = match column.type_info().name() {
            "BOOL" => decode(row, index, Cell::Bool)?,
            "INT2" => decode(row, index, |value: i16| Cell::Int(value.into()))?,
            "INT4" => decode(row, index, |value: i32| Cell::Int(value.into()))?,
            "INT8" => decode(row, index, Cell::Int)?,
            "FLOAT4" => decode(row, index, |value: f32| Cell::Float(value.into()))?,
            "FLOAT8" => decode(row, index, Cell::Float)?,
            "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" => decode(row, index, Cell::String)?,
            "JSON" | "JSONB" => decode(row, index, Cell::from_json)?,
            "TIMESTAMPTZ" => decode(row, index, Cell::DateTime)?,
            "TIMESTAMP" => decode(row, index, |value: NaiveDateTime| {
                Cell::DateTime(DateTime::<Utc>::from_naive_utc_and_offset(value, Utc))
            })?,
            "INT2[]" => decode(row, index, |values: Vec<i16>| {
                Cell::List(values.into_iter().map(|value| Cell::Int(value.into())).collect())
            })?,
            "INT4[]" => decode(row, index, |values: Vec<i32>| {
                Cell::List(values.into_iter().map(|value| Cell::Int(value.into())).collect())
            })?,
            "INT8[]" => decode(row, index, |values: Vec<i64>| {
                Cell::List(values.into_iter().map(Cell::Int).collect())
            })?,
            "TEXT[]" => decode(row, index, |values: Vec<String>| {
                Cell::List(values.into_iter().map(Cell::String).collect())
            })?,
            "JSONB[]" => decode(row, index, |values: Vec<serde_json::Value>| {
                Cell::List(values.into_iter().map(Cell::from_json).collect())
            })?,
            other => {
                tracing::debug!(column = column.name(), type_name = other, "Undecodable column type, returning null");
                Cell::Null
            }
        };
        cells.push(cell);
    }

    Ok(cells)
}

#[async_trait]
impl SqlSession for SqlxSession {
    async fn query(&mut self, statement: &SqlStatement) -> Result<SqlRows> {
        let failed = |err: sqlx::Error| GraphError::query(statement.sql.clone(), statement.parameter_keys(), err);

        let query = statement
            .args
            .iter()
            .fold(sqlx::query(&statement.sql), bind)
            .persistent(self.persistent);

        let rows = query.fetch_all(&mut *self.tx).await.map_err(failed)?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|column| column.name().to_string()).collect())
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(failed)?;

        Ok(SqlRows { columns, rows })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|err| GraphError::Connection(err.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|err| GraphError::Connection(err.to_string()))
    }
}
