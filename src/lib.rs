//! # graph-access
//!
//! Transactional graph access over two backends: a native property-graph
//! engine queried in Cypher, and a PostgreSQL emulation that stores nodes and
//! edges in graph-partitioned tables.
//!
//! ## Core Contract
//!
//! 1. Callers describe work once, as criteria, Cypher text, or bulk batches
//! 2. The active driver lowers it to its backend and runs it in a transaction
//! 3. Results decode into the same domain types whichever backend ran them
//!
//! ## Architecture
//!
//! ```text
//! Database ─ read/write/batch ─→ Transaction ─→ GraphTransaction (driver)
//!     │                              │                │
//!  session limiter             criteria / text     Cypher or SQL
//!                                                     │
//!                                          QueryResult + KindMapper
//! ```
//!
//! ## Guarantees
//!
//! - A delegate error rolls the transaction back; success commits it
//! - At most `max_concurrent_sessions` transactions are open at once
//! - Batch results resolve in input order, buffers flush at `batch_write_size`
//! - Kind definitions are idempotent under concurrency

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod config;
pub mod context;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod query;
pub mod types;

// Re-exports
pub use batch::{Batch, Endpoint, IdFuture};
pub use config::{DriverConfig, Neo4jConfig, PostgresConfig, QueryExecMode, ResultFormat, TransactionConfig};
pub use context::{CancelHandle, Context};
pub use engine::{AccessMode, Backend, Database, Driver, GraphTransaction, NodeQuery, RelationshipQuery, Transaction};
pub use error::{CompileError, GraphError, MappingError, ParseError, Result};
pub use mapper::{Cell, FromCell, FromRow, KindMapper, QueryResult};
pub use query::{Expr, Query, SortDirection};
pub use types::{
    Constraint, Direction, GraphSchema, Index, IndexType, Kind, Kinds, Node, NodeUpdate, Path, Properties,
    Relationship, RelationshipUpdate, Schema, Value, ID,
};

// Driver re-exports
pub use drivers::neo4j::{CypherClient, Neo4jDriver};
#[cfg(feature = "neo4j")]
pub use drivers::neo4j::Neo4jHttpClient;
pub use drivers::pg::{PgDriver, SchemaManager, SqlClient};
#[cfg(feature = "postgres")]
pub use drivers::pg::SqlxClient;
