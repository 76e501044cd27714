//! Driver and connection configuration.
//!
//! ## Environment
//!
//! Driver tuning:
//! - `GRAPH_BATCH_WRITE_SIZE`: records per bulk statement (native default: 20000, relational default: 2000)
//! - `GRAPH_WRITE_FLUSH_SIZE`: native rotation threshold (default: 5 x batch write size)
//! - `GRAPH_MAX_CONCURRENT_SESSIONS`: session limiter size (default: 50)
//! - `GRAPH_TX_TIMEOUT_SECS`: default per-transaction timeout (default: none)
//! - `GRAPH_PG_EXEC_MODE`: `cache_statement` or `simple` (default: cache_statement)
//! - `GRAPH_PG_RESULT_FORMAT`: `binary` or `text` (default: binary)
//!
//! Relational connection:
//! - `PG_CONNECTION_STRING` or `DATABASE_URL`: PostgreSQL connection string
//! - `DB_MAX_CONNECTIONS`: maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: max connection lifetime (default: 1800)
//!
//! Native connection:
//! - `NEO4J_URL`: HTTP endpoint (default: http://localhost:7474)
//! - `NEO4J_DATABASE`: database name (default: neo4j)
//! - `NEO4J_USER` / `NEO4J_PASSWORD`: basic auth credentials

use std::time::Duration;

/// Default records per bulk statement on the native engine.
pub const NATIVE_BATCH_WRITE_SIZE: usize = 20_000;

/// Default native rotation threshold.
pub const NATIVE_WRITE_FLUSH_SIZE: usize = NATIVE_BATCH_WRITE_SIZE * 5;

/// Default records per bulk statement on the relational engine.
pub const RELATIONAL_BATCH_WRITE_SIZE: usize = 2_000;

/// Default number of concurrently open sessions.
pub const DEFAULT_CONCURRENT_SESSIONS: usize = 50;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Relational statement caching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryExecMode {
    /// Prepare and cache statements per connection.
    #[default]
    CacheStatement,
    /// Send statements unprepared.
    Simple,
}

impl std::str::FromStr for QueryExecMode {
    type Err = String;

    /// Parse from the env var spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache_statement" => Ok(Self::CacheStatement),
            "simple" => Ok(Self::Simple),
            _ => Err(format!("unknown query exec mode: {s}")),
        }
    }
}

/// Relational wire encoding for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFormat {
    /// Binary protocol encoding.
    #[default]
    Binary,
    /// Text protocol encoding.
    Text,
}

impl std::str::FromStr for ResultFormat {
    type Err = String;

    /// Parse from the env var spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(Self::Binary),
            "text" => Ok(Self::Text),
            _ => Err(format!("unknown result format: {s}")),
        }
    }
}

/// Tuning shared by both backends.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Records per bulk statement and per batch buffer.
    pub batch_write_size: usize,
    /// Native rotation threshold in logical writes.
    pub write_flush_size: usize,
    /// Size of the process-wide session limiter.
    pub max_concurrent_sessions: usize,
    /// Default per-transaction timeout.
    pub transaction_timeout: Option<Duration>,
    /// Relational statement caching.
    pub query_exec_mode: QueryExecMode,
    /// Relational result encoding.
    pub result_format: ResultFormat,
}

impl DriverConfig {
    /// Defaults for the native engine.
    pub fn native() -> Self {
        Self {
            batch_write_size: NATIVE_BATCH_WRITE_SIZE,
            write_flush_size: NATIVE_WRITE_FLUSH_SIZE,
            max_concurrent_sessions: DEFAULT_CONCURRENT_SESSIONS,
            transaction_timeout: None,
            query_exec_mode: QueryExecMode::default(),
            result_format: ResultFormat::default(),
        }
    }

    /// Defaults for the relational engine.
    pub fn relational() -> Self {
        Self {
            batch_write_size: RELATIONAL_BATCH_WRITE_SIZE,
            write_flush_size: RELATIONAL_BATCH_WRITE_SIZE * 5,
            ..Self::native()
        }
    }

    /// Overlay environment settings onto `defaults`.
    pub fn from_env(defaults: DriverConfig) -> Self {
        let batch_write_size = env_parse("GRAPH_BATCH_WRITE_SIZE")
            .filter(|size: &usize| *size > 0)
            .unwrap_or(defaults.batch_write_size);

        Self {
            batch_write_size,
            write_flush_size: env_parse("GRAPH_WRITE_FLUSH_SIZE")
                .filter(|size: &usize| *size > 0)
                .unwrap_or(if batch_write_size == defaults.batch_write_size {
                    defaults.write_flush_size
                } else {
                    batch_write_size * 5
                }),
            max_concurrent_sessions: env_parse("GRAPH_MAX_CONCURRENT_SESSIONS")
                .filter(|size: &usize| *size > 0)
                .unwrap_or(defaults.max_concurrent_sessions),
            transaction_timeout: env_parse("GRAPH_TX_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .or(defaults.transaction_timeout),
            query_exec_mode: std::env::var("GRAPH_PG_EXEC_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.query_exec_mode),
            result_format: std::env::var("GRAPH_PG_RESULT_FORMAT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.result_format),
        }
    }

    /// Builder: batch write size.
    pub fn with_batch_write_size(mut self, size: usize) -> Self {
        self.batch_write_size = size.max(1);
        self
    }

    /// Builder: native rotation threshold.
    pub fn with_write_flush_size(mut self, size: usize) -> Self {
        self.write_flush_size = size.max(1);
        self
    }

    /// Builder: session limiter size.
    pub fn with_max_concurrent_sessions(mut self, sessions: usize) -> Self {
        self.max_concurrent_sessions = sessions.max(1);
        self
    }

    /// Builder: default transaction timeout.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::native()
    }
}

/// Per-call transaction options.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransactionConfig {
    /// Overrides the driver's default transaction timeout.
    pub timeout: Option<Duration>,
}

impl TransactionConfig {
    /// Options with a timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Configuration for the PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("PG_CONNECTION_STRING")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .unwrap_or_else(|_| "postgresql://localhost/graph".to_string()),
            max_connections: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
            min_connections: env_parse("DB_MIN_CONNECTIONS").unwrap_or(2),
            connect_timeout_secs: env_parse("DB_CONNECT_TIMEOUT_SECS").unwrap_or(10),
            idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT_SECS").unwrap_or(300),
            max_lifetime_secs: env_parse("DB_MAX_LIFETIME_SECS").unwrap_or(1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Configuration for the native engine's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    /// Base URL, e.g. `http://localhost:7474`.
    pub url: String,
    /// Database name.
    pub database: String,
    /// Basic auth user.
    pub user: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Request timeout in seconds (default: 120).
    pub request_timeout_secs: u64,
}

impl Neo4jConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("NEO4J_URL").unwrap_or_else(|_| "http://localhost:7474".to_string()),
            database: std::env::var("NEO4J_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),
            user: std::env::var("NEO4J_USER").ok(),
            password: std::env::var("NEO4J_PASSWORD").ok(),
            request_timeout_secs: env_parse("NEO4J_REQUEST_TIMEOUT_SECS").unwrap_or(120),
        }
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
