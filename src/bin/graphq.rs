//! graphq: run graph queries against either backend from the shell.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PG_CONNECTION_STRING`: PostgreSQL connection string (relational backend)
//! - `NEO4J_URL`, `NEO4J_DATABASE`, `NEO4J_USER`, `NEO4J_PASSWORD`: native backend
//! - `GRAPH_BATCH_WRITE_SIZE`, `GRAPH_WRITE_FLUSH_SIZE`, `GRAPH_MAX_CONCURRENT_SESSIONS`: driver tuning
//! - `RUST_LOG`: Log level filter (default: graph_access=info,sqlx=warn)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! graphq --backend pg --graph default query "match (n:User) where n.name = \$name return n" -p name=alice
//! graphq --backend neo4j run "match (n) return count(n)"
//! graphq --backend pg kinds
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use graph_access::{
    Context, Database, DriverConfig, Driver, GraphSchema, Neo4jConfig, Neo4jDriver, Neo4jHttpClient, PgDriver,
    PostgresConfig, QueryResult, SqlxClient, Value,
};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "graph_access=info,sqlx=warn".into());

    if log_format == "pretty" {
        // Pretty format for local development
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    /// PostgreSQL graph emulation
    Pg,
    /// Native Cypher engine
    Neo4j,
}

#[derive(Debug, Parser)]
#[command(name = "graphq", version, about = "Run graph queries against either backend")]
struct Cli {
    /// Backend to connect to
    #[arg(long, value_enum, default_value = "pg")]
    backend: BackendArg,

    /// Graph namespace to target (relational backend)
    #[arg(long, default_value = "default")]
    graph: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run Cypher text in a read transaction
    Query {
        /// Query text
        text: String,
        /// Parameters as key=value; values are parsed as JSON, falling back to strings
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// Run backend-native text in a write transaction
    Run {
        /// Statement text
        text: String,
        /// Parameters as key=value
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// List the relational kind table
    Kinds,
}

fn parse_params(params: &[String]) -> Result<BTreeMap<String, Value>, String> {
    params
        .iter()
        .map(|param| {
            let (key, raw) = param
                .split_once('=')
                .ok_or_else(|| format!("parameter {param} is not key=value"))?;
            let value = serde_json::from_str(raw)
                .map(Value::from_json)
                .unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

fn print_rows(result: &QueryResult) {
    for row in result.rows() {
        println!("{}", row.to_json());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    info!(version = env!("CARGO_PKG_VERSION"), backend = ?cli.backend, "Starting graphq");

    let ctx = Context::background();
    let (driver, config): (Arc<dyn Driver>, DriverConfig) = match cli.backend {
        BackendArg::Pg => {
            let config = DriverConfig::from_env(DriverConfig::relational());
            let client = SqlxClient::connect(&PostgresConfig::from_env(), config.query_exec_mode).await?;
            let driver = Arc::new(PgDriver::new(Arc::new(client), &config));
            driver.set_default_graph(&ctx, &GraphSchema::named(cli.graph.clone())).await?;
            (driver, config)
        }
        BackendArg::Neo4j => {
            let config = DriverConfig::from_env(DriverConfig::native());
            let client = Neo4jHttpClient::new(&Neo4jConfig::from_env())?;
            (Arc::new(Neo4jDriver::new(Arc::new(client), &config)), config)
        }
    };
    let db = Database::new(driver.clone(), config);

    match cli.command {
        Command::Query { text, params } => {
            let params = parse_params(&params)?;
            let result = db
                .read_transaction(&ctx, |tx| async move { tx.query(&text, &params).await }, None)
                .await?;
            print_rows(&result);
        }
        Command::Run { text, params } => {
            let params = parse_params(&params)?;
            print_rows(&db.run(&ctx, &text, &params).await?);
        }
        Command::Kinds => {
            let BackendArg::Pg = cli.backend else {
                return Err("the native engine has no kind table".into());
            };
            let result = db
                .read_transaction(
                    &ctx,
                    |tx| async move { tx.raw("select id, name from kind order by id", &BTreeMap::new()).await },
                    None,
                )
                .await?;
            print_rows(&result);
        }
    }

    db.close().await?;
    Ok(())
}
