//! Backend drivers.
//!
//! Statement generation, batching, rotation and schema diffing live here and
//! run against small session traits ([`neo4j::CypherClient`],
//! [`pg::SqlClient`]). The network adapters behind those traits are feature
//! gated; [`mock`] provides recording implementations for tests.

pub mod mock;
pub mod neo4j;
pub mod pg;

/// Parameter keys rendered per statement log line.
const LOGGED_PARAMETER_KEYS: usize = 12;

/// Log a statement at debug level with its sorted parameter keys.
pub(crate) fn log_statement<'a>(driver: &'static str, statement: &str, keys: impl IntoIterator<Item = &'a str>) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let mut keys: Vec<&str> = keys.into_iter().collect();
    keys.sort_unstable();

    let total = keys.len();
    let mut rendered = keys
        .into_iter()
        .take(LOGGED_PARAMETER_KEYS)
        .collect::<Vec<_>>()
        .join(", ");
    if total > LOGGED_PARAMETER_KEYS {
        rendered.push_str(&format!(", ... ({total} total)"));
    }

    tracing::debug!(driver, statement, parameters = %rendered, "executing statement");
}
