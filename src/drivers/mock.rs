//! Scripted backend clients for tests and offline runs.
//!
//! Both clients journal every statement and count session lifecycle calls.
//! They keep just enough state to behave like a real backend for the
//! statements the drivers issue themselves: id allocation, kind and graph
//! definitions, index listing and DDL. Anything else returns no rows unless
//! a responder is installed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex_lite::Regex;

use super::neo4j::{CypherClient, CypherRows, CypherTx};
use super::pg::{SqlClient, SqlRows, SqlSession};
use crate::engine::AccessMode;
use crate::error::Result;
use crate::mapper::Cell;
use crate::query::cypher::Statement;
use crate::query::pgsql::{SqlArg, SqlStatement};
use crate::types::Value;

/// Custom answer for a native statement; `None` falls through to the default.
pub type CypherResponder = Arc<dyn Fn(&Statement) -> Option<Result<CypherRows>> + Send + Sync>;

/// Custom answer for a relational statement; `None` falls through to the default.
pub type SqlResponder = Arc<dyn Fn(&SqlStatement) -> Option<Result<SqlRows>> + Send + Sync>;

/// Session lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounts {
    /// Sessions opened.
    pub begins: usize,
    /// Sessions committed.
    pub commits: usize,
    /// Sessions rolled back.
    pub rollbacks: usize,
}

fn rows(columns: &[&str], rows: Vec<Vec<Cell>>) -> SqlRows {
    SqlRows {
        columns: columns.iter().map(|column| column.to_string()).collect(),
        rows,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Native engine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CypherState {
    statements: Vec<Statement>,
    counts: SessionCounts,
    next_id: i64,
    indexes: BTreeMap<String, Vec<Cell>>,
}

impl CypherState {
    fn respond(&mut self, statement: &Statement) -> CypherRows {
        let text = statement.text.as_str();

        if text.starts_with("show indexes") {
            return CypherRows {
                columns: ["name", "type", "entityType", "labelsOrTypes", "properties", "owningConstraint"]
                    .iter()
                    .map(|column| column.to_string())
                    .collect(),
                rows: self.indexes.values().cloned().collect(),
            };
        }

        if let Some(name) = text
            .strip_prefix("drop index ")
            .or_else(|| text.strip_prefix("drop constraint "))
            .and_then(|rest| rest.split_whitespace().next())
        {
            self.indexes.remove(name);
            return CypherRows::default();
        }

        if text.starts_with("create ") {
            if let Some((name, row)) = native_index_row(text) {
                self.indexes.insert(name, row);
            }
            return CypherRows::default();
        }

        if text.contains("unwind $p") && text.contains("return id(") {
            let count = match statement.parameters.get("p") {
                Some(Value::List(items)) => items.len(),
                _ => 0,
            };
            let ids = (0..count)
                .map(|_| {
                    self.next_id += 1;
                    vec![Cell::Int(self.next_id)]
                })
                .collect();
            return CypherRows {
                columns: vec!["id".to_string()],
                rows: ids,
            };
        }

        CypherRows::default()
    }
}

/// `show indexes` row for native index or constraint DDL.
fn native_index_row(text: &str) -> Option<(String, Vec<Cell>)> {
    let index = Regex::new(r"^create (range|text) index (\S+) if not exists for (?:\(n:([^)]+)\)|\(\)-\[n:([^\]]+)\]-\(\)) on \(n\.(\S+)\)$").ok()?;
    let constraint = Regex::new(r"^create constraint (\S+) if not exists for (?:\(n:([^)]+)\)|\(\)-\[n:([^\]]+)\]-\(\)) require n\.(\S+) is unique$").ok()?;

    let strip = |value: &str| value.trim_matches('`').to_string();
    let entity = |node: Option<regex_lite::Match<'_>>| if node.is_some() { "NODE" } else { "RELATIONSHIP" };

    if let Some(captures) = index.captures(text) {
        let name = captures[2].to_string();
        let kind = captures.get(3).or_else(|| captures.get(4))?.as_str();
        let row = vec![
            Cell::String(name.clone()),
            Cell::String(captures[1].to_uppercase()),
            Cell::String(entity(captures.get(3)).to_string()),
            Cell::List(vec![Cell::String(strip(kind))]),
            Cell::List(vec![Cell::String(strip(&captures[5]))]),
            Cell::Null,
        ];
        return Some((name, row));
    }

    let captures = constraint.captures(text)?;
    let name = captures[1].to_string();
    let kind = captures.get(2).or_else(|| captures.get(3))?.as_str();
    let row = vec![
        Cell::String(format!("{name}_backing")),
        Cell::String("RANGE".to_string()),
        Cell::String(entity(captures.get(2)).to_string()),
        Cell::List(vec![Cell::String(strip(kind))]),
        Cell::List(vec![Cell::String(strip(&captures[4]))]),
        Cell::String(name.clone()),
    ];
    Some((name, row))
}

/// Scripted [`CypherClient`].
#[derive(Clone, Default)]
pub struct MockCypherClient {
    state: Arc<Mutex<CypherState>>,
    responder: Option<CypherResponder>,
}

impl std::fmt::Debug for MockCypherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCypherClient").field("counts", &self.counts()).finish()
    }
}

impl MockCypherClient {
    /// Client answering with the default behaviour only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client consulting `responder` before the default behaviour.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Statement) -> Option<Result<CypherRows>> + Send + Sync + 'static,
    {
        Self {
            state: Arc::default(),
            responder: Some(Arc::new(responder)),
        }
    }

    /// Every statement run so far, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().statements.clone()
    }

    /// Session lifecycle counters.
    pub fn counts(&self) -> SessionCounts {
        self.state.lock().counts
    }

    /// Forget journalled statements.
    pub fn clear_statements(&self) {
        self.state.lock().statements.clear();
    }
}

#[async_trait]
impl CypherClient for MockCypherClient {
    async fn begin(&self, _mode: AccessMode) -> Result<Box<dyn CypherTx>> {
        self.state.lock().counts.begins += 1;
        Ok(Box::new(MockCypherTx { client: self.clone() }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct MockCypherTx {
    client: MockCypherClient,
}

#[async_trait]
impl CypherTx for MockCypherTx {
    async fn run(&mut self, statement: &Statement) -> Result<CypherRows> {
        self.client.state.lock().statements.push(statement.clone());

        if let Some(answer) = self.client.responder.as_ref().and_then(|responder| responder(statement)) {
            return answer;
        }
        Ok(self.client.state.lock().respond(statement))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.client.state.lock().counts.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client.state.lock().counts.rollbacks += 1;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relational engine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SqlState {
    statements: Vec<SqlStatement>,
    counts: SessionCounts,
    kinds: Vec<String>,
    graphs: Vec<String>,
    sequences: HashMap<String, i64>,
    indexes: BTreeMap<String, (String, String)>,
}

impl SqlState {
    fn next(&mut self, sequence: &str) -> i64 {
        let value = self.sequences.entry(sequence.to_string()).or_insert(0);
        *value += 1;
        *value
    }

    fn kind_id(&mut self, name: &str) -> i64 {
        match self.kinds.iter().position(|kind| kind == name) {
            Some(position) => position as i64 + 1,
            None => {
                self.kinds.push(name.to_string());
                self.kinds.len() as i64
            }
        }
    }

    fn graph_id(&mut self, name: &str) -> i64 {
        match self.graphs.iter().position(|graph| graph == name) {
            Some(position) => position as i64 + 1,
            None => {
                self.graphs.push(name.to_string());
                self.graphs.len() as i64
            }
        }
    }

    fn respond(&mut self, statement: &SqlStatement) -> SqlRows {
        let sql = statement.sql.as_str();

        if sql == "select id, name from kind" {
            let kinds = self
                .kinds
                .iter()
                .enumerate()
                .map(|(position, name)| vec![Cell::Int(position as i64 + 1), Cell::String(name.clone())])
                .collect();
            return rows(&["id", "name"], kinds);
        }

        if sql.starts_with("insert into kind") {
            let Some(SqlArg::TextArray(names)) = statement.args.first() else {
                return SqlRows::default();
            };
            let defined = names
                .iter()
                .map(|name| vec![Cell::Int(self.kind_id(name)), Cell::String(name.clone())])
                .collect();
            return rows(&["id", "name"], defined);
        }

        if sql.starts_with("insert into graph") {
            let Some(SqlArg::Text(name)) = statement.args.first() else {
                return SqlRows::default();
            };
            let id = self.graph_id(name);
            return rows(&["id"], vec![vec![Cell::Int(id)]]);
        }

        if sql.starts_with("select nextval(") {
            let sequence = if sql.contains("edge_id_seq") { "edge_id_seq" } else { "node_id_seq" };
            let count = match statement.args.first() {
                Some(SqlArg::Int4(count)) => *count as usize,
                _ => 0,
            };
            let ids = (0..count).map(|_| vec![Cell::Int(self.next(sequence))]).collect();
            return rows(&["nextval"], ids);
        }

        if sql.starts_with("with payload") {
            let sequence = if sql.contains("join edge") { "edge_id_seq" } else { "node_id_seq" };
            let count = statement
                .args
                .iter()
                .find_map(|arg| match arg {
                    SqlArg::JsonbArray(payloads) => Some(payloads.len()),
                    _ => None,
                })
                .unwrap_or(0);
            let merged = (1..=count)
                .map(|position| vec![Cell::Int(position as i64), Cell::Int(self.next(sequence))])
                .collect();
            return rows(&["o", "id"], merged);
        }

        if sql.starts_with("select indexdef from pg_indexes") {
            let Some(SqlArg::Text(table)) = statement.args.first() else {
                return SqlRows::default();
            };
            let definitions = self
                .indexes
                .values()
                .filter(|(owner, _)| owner == table)
                .map(|(_, definition)| vec![Cell::String(definition.clone())])
                .collect();
            return rows(&["indexdef"], definitions);
        }

        if let Some(name) = sql.strip_prefix("drop index if exists ") {
            self.indexes.remove(name.trim());
            return SqlRows::default();
        }

        if sql.starts_with("create index") || sql.starts_with("create unique index") {
            let Ok(pattern) = Regex::new(r"^create (?:unique )?index (?:if not exists )?(\S+) on (\S+)") else {
                return SqlRows::default();
            };
            if let Some(captures) = pattern.captures(sql) {
                self.indexes
                    .entry(captures[1].to_string())
                    .or_insert_with(|| (captures[2].to_string(), sql.to_string()));
            }
        }

        SqlRows::default()
    }
}

/// Scripted [`SqlClient`].
#[derive(Clone, Default)]
pub struct MockSqlClient {
    state: Arc<Mutex<SqlState>>,
    responder: Option<SqlResponder>,
}

impl std::fmt::Debug for MockSqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSqlClient").field("counts", &self.counts()).finish()
    }
}

impl MockSqlClient {
    /// Client answering with the default behaviour only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client consulting `responder` before the default behaviour.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&SqlStatement) -> Option<Result<SqlRows>> + Send + Sync + 'static,
    {
        Self {
            state: Arc::default(),
            responder: Some(Arc::new(responder)),
        }
    }

    /// Every statement run so far, in order.
    pub fn statements(&self) -> Vec<SqlStatement> {
        self.state.lock().statements.clone()
    }

    /// Statements whose SQL starts with `prefix`.
    pub fn statements_starting_with(&self, prefix: &str) -> Vec<SqlStatement> {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|statement| statement.sql.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Session lifecycle counters.
    pub fn counts(&self) -> SessionCounts {
        self.state.lock().counts
    }

    /// Forget journalled statements.
    pub fn clear_statements(&self) {
        self.state.lock().statements.clear();
    }
}

#[async_trait]
impl SqlClient for MockSqlClient {
    async fn begin(&self, _mode: AccessMode) -> Result<Box<dyn SqlSession>> {
        self.state.lock().counts.begins += 1;
        Ok(Box::new(MockSqlSession { client: self.clone() }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct MockSqlSession {
    client: MockSqlClient,
}

#[async_trait]
impl SqlSession for MockSqlSession {
    async fn query(&mut self, statement: &SqlStatement) -> Result<SqlRows> {
        self.client.state.lock().statements.push(statement.clone());

        if let Some(answer) = self.client.responder.as_ref().and_then(|responder| responder(statement)) {
            return answer;
        }
        Ok(self.client.state.lock().respond(statement))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.client.state.lock().counts.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client.state.lock().counts.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_index_rows_follow_ddl() {
        let mut state = CypherState::default();
        state.respond(&Statement::new(
            "create text index user_name_index if not exists for (n:User) on (n.name)",
            BTreeMap::new(),
        ));
        state.respond(&Statement::new(
            "create constraint user_objectid_constraint if not exists for (n:User) require n.objectid is unique",
            BTreeMap::new(),
        ));

        let listing = state.respond(&Statement::new("show indexes yield name", BTreeMap::new()));
        assert_eq!(listing.rows.len(), 2);

        state.respond(&Statement::new("drop index user_name_index if exists", BTreeMap::new()));
        let listing = state.respond(&Statement::new("show indexes yield name", BTreeMap::new()));
        assert_eq!(listing.rows.len(), 1);
        assert_eq!(listing.rows[0][5], Cell::String("user_objectid_constraint".into()));
    }

    #[test]
    fn test_kind_definitions_are_stable() {
        let mut state = SqlState::default();
        let define = SqlStatement::new(
            "insert into kind (name) select unnest($1::text[])",
            vec![SqlArg::TextArray(vec!["User".into(), "Group".into()])],
        );

        let first = state.respond(&define);
        let second = state.respond(&define);
        assert_eq!(first, second);
        assert_eq!(first.rows[1], vec![Cell::Int(2), Cell::String("Group".into())]);
    }
}
