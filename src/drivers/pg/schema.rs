//! Kind table, graph partitions and property index sync.
//!
//! Kinds and graphs are cached in-process and defined on demand. Readers take
//! the shared lock only; a miss serializes on the definer lock, re-checks,
//! and defines the missing entries in its own committed session so the codes
//! stay valid whatever happens to the caller's transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use regex_lite::Regex;
use tokio::sync::{Mutex, OnceCell};

use super::{run, SqlClient, SqlRows, SqlSession};
use crate::context::Context;
use crate::engine::AccessMode;
use crate::error::{GraphError, Result};
use crate::mapper::{Cell, KindMapper};
use crate::query::pgsql::{sql_string, SqlArg, SqlStatement};
use crate::types::{Constraint, GraphSchema, Index, IndexType, Kind, Kinds, Schema};

/// Tables and extensions every graph relies on.
pub const SCHEMA_UP: &[&str] = &[
    "create extension if not exists intarray",
    "create extension if not exists pg_trgm",
    "create table if not exists graph (id serial not null, name varchar(256) not null, primary key (id), unique (name))",
    "create table if not exists kind (id smallserial not null, name varchar(256) not null, primary key (id), unique (name))",
    "create table if not exists node (id bigserial not null, graph_id integer not null, kind_ids int2[] not null, properties jsonb not null, primary key (id, graph_id), foreign key (graph_id) references graph (id) on delete cascade) partition by list (graph_id)",
    "create table if not exists edge (id bigserial not null, graph_id integer not null, start_id bigint not null, end_id bigint not null, kind_id int2 not null, properties jsonb not null, primary key (id, graph_id), foreign key (graph_id) references graph (id) on delete cascade) partition by list (graph_id)",
];

const SELECT_KINDS: &str = "select id, name from kind";
const DEFINE_KINDS: &str =
    "insert into kind (name) select unnest($1::text[]) on conflict (name) do update set name = excluded.name returning id, name";
const DEFINE_GRAPH: &str = "insert into graph (name) values ($1) on conflict (name) do update set name = $1 returning id";
const SELECT_INDEXES: &str = "select indexdef from pg_indexes where schemaname = current_schema() and tablename = $1";

const INDEX_DEFINITION: &str =
    r"(?i)^create (unique )?index (?:if not exists )?(\S+) on (\S+) using (\w+) \(+properties ->> '([^']+)'";

#[derive(Debug, Default)]
struct KindTable {
    by_id: HashMap<i16, Kind>,
    by_kind: HashMap<Kind, i16>,
}

impl KindTable {
    fn insert(&mut self, id: i16, kind: Kind) {
        self.by_kind.insert(kind.clone(), id);
        self.by_id.insert(id, kind);
    }
}

/// A property index on one partition, present or desired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyIndex {
    /// Indexed property.
    pub field: String,
    /// Access method.
    pub index_type: IndexType,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl PropertyIndex {
    fn create(&self, name: &str, table: &str) -> String {
        let field = sql_string(&self.field);
        match (self.unique, self.index_type) {
            (true, _) => format!("create unique index {name} on {table} using btree ((properties ->> {field}))"),
            (false, IndexType::BTree) => format!("create index {name} on {table} using btree ((properties ->> {field}))"),
            (false, IndexType::TextSearch) => {
                format!("create index {name} on {table} using gin ((properties ->> {field}) gin_trgm_ops)")
            }
        }
    }
}

/// Parse the property indexes out of `pg_indexes.indexdef` rows.
///
/// Definitions that are not a single `properties ->> 'field'` expression
/// (primary keys, endpoint indexes) are ignored.
pub fn parse_index_definitions<'a>(definitions: impl IntoIterator<Item = &'a str>) -> Result<BTreeMap<String, PropertyIndex>> {
    let pattern = index_pattern()?;
    let mut indexes = BTreeMap::new();

    for definition in definitions {
        let Some(captures) = pattern.captures(definition) else {
            continue;
        };

        let index_type = match captures[4].to_lowercase().as_str() {
            "gin" => IndexType::TextSearch,
            _ => IndexType::BTree,
        };
        indexes.insert(
            captures[2].to_string(),
            PropertyIndex {
                field: captures[5].to_string(),
                index_type,
                unique: captures.get(1).is_some(),
            },
        );
    }

    Ok(indexes)
}

fn index_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, String>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(INDEX_DEFINITION).map_err(|err| err.to_string()))
        .as_ref()
        .map_err(|reason| GraphError::schema("pg_indexes", reason))
}

fn index_name(table: &str, index: &Index, suffix: &str) -> String {
    let name = if index.name.is_empty() {
        let flavour = match index.index_type {
            IndexType::BTree => "btree",
            IndexType::TextSearch => "gin",
        };
        format!("{table}_{}_{flavour}_{suffix}", index.field)
    } else {
        format!("{table}_{}", index.name)
    };
    name.to_lowercase()
}

/// Property indexes `graph` wants on the partition `table`.
pub fn desired_indexes(table: &str, indexes: &[Index], constraints: &[Constraint]) -> BTreeMap<String, PropertyIndex> {
    let mut desired = BTreeMap::new();

    for index in indexes {
        desired.insert(
            index_name(table, index, "index"),
            PropertyIndex {
                field: index.field.clone(),
                index_type: index.index_type,
                unique: false,
            },
        );
    }

    for constraint in constraints {
        let name = if constraint.name.is_empty() {
            format!("{table}_{}_constraint", constraint.field).to_lowercase()
        } else {
            format!("{table}_{}", constraint.name).to_lowercase()
        };
        desired.insert(
            name,
            PropertyIndex {
                field: constraint.field.clone(),
                index_type: IndexType::BTree,
                unique: true,
            },
        );
    }

    desired
}

/// DDL turning `present` into `desired` on `table`.
pub fn plan_indexes(
    table: &str,
    present: &BTreeMap<String, PropertyIndex>,
    desired: &BTreeMap<String, PropertyIndex>,
) -> Vec<String> {
    let mut statements = Vec::new();

    for (name, index) in present {
        if desired.get(name) != Some(index) {
            statements.push(format!("drop index if exists {name}"));
        }
    }

    for (name, index) in desired {
        if present.get(name) != Some(index) {
            statements.push(index.create(name, table));
        }
    }

    statements
}

fn partition_ddl(graph_id: i32) -> Vec<String> {
    vec![
        format!("create table if not exists node_{graph_id} partition of node for values in ({graph_id})"),
        format!("create table if not exists edge_{graph_id} partition of edge for values in ({graph_id})"),
        format!("create index if not exists node_{graph_id}_kind_ids_index on node_{graph_id} using gin (kind_ids)"),
        format!("create index if not exists edge_{graph_id}_start_id_index on edge_{graph_id} using btree (start_id)"),
        format!("create index if not exists edge_{graph_id}_end_id_index on edge_{graph_id} using btree (end_id)"),
        format!("create index if not exists edge_{graph_id}_kind_id_index on edge_{graph_id} using btree (kind_id)"),
    ]
}

fn int_cell(cell: Option<&Cell>, target: &str) -> Result<i64> {
    match cell {
        Some(Cell::Int(value)) => Ok(*value),
        other => Err(GraphError::schema(target, format!("expected an integer id, got {other:?}"))),
    }
}

fn string_cell(cell: Option<&Cell>, target: &str) -> Result<String> {
    match cell {
        Some(Cell::String(value)) => Ok(value.clone()),
        other => Err(GraphError::schema(target, format!("expected a name, got {other:?}"))),
    }
}

fn kind_rows(rows: &SqlRows) -> Result<Vec<(i16, Kind)>> {
    rows.rows
        .iter()
        .map(|row| {
            let id = int_cell(row.first(), "kind")?;
            let id = i16::try_from(id).map_err(|_| GraphError::schema("kind", format!("kind id {id} out of range")))?;
            Ok((id, Kind::new(string_cell(row.get(1), "kind")?)))
        })
        .collect()
}

/// Relational kind and namespace manager. Doubles as the [`KindMapper`] for
/// every relational result.
pub struct SchemaManager {
    client: Arc<dyn SqlClient>,
    kinds: RwLock<KindTable>,
    graphs: RwLock<HashMap<String, i32>>,
    default_graph: RwLock<Option<i32>>,
    definer: Mutex<()>,
    ready: OnceCell<()>,
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("kinds", &self.kinds.read().by_id.len())
            .field("graphs", &*self.graphs.read())
            .field("default_graph", &*self.default_graph.read())
            .finish()
    }
}

impl KindMapper for SchemaManager {
    fn kind_for_id(&self, id: i16) -> Option<Kind> {
        self.kinds.read().by_id.get(&id).cloned()
    }

    fn id_for_kind(&self, kind: &Kind) -> Option<i16> {
        self.kinds.read().by_kind.get(kind).copied()
    }
}

impl SchemaManager {
    /// Manager defining through `client`.
    pub fn new(client: Arc<dyn SqlClient>) -> Self {
        Self {
            client,
            kinds: RwLock::new(KindTable::default()),
            graphs: RwLock::new(HashMap::new()),
            default_graph: RwLock::new(None),
            definer: Mutex::new(()),
            ready: OnceCell::new(),
        }
    }

    /// Create the base tables and load the kind table. Runs once per manager.
    pub async fn init(&self, ctx: &Context) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                tracing::info!("Initializing relational graph schema");

                let statements: Vec<SqlStatement> = SCHEMA_UP
                    .iter()
                    .map(|sql| SqlStatement::new(*sql, Vec::new()))
                    .chain(std::iter::once(SqlStatement::new(SELECT_KINDS, Vec::new())))
                    .collect();
                let mut results = self.apply(ctx, &statements).await?;

                let loaded = match results.pop() {
                    Some(rows) => kind_rows(&rows)?,
                    None => Vec::new(),
                };
                tracing::info!(kinds = loaded.len(), "Loaded kind table");

                let mut table = self.kinds.write();
                for (id, kind) in loaded {
                    table.insert(id, kind);
                }
                Ok::<(), GraphError>(())
            })
            .await
            .map(|_| ())
    }

    /// Run `statements` in one committed session of their own.
    async fn apply(&self, ctx: &Context, statements: &[SqlStatement]) -> Result<Vec<SqlRows>> {
        let mut session = ctx.run(self.client.begin(AccessMode::Write)).await?;

        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            match ctx.run(run(session.as_mut(), statement)).await {
                Ok(rows) => results.push(rows),
                Err(err) => {
                    rollback_quietly(session).await;
                    return Err(err);
                }
            }
        }

        ctx.run(session.commit()).await?;
        Ok(results)
    }

    fn missing_kinds(&self, kinds: &Kinds) -> Vec<Kind> {
        let table = self.kinds.read();
        kinds
            .iter()
            .filter(|kind| !table.by_kind.contains_key(*kind))
            .cloned()
            .collect()
    }

    /// Codes for `kinds`, defining any that do not exist yet.
    ///
    /// Concurrent callers asserting the same new kind issue one definition.
    pub async fn assert_kinds(&self, ctx: &Context, kinds: &Kinds) -> Result<Vec<i16>> {
        if let Ok(codes) = self.map_kinds(kinds) {
            return Ok(codes);
        }

        let _definer = self.definer.lock().await;
        let missing = self.missing_kinds(kinds);
        if !missing.is_empty() {
            let names = missing.iter().map(|kind| kind.as_str().to_string()).collect();
            let statement = SqlStatement::new(DEFINE_KINDS, vec![SqlArg::TextArray(names)]);
            let results = self.apply(ctx, std::slice::from_ref(&statement)).await?;
            let defined = match results.first() {
                Some(rows) => kind_rows(rows)?,
                None => Vec::new(),
            };

            tracing::info!(kinds = ?missing, "Defined new kinds");
            let mut table = self.kinds.write();
            for (id, kind) in defined {
                table.insert(id, kind);
            }
        }

        Ok(self.map_kinds(kinds)?)
    }

    /// Id of the graph named `name`, if it has been asserted.
    pub fn graph_id(&self, name: &str) -> Option<i32> {
        self.graphs.read().get(name).copied()
    }

    /// Define `graph` and its partitions if needed, returning its id.
    pub async fn assert_graph(&self, ctx: &Context, graph: &GraphSchema) -> Result<i32> {
        self.init(ctx).await?;
        let kinds = graph.nodes.concatenate(&graph.edges);
        self.assert_kinds(ctx, &kinds).await?;

        if let Some(id) = self.graph_id(&graph.name) {
            return Ok(id);
        }

        let _definer = self.definer.lock().await;
        if let Some(id) = self.graph_id(&graph.name) {
            return Ok(id);
        }

        let mut session = ctx.run(self.client.begin(AccessMode::Write)).await?;
        let defined = self.define_graph(ctx, session.as_mut(), &graph.name).await;
        let id = match defined {
            Ok(id) => id,
            Err(err) => {
                rollback_quietly(session).await;
                return Err(err);
            }
        };
        ctx.run(session.commit()).await?;

        tracing::info!(graph = %graph.name, graph_id = id, "Defined graph partitions");
        self.graphs.write().insert(graph.name.clone(), id);
        Ok(id)
    }

    async fn define_graph(&self, ctx: &Context, session: &mut dyn SqlSession, name: &str) -> Result<i32> {
        let statement = SqlStatement::new(DEFINE_GRAPH, vec![SqlArg::Text(name.to_string())]);
        let rows = ctx.run(run(session, &statement)).await?;
        let id = int_cell(rows.rows.first().and_then(|row| row.first()), "graph")?;
        let id = i32::try_from(id).map_err(|_| GraphError::schema("graph", format!("graph id {id} out of range")))?;

        for sql in partition_ddl(id) {
            ctx.run(run(session, &SqlStatement::new(sql, Vec::new()))).await?;
        }
        Ok(id)
    }

    async fn present_indexes(&self, ctx: &Context, table: &str) -> Result<BTreeMap<String, PropertyIndex>> {
        let statement = SqlStatement::new(SELECT_INDEXES, vec![SqlArg::Text(table.to_string())]);
        let results = self.apply(ctx, std::slice::from_ref(&statement)).await?;

        let definitions: Vec<String> = results
            .iter()
            .flat_map(|rows| rows.rows.iter())
            .filter_map(|row| match row.first() {
                Some(Cell::String(definition)) => Some(definition.clone()),
                _ => None,
            })
            .collect();
        parse_index_definitions(definitions.iter().map(String::as_str))
    }

    async fn sync_indexes(&self, ctx: &Context, graph: &GraphSchema, graph_id: i32) -> Result<()> {
        let sides = [
            (format!("node_{graph_id}"), &graph.node_indexes, &graph.node_constraints),
            (format!("edge_{graph_id}"), &graph.edge_indexes, &graph.edge_constraints),
        ];

        for (table, indexes, constraints) in sides {
            let present = self.present_indexes(ctx, &table).await?;
            let plan = plan_indexes(&table, &present, &desired_indexes(&table, indexes, constraints));
            if plan.is_empty() {
                continue;
            }

            for sql in &plan {
                tracing::info!(driver = "pg", statement = %sql, "Applying schema change");
            }
            let statements: Vec<SqlStatement> = plan.iter().map(|sql| SqlStatement::new(sql.clone(), Vec::new())).collect();
            self.apply(ctx, &statements)
                .await
                .map_err(|err| GraphError::schema(table.clone(), err))?;
        }

        Ok(())
    }

    /// Define every kind and graph in `schema` and sync partition indexes.
    /// An unchanged schema issues no DDL.
    pub async fn assert_schema(&self, ctx: &Context, schema: &Schema) -> Result<()> {
        self.init(ctx).await?;

        let mut seen = std::collections::HashSet::new();
        for graph in schema.graphs.iter().chain(schema.default_graph.iter()) {
            if !seen.insert(graph.name.as_str()) {
                continue;
            }
            let graph_id = self.assert_graph(ctx, graph).await?;
            self.sync_indexes(ctx, graph, graph_id).await?;
        }

        if let Some(default_graph) = &schema.default_graph {
            if let Some(id) = self.graph_id(&default_graph.name) {
                self.set_default_graph(id);
            }
        }
        Ok(())
    }

    /// Graph id used when a transaction names no target.
    pub fn default_graph(&self) -> Option<i32> {
        *self.default_graph.read()
    }

    /// Set the fallback graph id.
    pub fn set_default_graph(&self, graph_id: i32) {
        *self.default_graph.write() = Some(graph_id);
    }

    /// Known kinds ordered by code.
    pub fn kinds(&self) -> Vec<(i16, Kind)> {
        let mut kinds: Vec<(i16, Kind)> = self
            .kinds
            .read()
            .by_id
            .iter()
            .map(|(id, kind)| (*id, kind.clone()))
            .collect();
        kinds.sort_by_key(|(id, _)| *id);
        kinds
    }
}

async fn rollback_quietly(session: Box<dyn SqlSession>) {
    if let Err(err) = session.rollback().await {
        tracing::warn!(error = %err, "rollback of schema session failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_pattern_is_built_once() {
        let first = index_pattern().unwrap();
        let second = index_pattern().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_parse_index_definitions_reads_catalog_output() {
        let indexes = parse_index_definitions([
            "CREATE UNIQUE INDEX node_1_objectid_constraint ON public.node_1 USING btree (((properties ->> 'objectid'::text)))",
            "CREATE INDEX node_1_name_gin_index ON public.node_1 USING gin (((properties ->> 'name'::text)) gin_trgm_ops)",
            "CREATE UNIQUE INDEX node_1_pkey ON public.node_1 USING btree (id, graph_id)",
            "CREATE INDEX node_1_kind_ids_index ON public.node_1 USING gin (kind_ids)",
        ])
        .unwrap();

        assert_eq!(indexes.len(), 2);
        assert_eq!(
            indexes["node_1_objectid_constraint"],
            PropertyIndex {
                field: "objectid".into(),
                index_type: IndexType::BTree,
                unique: true,
            }
        );
        assert_eq!(indexes["node_1_name_gin_index"].index_type, IndexType::TextSearch);
    }

    #[test]
    fn test_plan_round_trips_through_catalog_definitions() {
        let desired = desired_indexes(
            "node_1",
            &[Index::new("name", IndexType::TextSearch)],
            &[Constraint::new("objectid", IndexType::BTree)],
        );
        let created = plan_indexes("node_1", &BTreeMap::new(), &desired);
        assert_eq!(created.len(), 2);

        let present = parse_index_definitions(created.iter().map(String::as_str)).unwrap();
        assert!(plan_indexes("node_1", &present, &desired).is_empty());
    }

    #[test]
    fn test_plan_recreates_changed_index() {
        let present =
            parse_index_definitions(["create index node_1_name_gin_index on node_1 using btree ((properties ->> 'name'))"]).unwrap();
        let desired = desired_indexes("node_1", &[Index::new("name", IndexType::TextSearch)], &[]);

        assert_eq!(
            plan_indexes("node_1", &present, &desired),
            vec![
                "drop index if exists node_1_name_gin_index".to_string(),
                "create index node_1_name_gin_index on node_1 using gin ((properties ->> 'name') gin_trgm_ops)".to_string(),
            ]
        );
    }
}
