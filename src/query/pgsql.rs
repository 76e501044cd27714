//! Relational engine strategy: lower criteria into SQL over the partitioned
//! `node` / `edge` tables.
//!
//! Every statement takes the graph id as `$1`. Node and edge rows are
//! projected as JSONB composites (`id`, `kind_ids` / `kind_id`, `properties`)
//! that the mapper decodes into domain values. Traversals compile to a
//! recursive CTE over edge ids with cycle exclusion.

use chrono::{DateTime, Utc};

use super::model::{Create, Expr, Operator, Pattern, Query, SortDirection, Symbol, Traversal, Update};
use crate::error::{CompileError, GraphError, Result};
use crate::mapper::KindMapper;
use crate::types::{Kinds, Value};

/// Depth cap for unbounded traversals.
pub const MAX_TRAVERSAL_DEPTH: u32 = 12;

const BACKEND: &str = "pgsql";

/// A bound SQL argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    /// `NULL`
    Null,
    /// `boolean`
    Bool(bool),
    /// `int2`
    Int2(i16),
    /// `int4`
    Int4(i32),
    /// `int8`
    Int8(i64),
    /// `float8`
    Float8(f64),
    /// `text`
    Text(String),
    /// `timestamptz`
    Timestamp(DateTime<Utc>),
    /// `jsonb`
    Jsonb(serde_json::Value),
    /// `int2[]`
    Int2Array(Vec<i16>),
    /// `int8[]`
    Int8Array(Vec<i64>),
    /// `text[]`
    TextArray(Vec<String>),
    /// `jsonb[]`
    JsonbArray(Vec<serde_json::Value>),
}

impl SqlArg {
    /// Best-fit argument for a caller-supplied value.
    pub fn from_value(value: &Value) -> SqlArg {
        match value {
            Value::Null => SqlArg::Null,
            Value::Bool(b) => SqlArg::Bool(*b),
            Value::Int(i) => SqlArg::Int8(*i),
            Value::Float(f) => SqlArg::Float8(*f),
            Value::String(s) => SqlArg::Text(s.clone()),
            Value::DateTime(dt) => SqlArg::Timestamp(*dt),
            Value::List(items) if !items.is_empty() && items.iter().all(|item| matches!(item, Value::Int(_))) => {
                SqlArg::Int8Array(
                    items
                        .iter()
                        .filter_map(|item| match item {
                            Value::Int(i) => Some(*i),
                            _ => None,
                        })
                        .collect(),
                )
            }
            Value::List(items) if !items.is_empty() && items.iter().all(|item| matches!(item, Value::String(_))) => {
                SqlArg::TextArray(
                    items
                        .iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(s.clone()),
                            _ => None,
                        })
                        .collect(),
                )
            }
            other => SqlArg::Jsonb(other.to_json()),
        }
    }
}

/// Compiled SQL statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlStatement {
    /// SQL text with `$N` placeholders.
    pub sql: String,
    /// Arguments in placeholder order.
    pub args: Vec<SqlArg>,
}

impl SqlStatement {
    /// A statement with arguments.
    pub fn new(sql: impl Into<String>, args: Vec<SqlArg>) -> Self {
        Self { sql: sql.into(), args }
    }

    /// Placeholder names, for diagnostics.
    pub fn parameter_keys(&self) -> Vec<String> {
        (1..=self.args.len()).map(|idx| format!("${idx}")).collect()
    }
}

/// Quote a string as a SQL literal.
pub fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape `LIKE` wildcards.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// JSONB composite of a node row.
pub fn node_composite(alias: &str) -> String {
    format!("jsonb_build_object('id', {alias}.id, 'kind_ids', {alias}.kind_ids, 'properties', {alias}.properties)")
}

/// JSONB composite of an edge row.
pub fn edge_composite(alias: &str) -> String {
    format!(
        "jsonb_build_object('id', {alias}.id, 'start_id', {alias}.start_id, 'end_id', {alias}.end_id, 'kind_id', {alias}.kind_id, 'properties', {alias}.properties)"
    )
}

fn traversal_path_composite() -> String {
    format!(
        "jsonb_build_object('nodes', jsonb_build_array({start}) || coalesce((select jsonb_agg({node} order by u.o) from unnest(t.path) with ordinality as u(id, o) join edge y on y.id = u.id join node x on x.id = y.end_id), '[]'::jsonb), 'edges', coalesce((select jsonb_agg({edge} order by u.o) from unnest(t.path) with ordinality as u(id, o) join edge y on y.id = u.id), '[]'::jsonb))",
        start = node_composite("s"),
        node = node_composite("x"),
        edge = edge_composite("y"),
    )
}

/// Text of property `key` cast with `cast`, or null when the stored JSON
/// type is not `json_type`. Mismatched types never reach the cast.
fn typed_property(alias: &str, key: &str, json_type: &str, cast: &str) -> String {
    format!("(case when jsonb_typeof({alias}.properties -> {key}) = '{json_type}' then ({alias}.properties ->> {key}){cast} end)")
}

fn unsupported(detail: impl Into<String>) -> GraphError {
    GraphError::Compile(CompileError::Unsupported {
        backend: BACKEND,
        detail: detail.into(),
    })
}

fn sql_operator(operator: Operator) -> &'static str {
    match operator {
        Operator::Equals => "=",
        Operator::NotEquals => "<>",
        Operator::GreaterThan => ">",
        Operator::GreaterThanOrEquals => ">=",
        Operator::LessThan => "<",
        Operator::LessThanOrEquals => "<=",
        Operator::In => "in",
        Operator::Contains => "like",
        Operator::StartsWith => "like",
        Operator::EndsWith => "like",
    }
}

fn mirror(operator: Operator) -> Option<Operator> {
    match operator {
        Operator::Equals | Operator::NotEquals => Some(operator),
        Operator::GreaterThan => Some(Operator::LessThan),
        Operator::GreaterThanOrEquals => Some(Operator::LessThanOrEquals),
        Operator::LessThan => Some(Operator::GreaterThan),
        Operator::LessThanOrEquals => Some(Operator::GreaterThanOrEquals),
        _ => None,
    }
}

fn like_pattern(operator: Operator, value: &str) -> String {
    let escaped = escape_like(value);
    match operator {
        Operator::StartsWith => format!("{escaped}%"),
        Operator::EndsWith => format!("%{escaped}"),
        _ => format!("%{escaped}%"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Node,
    Relationship,
    Endpoints,
    Traversal,
}

struct Compiler<'a> {
    kinds: &'a dyn KindMapper,
    args: Vec<SqlArg>,
    scope: Scope,
}

impl<'a> Compiler<'a> {
    fn new(kinds: &'a dyn KindMapper, graph_id: i32, scope: Scope) -> Self {
        Self {
            kinds,
            args: vec![SqlArg::Int4(graph_id)],
            scope,
        }
    }

    fn arg(&mut self, arg: SqlArg) -> String {
        self.args.push(arg);
        format!("${}", self.args.len())
    }

    fn alias(&self, symbol: Symbol) -> Result<&'static str> {
        match (self.scope, symbol) {
            (_, Symbol::Path) => Err(unsupported("path variable in a filter")),
            (Scope::Traversal, Symbol::Relationship) => {
                Err(unsupported("relationship variable of a variable-length pattern; return the path"))
            }
            (_, symbol) => Ok(symbol.as_str()),
        }
    }

    fn kind_codes(&self, kinds: &Kinds) -> Result<Vec<i16>> {
        Ok(self.kinds.map_kinds(kinds)?)
    }

    fn expr(&mut self, expr: &Expr, nested: bool) -> Result<String> {
        match expr {
            Expr::And(items) => self.join(items, " and ", nested),
            Expr::Or(items) => self.join(items, " or ", nested),
            Expr::Not(inner) => Ok(format!("not ({})", self.expr(inner, false)?)),
            Expr::Comparison { left, operator, right } => self.comparison(left, *operator, right),
            Expr::KindMatch { symbol, kinds } => self.kind_match(*symbol, kinds),
            Expr::HasRelationships(symbol) => {
                let alias = self.alias(*symbol)?;
                Ok(format!(
                    "exists (select 1 from edge x where x.graph_id = $1 and (x.start_id = {alias}.id or x.end_id = {alias}.id))"
                ))
            }
            Expr::IsNull(inner) => Ok(format!("{} is null", self.scalar(inner)?)),
            Expr::IsNotNull(inner) => Ok(format!("{} is not null", self.scalar(inner)?)),
            other => Err(unsupported(format!("{other:?} used as a predicate"))),
        }
    }

    fn join(&mut self, items: &[Expr], separator: &str, nested: bool) -> Result<String> {
        let rendered = items
            .iter()
            .map(|item| self.expr(item, true))
            .collect::<Result<Vec<_>>>()?;

        let joined = rendered.join(separator);
        Ok(if nested && rendered.len() > 1 {
            format!("({joined})")
        } else {
            joined
        })
    }

    fn scalar(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Property(symbol, name) => {
                let alias = self.alias(*symbol)?;
                Ok(format!("({alias}.properties ->> {})", sql_string(name)))
            }
            Expr::Identity(symbol) => Ok(format!("{}.id", self.alias(*symbol)?)),
            Expr::ToLower(inner) => Ok(format!("lower({})", self.scalar(inner)?)),
            other => Err(unsupported(format!("{other:?} used as a scalar"))),
        }
    }

    fn kind_match(&mut self, symbol: Symbol, kinds: &Kinds) -> Result<String> {
        if kinds.is_empty() {
            return Err(CompileError::Invalid("kind match without kinds".into()).into());
        }

        let codes = self.kind_codes(kinds)?;
        match symbol {
            Symbol::Relationship => {
                let alias = self.alias(symbol)?;
                let codes = self.arg(SqlArg::Int2Array(codes));
                Ok(format!("{alias}.kind_id = any({codes}::int2[])"))
            }
            Symbol::Path => Err(unsupported("kind match on a path")),
            node => {
                let alias = self.alias(node)?;
                let single = codes.len() == 1;
                let codes = self.arg(SqlArg::Int2Array(codes));
                if single {
                    Ok(format!("{alias}.kind_ids operator (pg_catalog.@>) {codes}::int2[]"))
                } else {
                    Ok(format!("{alias}.kind_ids operator (pg_catalog.&&) {codes}::int2[]"))
                }
            }
        }
    }

    fn comparison(&mut self, left: &Expr, operator: Operator, right: &Expr) -> Result<String> {
        match (left, right) {
            (Expr::Literal(_), Expr::Literal(_)) => Err(unsupported("comparison between two literals")),
            (Expr::Literal(_), _) => {
                let mirrored = mirror(operator).ok_or_else(|| unsupported("literal on the left of a non-symmetric operator"))?;
                self.comparison(right, mirrored, left)
            }
            (Expr::Property(symbol, name), Expr::Literal(value)) => {
                let alias = self.alias(*symbol)?;
                self.property_comparison(alias, name, operator, value)
            }
            (Expr::ToLower(inner), Expr::Literal(Value::String(value))) => {
                let column = format!("lower({})", self.scalar(inner)?);
                if operator.is_string_match() {
                    let pattern = self.arg(SqlArg::Text(like_pattern(operator, value)));
                    Ok(format!("{column} like {pattern}"))
                } else if matches!(operator, Operator::Equals | Operator::NotEquals) {
                    let value = self.arg(SqlArg::Text(value.clone()));
                    Ok(format!("{column} {} {value}::text", sql_operator(operator)))
                } else {
                    Err(unsupported("ordering comparison on a lowercased value"))
                }
            }
            (Expr::Identity(symbol), Expr::Literal(value)) => {
                let alias = self.alias(*symbol)?;
                self.identity_comparison(alias, operator, value)
            }
            (Expr::Identity(a), Expr::Identity(b)) if mirror(operator).is_some() => {
                let (a, b) = (self.alias(*a)?, self.alias(*b)?);
                Ok(format!("{a}.id {} {b}.id", sql_operator(operator)))
            }
            (Expr::Property(a, x), Expr::Property(b, y)) if matches!(operator, Operator::Equals | Operator::NotEquals) => {
                let (a, b) = (self.alias(*a)?, self.alias(*b)?);
                Ok(format!(
                    "({a}.properties -> {}) {} ({b}.properties -> {})",
                    sql_string(x),
                    sql_operator(operator),
                    sql_string(y)
                ))
            }
            (Expr::KindsOf(Symbol::Relationship), Expr::Literal(value)) => {
                let kinds: Kinds = match (operator, value) {
                    (Operator::Equals, Value::String(name)) => Kinds::from(crate::types::Kind::new(name)),
                    (Operator::In, Value::List(items)) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(name) => Ok(crate::types::Kind::new(name)),
                            other => Err(CompileError::Invalid(format!("relationship type must be a string, got {}", other.type_name()))),
                        })
                        .collect::<std::result::Result<Kinds, _>>()?,
                    _ => return Err(unsupported("relationship type comparison other than = or in")),
                };
                self.kind_match(Symbol::Relationship, &kinds)
            }
            (left, right) => Err(unsupported(format!("comparison between {left:?} and {right:?}"))),
        }
    }

    fn property_comparison(&mut self, alias: &str, name: &str, operator: Operator, value: &Value) -> Result<String> {
        let key = sql_string(name);
        match operator {
            // Any comparison against null is unknown; only `is [not] null` tests absence.
            _ if value.is_null() => Ok("null".to_string()),
            Operator::Equals | Operator::NotEquals => {
                let value = self.arg(SqlArg::Jsonb(value.to_json()));
                Ok(format!("({alias}.properties -> {key}) {} {value}::jsonb", sql_operator(operator)))
            }
            Operator::In => match value {
                Value::List(_) => {
                    let values = self.arg(SqlArg::Jsonb(value.to_json()));
                    Ok(format!(
                        "({alias}.properties -> {key}) = any(array(select jsonb_array_elements({values}::jsonb)))"
                    ))
                }
                other => Err(CompileError::Invalid(format!("in requires a list, got {}", other.type_name())).into()),
            },
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => match value {
                Value::String(value) => {
                    let pattern = self.arg(SqlArg::Text(like_pattern(operator, value)));
                    Ok(format!("{} like {pattern}", typed_property(alias, &key, "string", "")))
                }
                other => Err(CompileError::Invalid(format!(
                    "string match requires a string, got {}",
                    other.type_name()
                ))
                .into()),
            },
            ordering => {
                let op = sql_operator(ordering);
                match value {
                    Value::Int(i) => {
                        let value = self.arg(SqlArg::Int8(*i));
                        Ok(format!("{} {op} {value}::int8", typed_property(alias, &key, "number", "::numeric")))
                    }
                    Value::Float(f) => {
                        let value = self.arg(SqlArg::Float8(*f));
                        Ok(format!("{} {op} {value}::float8", typed_property(alias, &key, "number", "::numeric")))
                    }
                    Value::String(s) => {
                        let value = self.arg(SqlArg::Text(s.clone()));
                        Ok(format!("{} {op} {value}::text", typed_property(alias, &key, "string", "")))
                    }
                    Value::DateTime(dt) => {
                        let value = self.arg(SqlArg::Timestamp(*dt));
                        Ok(format!(
                            "(case when jsonb_typeof({alias}.properties -> {key}) = 'string' and ({alias}.properties ->> {key}) ~ '^\\d{{4}}-\\d{{2}}-\\d{{2}}' then ({alias}.properties ->> {key})::timestamptz end) {op} {value}::timestamptz"
                        ))
                    }
                    other => Err(unsupported(format!("ordering comparison on {}", other.type_name()))),
                }
            }
        }
    }

    fn identity_comparison(&mut self, alias: &str, operator: Operator, value: &Value) -> Result<String> {
        match (operator, value) {
            (Operator::In, Value::List(items)) => {
                let ids = items
                    .iter()
                    .map(|item| match item {
                        Value::Int(i) => Ok(*i),
                        other => Err(CompileError::Invalid(format!("identity must be an integer, got {}", other.type_name()))),
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let ids = self.arg(SqlArg::Int8Array(ids));
                Ok(format!("{alias}.id = any({ids}::int8[])"))
            }
            (operator, Value::Int(id)) if mirror(operator).is_some() => {
                let id = self.arg(SqlArg::Int8(*id));
                Ok(format!("{alias}.id {} {id}::int8", sql_operator(operator)))
            }
            (_, other) => Err(CompileError::Invalid(format!(
                "identity comparison requires integer values, got {}",
                other.type_name()
            ))
            .into()),
        }
    }

    fn projection(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Variable(Symbol::Path) => match self.scope {
                Scope::Relationship => Ok(format!(
                    "jsonb_build_object('nodes', jsonb_build_array({}, {}), 'edges', jsonb_build_array({}))",
                    node_composite("s"),
                    node_composite("e"),
                    edge_composite("r")
                )),
                Scope::Traversal => Ok(traversal_path_composite()),
                _ => Err(unsupported("path variable outside a relationship pattern")),
            },
            Expr::Variable(Symbol::Relationship) => Ok(edge_composite(self.alias(Symbol::Relationship)?)),
            Expr::Variable(node) => Ok(node_composite(self.alias(*node)?)),
            Expr::Identity(symbol) => Ok(format!("{}.id", self.alias(*symbol)?)),
            Expr::Property(symbol, name) => Ok(format!("{}.properties -> {}", self.alias(*symbol)?, sql_string(name))),
            Expr::KindsOf(Symbol::Relationship) => Ok(format!("{}.kind_id", self.alias(Symbol::Relationship)?)),
            Expr::KindsOf(Symbol::Path) => Err(unsupported("kinds of a path")),
            Expr::KindsOf(node) => Ok(format!("{}.kind_ids", self.alias(*node)?)),
            Expr::Literal(value) => {
                let value = self.arg(SqlArg::Jsonb(value.to_json()));
                Ok(format!("{value}::jsonb"))
            }
            Expr::ToLower(inner) => Ok(format!("lower({})", self.scalar(inner)?)),
            Expr::Count { expr, distinct } => {
                let counted = match expr.as_ref() {
                    Expr::Variable(Symbol::Path) if self.scope == Scope::Traversal => "t.path".to_string(),
                    Expr::Variable(Symbol::Path) => "r.id".to_string(),
                    Expr::Variable(symbol) | Expr::Identity(symbol) => format!("{}.id", self.alias(*symbol)?),
                    other => self.projection(other)?,
                };
                Ok(if *distinct {
                    format!("count(distinct {counted})")
                } else {
                    format!("count({counted})")
                })
            }
            other => Err(unsupported(format!("{other:?} in a return clause"))),
        }
    }

    fn select_tail(&mut self, query: &Query, sql: &mut String) -> Result<()> {
        let aggregates = query.projection.iter().filter(|item| item.is_aggregate()).count();
        if aggregates > 0 && aggregates < query.projection.len() {
            let keys = query
                .projection
                .iter()
                .filter(|item| !item.is_aggregate())
                .map(|item| self.projection(item))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" group by {}", keys.join(", ")));
        }

        if !query.order.is_empty() {
            let terms = query
                .order
                .iter()
                .map(|item| {
                    let direction = match item.direction {
                        SortDirection::Ascending => "asc",
                        SortDirection::Descending => "desc",
                    };
                    self.projection(&item.expr).map(|expr| format!("{expr} {direction}"))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" order by {}", terms.join(", ")));
        }

        if let Some(skip) = query.skip {
            sql.push_str(&format!(" offset {skip}"));
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" limit {limit}"));
        }

        Ok(())
    }

    fn returning(&mut self, query: &Query) -> Result<String> {
        if query.projection.is_empty() {
            return Ok(String::new());
        }

        if query.projection.iter().any(Expr::is_aggregate) || !query.order.is_empty() || query.skip.is_some() || query.limit.is_some() {
            return Err(unsupported("aggregation, ordering, or pagination on a mutation"));
        }

        let items = query
            .projection
            .iter()
            .map(|item| self.projection(item))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(" returning {}", items.join(", ")))
    }

    fn items(&mut self, query: &Query) -> Result<String> {
        let items = query
            .projection
            .iter()
            .map(|item| self.projection(item))
            .collect::<Result<Vec<_>>>()?;
        let distinct = if query.distinct { "distinct " } else { "" };
        Ok(format!("select {distinct}{}", items.join(", ")))
    }

    fn filter_clause(&mut self, filter: Option<&Expr>) -> Result<String> {
        match filter {
            Some(filter) => Ok(format!(" and ({})", self.expr(filter, false)?)),
            None => Ok(String::new()),
        }
    }
}

/// Compile a criteria query for graph partition `graph_id`.
///
/// Kinds named by the query must already be mapped; an unmapped kind is a
/// mapping error.
pub fn compile(query: &Query, kinds: &dyn KindMapper, graph_id: i32) -> Result<SqlStatement> {
    if query.is_empty() {
        return Err(CompileError::Invalid("query has no return, create, or update clause".into()).into());
    }

    if !query.order.is_empty() && query.projection.is_empty() {
        return Err(CompileError::Invalid("order by requires a return clause".into()).into());
    }

    let filter = query.filter.clone().and_then(Expr::simplify);
    match query.resolve_pattern()? {
        Pattern::Node => compile_node(query, filter.as_ref(), kinds, graph_id),
        Pattern::Relationship(Traversal::Single) => compile_relationship(query, filter.as_ref(), kinds, graph_id),
        Pattern::Relationship(traversal) => compile_traversal(query, filter, traversal, kinds, graph_id),
        Pattern::Endpoints => compile_endpoints(query, filter.as_ref(), kinds, graph_id),
    }
}

fn compile_node(query: &Query, filter: Option<&Expr>, kinds: &dyn KindMapper, graph_id: i32) -> Result<SqlStatement> {
    let mut compiler = Compiler::new(kinds, graph_id, Scope::Node);

    if let Some(create) = &query.create {
        let Create::Node { kinds: node_kinds, properties } = create else {
            return Err(CompileError::Invalid("relationship creation requires start and end nodes".into()).into());
        };
        if filter.is_some() || !query.updates.is_empty() {
            return Err(CompileError::Invalid("node creation does not take a filter or updates".into()).into());
        }

        let codes = compiler.kind_codes(node_kinds)?;
        let codes = compiler.arg(SqlArg::Int2Array(codes));
        let properties = compiler.arg(SqlArg::Jsonb(Value::Map(properties.clone()).to_json()));
        let returning = compiler.returning(query)?;
        let sql = format!(
            "insert into node as n (graph_id, kind_ids, properties) values ($1, {codes}::int2[], {properties}::jsonb){returning}"
        );
        return Ok(SqlStatement::new(sql, compiler.args));
    }

    if query.updates.iter().any(|update| matches!(update, Update::Delete(_))) {
        if query.updates.len() > 1 || !query.projection.is_empty() {
            return Err(unsupported("delete combined with other clauses"));
        }
        let filter = compiler.filter_clause(filter)?;
        let sql = format!(
            "with deleted as (delete from node n where n.graph_id = $1{filter} returning n.id) delete from edge x using deleted d where x.graph_id = $1 and (x.start_id = d.id or x.end_id = d.id)"
        );
        return Ok(SqlStatement::new(sql, compiler.args));
    }

    if !query.updates.is_empty() {
        let assignments = node_assignments(&mut compiler, &query.updates)?;
        let filter = compiler.filter_clause(filter)?;
        let returning = compiler.returning(query)?;
        let sql = format!("update node n set {assignments} where n.graph_id = $1{filter}{returning}");
        return Ok(SqlStatement::new(sql, compiler.args));
    }

    let items = compiler.items(query)?;
    let filter = compiler.filter_clause(filter)?;
    let mut sql = format!("{items} from node n where n.graph_id = $1{filter}");
    compiler.select_tail(query, &mut sql)?;
    Ok(SqlStatement::new(sql, compiler.args))
}

fn properties_assignment(compiler: &mut Compiler<'_>, alias: &str, updates: &[Update]) -> Option<String> {
    let mut properties = format!("{alias}.properties");
    let mut touched = false;

    for update in updates {
        match update {
            Update::SetProperties { properties: values, .. } => {
                let values = compiler.arg(SqlArg::Jsonb(Value::Map(values.clone()).to_json()));
                properties = format!("({properties}) || {values}::jsonb");
                touched = true;
            }
            Update::RemoveProperties { keys, .. } => {
                let keys = compiler.arg(SqlArg::TextArray(keys.clone()));
                properties = format!("({properties}) - {keys}::text[]");
                touched = true;
            }
            _ => {}
        }
    }

    touched.then(|| format!("properties = {properties}"))
}

fn node_assignments(compiler: &mut Compiler<'_>, updates: &[Update]) -> Result<String> {
    for update in updates {
        let symbols = update.symbols();
        if symbols.iter().any(|symbol| *symbol != Symbol::Node) {
            return Err(unsupported("update of a variable other than the matched node"));
        }
    }

    let mut assignments = Vec::new();
    let mut kind_ids = "n.kind_ids".to_string();
    let mut kinds_touched = false;

    for update in updates {
        match update {
            Update::AddKinds { kinds, .. } => {
                let codes = compiler.kind_codes(kinds)?;
                let codes = compiler.arg(SqlArg::Int2Array(codes));
                kind_ids = format!(
                    "array(select k from unnest({kind_ids} || {codes}::int2[]) with ordinality as u(k, o) group by k order by min(o))"
                );
                kinds_touched = true;
            }
            Update::RemoveKinds { kinds, .. } => {
                let codes = compiler.kind_codes(kinds)?;
                let codes = compiler.arg(SqlArg::Int2Array(codes));
                kind_ids = format!("array(select k from unnest({kind_ids}) as k where k <> all({codes}::int2[]))");
                kinds_touched = true;
            }
            _ => {}
        }
    }

    if kinds_touched {
        assignments.push(format!("kind_ids = {kind_ids}"));
    }

    if let Some(properties) = properties_assignment(compiler, "n", updates) {
        assignments.push(properties);
    }

    if assignments.is_empty() {
        return Err(CompileError::Invalid("update without assignments".into()).into());
    }

    Ok(assignments.join(", "))
}

const EDGE_JOIN: &str = "edge r join node s on s.id = r.start_id join node e on e.id = r.end_id";

fn compile_relationship(query: &Query, filter: Option<&Expr>, kinds: &dyn KindMapper, graph_id: i32) -> Result<SqlStatement> {
    let mut compiler = Compiler::new(kinds, graph_id, Scope::Relationship);

    if query.updates.iter().any(|update| matches!(update, Update::Delete(_))) {
        let deletes_relationship_only = query.updates.len() == 1
            && matches!(&query.updates[0], Update::Delete(symbols) if symbols == &vec![Symbol::Relationship]);
        if !deletes_relationship_only || !query.projection.is_empty() {
            return Err(unsupported("delete of anything but the matched relationship"));
        }
        let filter = compiler.filter_clause(filter)?;
        let sql = format!(
            "delete from edge r using node s, node e where s.id = r.start_id and e.id = r.end_id and r.graph_id = $1{filter}"
        );
        return Ok(SqlStatement::new(sql, compiler.args));
    }

    if !query.updates.is_empty() {
        for update in &query.updates {
            match update {
                Update::SetProperties { symbol: Symbol::Relationship, .. }
                | Update::RemoveProperties { symbol: Symbol::Relationship, .. } => {}
                Update::AddKinds { symbol: Symbol::Relationship, .. } | Update::RemoveKinds { symbol: Symbol::Relationship, .. } => {
                    return Err(unsupported("relationship kinds are immutable"))
                }
                _ => return Err(unsupported("update of relationship endpoints")),
            }
        }

        let assignments = properties_assignment(&mut compiler, "r", &query.updates)
            .ok_or_else(|| CompileError::Invalid("update without assignments".into()))?;
        let filter = compiler.filter_clause(filter)?;
        let returning = compiler.returning(query)?;
        let sql = format!(
            "update edge r set {assignments} from node s, node e where s.id = r.start_id and e.id = r.end_id and r.graph_id = $1{filter}{returning}"
        );
        return Ok(SqlStatement::new(sql, compiler.args));
    }

    let items = compiler.items(query)?;
    let filter = compiler.filter_clause(filter)?;
    let mut sql = format!("{items} from {EDGE_JOIN} where r.graph_id = $1{filter}");
    compiler.select_tail(query, &mut sql)?;
    Ok(SqlStatement::new(sql, compiler.args))
}

fn compile_endpoints(query: &Query, filter: Option<&Expr>, kinds: &dyn KindMapper, graph_id: i32) -> Result<SqlStatement> {
    let mut compiler = Compiler::new(kinds, graph_id, Scope::Endpoints);

    match &query.create {
        Some(Create::Relationship { kind, properties }) => {
            if !query.updates.is_empty() {
                return Err(unsupported("updates combined with relationship creation"));
            }
            if query.projection.iter().any(|item| item.symbols().iter().any(|symbol| *symbol != Symbol::Relationship)) {
                return Err(unsupported("returning endpoint nodes from relationship creation"));
            }

            let code = kinds
                .id_for_kind(kind)
                .ok_or_else(|| crate::error::MappingError::UnknownKind(kind.clone()))?;
            let code = compiler.arg(SqlArg::Int2(code));
            let properties = compiler.arg(SqlArg::Jsonb(Value::Map(properties.clone()).to_json()));
            let filter = compiler.filter_clause(filter)?;
            let returning = compiler.returning(query)?;
            let sql = format!(
                "insert into edge as r (graph_id, start_id, end_id, kind_id, properties) select $1, s.id, e.id, {code}::int2, {properties}::jsonb from node s, node e where s.graph_id = $1 and e.graph_id = $1{filter}{returning}"
            );
            Ok(SqlStatement::new(sql, compiler.args))
        }
        Some(Create::Node { .. }) => Err(CompileError::Invalid("node creation does not match endpoints".into()).into()),
        None => {
            if !query.updates.is_empty() {
                return Err(unsupported("updates on an endpoint pattern"));
            }
            let items = compiler.items(query)?;
            let filter = compiler.filter_clause(filter)?;
            let mut sql = format!("{items} from node s, node e where s.graph_id = $1 and e.graph_id = $1{filter}");
            compiler.select_tail(query, &mut sql)?;
            Ok(SqlStatement::new(sql, compiler.args))
        }
    }
}

fn compile_traversal(
    query: &Query,
    filter: Option<Expr>,
    traversal: Traversal,
    kinds: &dyn KindMapper,
    graph_id: i32,
) -> Result<SqlStatement> {
    if query.create.is_some() || !query.updates.is_empty() {
        return Err(unsupported("mutation on a variable-length pattern"));
    }

    let (min, max, shortest) = match traversal {
        Traversal::Bounded { min, max } => (min, max.unwrap_or(MAX_TRAVERSAL_DEPTH), false),
        Traversal::AllShortestPaths { max } => (1, max.unwrap_or(MAX_TRAVERSAL_DEPTH), true),
        Traversal::Single => (1, 1, false),
    };

    let mut start_terms = Vec::new();
    let mut edge_terms = Vec::new();
    let mut end_terms = Vec::new();
    for term in filter.map(Expr::conjuncts).unwrap_or_default() {
        let symbols = term.symbols();
        if symbols.len() != 1 {
            return Err(unsupported("predicate spanning several variables of a variable-length pattern"));
        }
        match symbols.iter().next() {
            Some(Symbol::Start) => start_terms.push(term),
            Some(Symbol::Relationship) => edge_terms.push(term),
            Some(Symbol::End) => end_terms.push(term),
            _ => return Err(unsupported("predicate on the path variable")),
        }
    }

    // Relationship predicates apply to every hop, so they compile in edge scope.
    let mut compiler = Compiler::new(kinds, graph_id, Scope::Relationship);
    let start_filter = compiler.filter_clause(Expr::And(start_terms).simplify().as_ref())?;
    let edge_filter = Expr::And(edge_terms).simplify();

    // A zero-length lower bound anchors on the start node itself; every hop then
    // comes from the recursive step.
    let anchor = if min == 0 {
        format!("select s.id, s.id, 0, array[]::int8[], array[s.id] from node s where s.graph_id = $1{start_filter}")
    } else {
        let anchor_edge_filter = compiler.filter_clause(edge_filter.as_ref())?;
        let no_loop = if shortest { " and r.end_id <> r.start_id" } else { "" };
        format!(
            "select r.start_id, r.end_id, 1, array[r.id], array[r.start_id, r.end_id] from edge r join node s on s.id = r.start_id where r.graph_id = $1{start_filter}{anchor_edge_filter}{no_loop}"
        )
    };
    let step_edge_filter = compiler.filter_clause(edge_filter.as_ref())?;
    let end_filter = compiler.filter_clause(Expr::And(end_terms).simplify().as_ref())?;

    // A shortest path never revisits a node, which bounds the walk by the
    // reachable set rather than by every edge-simple cycle.
    let revisit_guard = if shortest { " and r.end_id <> all(t.nodes)" } else { "" };

    compiler.scope = Scope::Traversal;
    let items = compiler.items(query)?;
    let shortest_filter = if shortest { " where t.depth = t.min_depth" } else { "" };

    let mut sql = format!(
        "with recursive traversal(root_id, next_id, depth, path, nodes) as (\
{anchor} \
union all \
select t.root_id, r.end_id, t.depth + 1, t.path || r.id, t.nodes || r.end_id from traversal t join edge r on r.start_id = t.next_id where r.graph_id = $1 and t.depth < {max} and r.id <> all(t.path){revisit_guard}{step_edge_filter}) \
{items} from (select t.*, min(t.depth) over (partition by t.root_id, t.next_id) as min_depth from traversal t join node e on e.id = t.next_id where t.depth >= {min}{end_filter}) t \
join node s on s.id = t.root_id join node e on e.id = t.next_id{shortest_filter}"
    );

    compiler.select_tail(query, &mut sql)?;
    Ok(SqlStatement::new(sql, compiler.args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::StaticKindMapper;
    use crate::query::*;
    use crate::types::{Kind, ID};

    fn kinds() -> StaticKindMapper {
        StaticKindMapper::new([(1, "Base"), (2, "User"), (3, "MemberOf"), (4, "Group")])
    }

    #[test]
    fn test_node_kind_and_property_filter() {
        let query = Query::matching(and([kind(Symbol::Node, "User"), equals(node_property("name"), "alice")]))
            .returning([node()]);

        let statement = compile(&query, &kinds(), 7).unwrap();
        assert_eq!(
            statement.sql,
            "select jsonb_build_object('id', n.id, 'kind_ids', n.kind_ids, 'properties', n.properties) from node n where n.graph_id = $1 and (n.kind_ids operator (pg_catalog.@>) $2::int2[] and (n.properties -> 'name') = $3::jsonb)"
        );
        assert_eq!(
            statement.args,
            vec![
                SqlArg::Int4(7),
                SqlArg::Int2Array(vec![2]),
                SqlArg::Jsonb(serde_json::json!("alice")),
            ]
        );
    }

    #[test]
    fn test_unknown_kind_is_mapping_error() {
        let query = Query::matching(kind(Symbol::Node, "Computer")).returning([node()]);
        assert!(matches!(
            compile(&query, &kinds(), 1),
            Err(GraphError::Mapping(crate::error::MappingError::UnknownKind(_)))
        ));
    }

    #[test]
    fn test_count_by_ids_with_pagination() {
        let query = Query::matching(in_ids(node_id(), &[ID::new(1), ID::new(2)]))
            .returning([count(node())])
            .skip(20)
            .limit(10);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert_eq!(
            statement.sql,
            "select count(n.id) from node n where n.graph_id = $1 and (n.id = any($2::int8[])) offset 20 limit 10"
        );
    }

    #[test]
    fn test_string_match_escapes_wildcards() {
        let query = Query::matching(string_contains(node_property("name"), "50%_off")).returning([node_id()]);
        let statement = compile(&query, &kinds(), 1).unwrap();
        assert_eq!(statement.args[1], SqlArg::Text("%50\\%\\_off%".into()));
    }

    #[test]
    fn test_null_literal_comparisons_match_nothing() {
        for predicate in [
            equals(node_property("x"), Value::Null),
            not_equals(node_property("x"), Value::Null),
            greater_than(node_property("x"), Value::Null),
        ] {
            let statement = compile(&Query::matching(predicate).returning([node_id()]), &kinds(), 1).unwrap();
            assert!(statement.sql.ends_with("where n.graph_id = $1 and (null)"));
            assert_eq!(statement.args, vec![SqlArg::Int4(1)]);
        }
    }

    #[test]
    fn test_is_null_tests_absence() {
        let query = Query::matching(is_null(node_property("x"))).returning([node_id()]);
        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.ends_with("and ((n.properties ->> 'x') is null)"));
    }

    #[test]
    fn test_integer_ordering_keeps_precision() {
        let query = Query::matching(greater_than(node_property("x"), 9_007_199_254_740_993i64)).returning([node_id()]);
        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.ends_with(
            "and ((case when jsonb_typeof(n.properties -> 'x') = 'number' then (n.properties ->> 'x')::numeric end) > $2::int8)"
        ));
        assert_eq!(statement.args[1], SqlArg::Int8(9_007_199_254_740_993));
    }

    #[test]
    fn test_string_ordering_skips_other_types() {
        let query = Query::matching(less_than(node_property("name"), "m")).returning([node_id()]);
        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement
            .sql
            .contains("(case when jsonb_typeof(n.properties -> 'name') = 'string' then (n.properties ->> 'name') end) < $2::text"));
    }

    #[test]
    fn test_in_tests_membership_not_containment() {
        let query = Query::matching(in_values(node_property("x"), [1i64, 2, 3])).returning([node_id()]);
        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement
            .sql
            .ends_with("and ((n.properties -> 'x') = any(array(select jsonb_array_elements($2::jsonb))))"));
        assert!(!statement.sql.contains("@>"));
        assert_eq!(statement.args[1], SqlArg::Jsonb(serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn test_node_update_assignments() {
        let mut values = std::collections::BTreeMap::new();
        values.insert("enabled".to_string(), Value::Bool(true));

        let query = Query::matching(equals(node_id(), ID::new(3)))
            .update(add_kinds(Symbol::Node, Kind::new("Group")))
            .update(set_properties(Symbol::Node, values))
            .update(delete_properties(Symbol::Node, ["stale"]));

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.starts_with("update node n set kind_ids = array(select k from unnest(n.kind_ids || $2::int2[])"));
        assert!(statement.sql.contains("properties = ((n.properties) || $3::jsonb) - $4::text[]"));
        assert!(statement.sql.ends_with("where n.graph_id = $1 and (n.id = $5::int8)"));
    }

    #[test]
    fn test_node_delete_detaches() {
        let query = Query::matching(equals(node_id(), ID::new(3))).update(delete([Symbol::Node]));
        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.starts_with("with deleted as (delete from node n"));
        assert!(statement
            .sql
            .ends_with("delete from edge x using deleted d where x.graph_id = $1 and (x.start_id = d.id or x.end_id = d.id)"));
    }

    #[test]
    fn test_relationship_kind_filter_and_path() {
        let query = Query::matching(and([
            kind(Symbol::Relationship, "MemberOf"),
            equals(start_id(), ID::new(1)),
        ]))
        .returning([path()]);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.contains(EDGE_JOIN));
        assert!(statement.sql.contains("r.kind_id = any($2::int2[])"));
        assert!(statement.sql.contains("'edges', jsonb_build_array("));
    }

    #[test]
    fn test_shortest_paths_use_min_depth() {
        let query = Query::matching(and([
            equals(start_property("objectid"), "A"),
            kind(Symbol::Relationship, "MemberOf"),
            kind(Symbol::End, "Group"),
        ]))
        .pattern(Pattern::Relationship(Traversal::AllShortestPaths { max: None }))
        .returning([path()]);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.starts_with("with recursive traversal"));
        assert!(statement.sql.contains("r.id <> all(t.path)"));
        assert!(statement.sql.contains(&format!("t.depth < {MAX_TRAVERSAL_DEPTH}")));
        assert!(statement.sql.contains("where t.depth = t.min_depth"));
    }

    #[test]
    fn test_shortest_paths_never_revisit_nodes() {
        let query = Query::matching(equals(start_id(), ID::new(1)))
            .pattern(Pattern::Relationship(Traversal::AllShortestPaths { max: None }))
            .returning([path()]);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.contains("array[r.start_id, r.end_id]"));
        assert!(statement.sql.contains("and r.end_id <> r.start_id"));
        assert!(statement.sql.contains("t.nodes || r.end_id"));
        assert!(statement.sql.contains("and r.end_id <> all(t.nodes)"));
    }

    #[test]
    fn test_bounded_traversal_allows_revisiting_nodes() {
        let query = Query::matching(equals(start_id(), ID::new(1)))
            .pattern(Pattern::Relationship(Traversal::Bounded { min: 1, max: Some(4) }))
            .returning([path()]);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.contains("r.id <> all(t.path)"));
        assert!(!statement.sql.contains("all(t.nodes)"));
    }

    #[test]
    fn test_zero_length_traversal_anchors_on_start_node() {
        let query = Query::matching(and([equals(start_id(), ID::new(1)), kind(Symbol::Relationship, "MemberOf")]))
            .pattern(Pattern::Relationship(Traversal::Bounded { min: 0, max: Some(2) }))
            .returning([end()]);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.starts_with(
            "with recursive traversal(root_id, next_id, depth, path, nodes) as (select s.id, s.id, 0, array[]::int8[], array[s.id] from node s where s.graph_id = $1 and (s.id = $2::int8) union all"
        ));
        assert!(statement.sql.contains("t.depth >= 0"));
        assert_eq!(statement.args, vec![SqlArg::Int4(1), SqlArg::Int8(1), SqlArg::Int2Array(vec![3])]);
    }

    #[test]
    fn test_bounded_traversal_has_no_min_depth_filter() {
        let query = Query::matching(equals(start_id(), ID::new(1)))
            .pattern(Pattern::Relationship(Traversal::Bounded { min: 2, max: Some(3) }))
            .returning([end()]);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.contains("t.depth < 3"));
        assert!(statement.sql.contains("t.depth >= 2"));
        assert!(!statement.sql.contains("t.depth = t.min_depth"));
    }

    #[test]
    fn test_traversal_rejects_cross_variable_predicates() {
        let query = Query::matching(equals(start_id(), end_id()))
            .pattern(Pattern::Relationship(Traversal::AllShortestPaths { max: None }))
            .returning([path()]);
        assert!(matches!(compile(&query, &kinds(), 1), Err(GraphError::Compile(_))));
    }

    #[test]
    fn test_create_relationship_between_ids() {
        let query = Query::matching(and([equals(start_id(), ID::new(1)), equals(end_id(), ID::new(2))]))
            .create(create_relationship("MemberOf", &crate::types::Properties::new()))
            .returning([relationship()]);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement.sql.starts_with("insert into edge as r (graph_id, start_id, end_id, kind_id, properties) select $1, s.id, e.id, $2::int2"));
        assert!(statement.sql.ends_with(&format!("returning {}", edge_composite("r"))));
    }

    #[test]
    fn test_literal_on_left_is_mirrored() {
        let query = Query::matching(Expr::Comparison {
            left: Box::new(Expr::Literal(Value::Int(5))),
            operator: Operator::LessThan,
            right: Box::new(node_property("count")),
        })
        .returning([node_id()]);

        let statement = compile(&query, &kinds(), 1).unwrap();
        assert!(statement
            .sql
            .contains("(case when jsonb_typeof(n.properties -> 'count') = 'number' then (n.properties ->> 'count')::numeric end) > $2::int8"));
        assert_eq!(statement.args[1], SqlArg::Int8(5));
    }
}
