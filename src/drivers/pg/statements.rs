//! Bulk write statements over the partitioned tables.
//!
//! Every statement takes the graph id as `$1` and its payload as parallel
//! arrays fed through `unnest`, so one round trip writes a whole chunk.
//! Upserts return `(o, id)` pairs where `o` is the 1-based payload position.

use std::collections::{BTreeMap, HashMap};

use crate::error::{CompileError, Result};
use crate::query::pgsql::{sql_string, SqlArg, SqlStatement};
use crate::types::Value;

/// Sequence backing `node.id`.
pub const NODE_ID_SEQUENCE: &str = "node_id_seq";
/// Sequence backing `edge.id`.
pub const EDGE_ID_SEQUENCE: &str = "edge_id_seq";

/// Reserve `count` ids from `sequence`.
pub fn allocate_ids(sequence: &str, count: usize) -> SqlStatement {
    SqlStatement::new(
        format!("select nextval('{sequence}')::int8 from generate_series(1, $1::int4)"),
        vec![SqlArg::Int4(i32::try_from(count).unwrap_or(i32::MAX))],
    )
}

/// `int2[]` literal for a kind code set, e.g. `{1,2}`.
pub fn kind_ids_literal(codes: &[i16]) -> String {
    let codes: Vec<String> = codes.iter().map(i16::to_string).collect();
    format!("{{{}}}", codes.join(","))
}

/// Insert nodes with preassigned ids.
pub fn insert_nodes(graph_id: i32, ids: Vec<i64>, kind_ids: Vec<String>, properties: Vec<serde_json::Value>) -> SqlStatement {
    SqlStatement::new(
        "insert into node (id, graph_id, kind_ids, properties) select p.id, $1, p.kind_ids::int2[], p.properties from unnest($2::int8[], $3::text[], $4::jsonb[]) as p(id, kind_ids, properties)",
        vec![
            SqlArg::Int4(graph_id),
            SqlArg::Int8Array(ids),
            SqlArg::TextArray(kind_ids),
            SqlArg::JsonbArray(properties),
        ],
    )
}

/// Edge rows to insert with preassigned ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeRows {
    /// Edge ids.
    pub ids: Vec<i64>,
    /// Start node ids.
    pub start_ids: Vec<i64>,
    /// End node ids.
    pub end_ids: Vec<i64>,
    /// Kind codes.
    pub kind_ids: Vec<i16>,
    /// Property documents.
    pub properties: Vec<serde_json::Value>,
}

/// Insert edges with preassigned ids.
pub fn insert_edges(graph_id: i32, rows: EdgeRows) -> SqlStatement {
    SqlStatement::new(
        "insert into edge (id, graph_id, start_id, end_id, kind_id, properties) select p.id, $1, p.start_id, p.end_id, p.kind_id, p.properties from unnest($2::int8[], $3::int8[], $4::int8[], $5::int2[], $6::jsonb[]) as p(id, start_id, end_id, kind_id, properties)",
        vec![
            SqlArg::Int4(graph_id),
            SqlArg::Int8Array(rows.ids),
            SqlArg::Int8Array(rows.start_ids),
            SqlArg::Int8Array(rows.end_ids),
            SqlArg::Int2Array(rows.kind_ids),
            SqlArg::JsonbArray(rows.properties),
        ],
    )
}

fn identity_match(left: &str, right: &str, identity: &[String]) -> String {
    identity
        .iter()
        .map(|property| {
            let key = sql_string(property);
            format!(" and ({left}.properties -> {key}) = ({right}.properties -> {key})")
        })
        .collect()
}

/// Merge nodes on `identity` properties (and `identity_kind`, when set),
/// adding `kind_ids` and merging properties, inserting where nothing matches.
pub fn upsert_nodes(
    graph_id: i32,
    identity_kind: Option<i16>,
    identity: &[String],
    kind_ids: Vec<i16>,
    payloads: Vec<serde_json::Value>,
) -> SqlStatement {
    let mut args = vec![SqlArg::Int4(graph_id), SqlArg::JsonbArray(payloads), SqlArg::Int2Array(kind_ids)];

    let kind_filter = match identity_kind {
        Some(code) => {
            args.push(SqlArg::Int2(code));
            " and n.kind_ids operator (pg_catalog.@>) array[$4::int2]".to_string()
        }
        None => String::new(),
    };

    let matched = identity_match("n", "payload", identity);
    let inserted = identity_match("inserted", "payload", identity);

    let sql = format!(
        "with payload as (select p.properties, p.o from unnest($2::jsonb[]) with ordinality as p(properties, o)), \
         existing as (select distinct on (payload.o) payload.o, n.id from payload join node n on n.graph_id = $1{kind_filter}{matched} order by payload.o, n.id), \
         updated as (update node n set properties = n.properties || payload.properties, kind_ids = array(select u.k from unnest(n.kind_ids || $3::int2[]) with ordinality as u(k, position) group by u.k order by min(u.position)) from existing join payload on payload.o = existing.o where n.graph_id = $1 and n.id = existing.id returning n.id), \
         inserted as (insert into node (graph_id, kind_ids, properties) select $1, $3::int2[], payload.properties from payload where not exists (select 1 from existing where existing.o = payload.o) returning id, properties) \
         select payload.o, coalesce(existing.id, inserted.id) as id from payload left join existing on existing.o = payload.o left join inserted on existing.id is null{inserted} order by payload.o"
    );

    SqlStatement::new(sql, args)
}

/// Edge merge payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeUpserts {
    /// Start node ids.
    pub start_ids: Vec<i64>,
    /// End node ids.
    pub end_ids: Vec<i64>,
    /// Property documents.
    pub properties: Vec<serde_json::Value>,
}

/// Merge edges of `kind_id` on their endpoints plus `identity` properties.
pub fn upsert_edges(graph_id: i32, kind_id: i16, identity: &[String], rows: EdgeUpserts) -> SqlStatement {
    let matched = identity_match("r", "payload", identity);
    let inserted = identity_match("inserted", "payload", identity);

    let sql = format!(
        "with payload as (select p.start_id, p.end_id, p.properties, p.o from unnest($2::int8[], $3::int8[], $4::jsonb[]) with ordinality as p(start_id, end_id, properties, o)), \
         existing as (select distinct on (payload.o) payload.o, r.id from payload join edge r on r.graph_id = $1 and r.start_id = payload.start_id and r.end_id = payload.end_id and r.kind_id = $5::int2{matched} order by payload.o, r.id), \
         updated as (update edge r set properties = r.properties || payload.properties from existing join payload on payload.o = existing.o where r.graph_id = $1 and r.id = existing.id returning r.id), \
         inserted as (insert into edge (graph_id, start_id, end_id, kind_id, properties) select $1, payload.start_id, payload.end_id, $5::int2, payload.properties from payload where not exists (select 1 from existing where existing.o = payload.o) returning id, start_id, end_id, properties) \
         select payload.o, coalesce(existing.id, inserted.id) as id from payload left join existing on existing.o = payload.o left join inserted on existing.id is null and inserted.start_id = payload.start_id and inserted.end_id = payload.end_id{inserted} order by payload.o"
    );

    SqlStatement::new(
        sql,
        vec![
            SqlArg::Int4(graph_id),
            SqlArg::Int8Array(rows.start_ids),
            SqlArg::Int8Array(rows.end_ids),
            SqlArg::JsonbArray(rows.properties),
            SqlArg::Int2(kind_id),
        ],
    )
}

/// Delete nodes and every edge touching them.
pub fn delete_nodes(graph_id: i32, ids: Vec<i64>) -> SqlStatement {
    SqlStatement::new(
        "with deleted as (delete from node n where n.graph_id = $1 and n.id = any($2::int8[]) returning n.id) delete from edge x using deleted d where x.graph_id = $1 and (x.start_id = d.id or x.end_id = d.id)",
        vec![SqlArg::Int4(graph_id), SqlArg::Int8Array(ids)],
    )
}

/// Delete edges.
pub fn delete_edges(graph_id: i32, ids: Vec<i64>) -> SqlStatement {
    SqlStatement::new(
        "delete from edge r where r.graph_id = $1 and r.id = any($2::int8[])",
        vec![SqlArg::Int4(graph_id), SqlArg::Int8Array(ids)],
    )
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrite `@name` placeholders in raw SQL to positional `$N` arguments.
///
/// Each distinct name binds once, numbered by first appearance. Text inside
/// single-quoted literals is left alone, as are operators such as `@>`.
pub fn bind_named(text: &str, parameters: &BTreeMap<String, Value>) -> Result<SqlStatement> {
    let mut sql = String::with_capacity(text.len());
    let mut args = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut in_literal = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            sql.push(c);
            continue;
        }

        let starts_name = chars.peek().copied().map_or(false, is_identifier_start);
        if c != '@' || in_literal || !starts_name {
            sql.push(c);
            continue;
        }

        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if !is_identifier(next) {
                break;
            }
            name.push(next);
            chars.next();
        }

        let position = match positions.get(&name) {
            Some(position) => *position,
            None => {
                let value = parameters
                    .get(&name)
                    .ok_or_else(|| CompileError::Invalid(format!("missing parameter @{name}")))?;
                args.push(SqlArg::from_value(value));
                positions.insert(name, args.len());
                args.len()
            }
        };
        sql.push_str(&format!("${position}"));
    }

    Ok(SqlStatement::new(sql, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_named_numbers_by_first_appearance() {
        let parameters = BTreeMap::from([
            ("name".to_string(), Value::from("alice")),
            ("graph".to_string(), Value::Int(1)),
        ]);

        let statement = bind_named(
            "select * from node where graph_id = @graph and properties ->> 'name' = @name or properties ->> 'alias' = @name",
            &parameters,
        )
        .unwrap();

        assert_eq!(
            statement.sql,
            "select * from node where graph_id = $1 and properties ->> 'name' = $2 or properties ->> 'alias' = $2"
        );
        assert_eq!(statement.args, vec![SqlArg::Int8(1), SqlArg::Text("alice".into())]);
    }

    #[test]
    fn test_bind_named_skips_literals_and_operators() {
        let statement = bind_named(
            "select 'user@example.com', kind_ids @> array[1::int2] from node",
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(statement.sql, "select 'user@example.com', kind_ids @> array[1::int2] from node");
        assert!(statement.args.is_empty());
    }

    #[test]
    fn test_bind_named_requires_every_parameter() {
        let err = bind_named("select @missing", &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("@missing"));
    }

    #[test]
    fn test_upsert_nodes_filters_on_identity_kind() {
        let statement = upsert_nodes(
            3,
            Some(1),
            &["objectid".to_string()],
            vec![1, 2],
            vec![serde_json::json!({"objectid": "a"})],
        );

        assert!(statement.sql.contains("n.kind_ids operator (pg_catalog.@>) array[$4::int2]"));
        assert!(statement.sql.contains("(n.properties -> 'objectid') = (payload.properties -> 'objectid')"));
        assert_eq!(statement.args.len(), 4);
        assert_eq!(statement.args[3], SqlArg::Int2(1));
    }

    #[test]
    fn test_kind_ids_literal() {
        assert_eq!(kind_ids_literal(&[3, 1]), "{3,1}");
        assert_eq!(kind_ids_literal(&[]), "{}");
    }
}
