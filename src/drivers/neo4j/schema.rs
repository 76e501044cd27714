//! Native index and constraint sync.

use std::collections::BTreeMap;

use super::{CypherClient, CypherRows};
use crate::context::Context;
use crate::drivers::log_statement;
use crate::engine::AccessMode;
use crate::error::{GraphError, Result};
use crate::mapper::Cell;
use crate::query::cypher::{quote_identifier, Statement};
use crate::types::{IndexType, Kind, Schema};

/// Query listing the present indexes and the constraints that own them.
pub const SHOW_INDEXES: &str =
    "show indexes yield name, type, entityType, labelsOrTypes, properties, owningConstraint";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entity {
    Node,
    Relationship,
}

/// One index or constraint, present or desired.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Definition {
    entity: Entity,
    kind: String,
    field: String,
    index_type: IndexType,
    constraint: bool,
}

impl Definition {
    fn pattern(&self) -> String {
        let kind = quote_identifier(&self.kind);
        match self.entity {
            Entity::Node => format!("(n:{kind})"),
            Entity::Relationship => format!("()-[n:{kind}]-()"),
        }
    }

    fn create(&self, name: &str) -> String {
        let field = quote_identifier(&self.field);
        if self.constraint {
            format!(
                "create constraint {name} if not exists for {} require n.{field} is unique",
                self.pattern()
            )
        } else {
            let flavour = match self.index_type {
                IndexType::BTree => "range",
                IndexType::TextSearch => "text",
            };
            format!(
                "create {flavour} index {name} if not exists for {} on (n.{field})",
                self.pattern()
            )
        }
    }

    fn drop(&self, name: &str) -> String {
        if self.constraint {
            format!("drop constraint {name} if exists")
        } else {
            format!("drop index {name} if exists")
        }
    }
}

fn derived_name(kind: &Kind, explicit: &str, field: &str, suffix: &str) -> String {
    let name = if explicit.is_empty() {
        format!("{}_{}_{}", kind.as_str(), field, suffix)
    } else {
        format!("{}_{}", kind.as_str(), explicit)
    };
    name.to_lowercase()
}

fn desired(schema: &Schema) -> BTreeMap<String, Definition> {
    let mut definitions = BTreeMap::new();

    let graphs = schema.graphs.iter().chain(schema.default_graph.iter());
    for graph in graphs {
        let sides = [
            (Entity::Node, &graph.nodes, &graph.node_indexes, &graph.node_constraints),
            (Entity::Relationship, &graph.edges, &graph.edge_indexes, &graph.edge_constraints),
        ];

        for (entity, kinds, indexes, constraints) in sides {
            for kind in kinds.iter() {
                for index in indexes {
                    definitions.insert(
                        derived_name(kind, &index.name, &index.field, "index"),
                        Definition {
                            entity,
                            kind: kind.to_string(),
                            field: index.field.clone(),
                            index_type: index.index_type,
                            constraint: false,
                        },
                    );
                }
                for constraint in constraints {
                    definitions.insert(
                        derived_name(kind, &constraint.name, &constraint.field, "constraint"),
                        Definition {
                            entity,
                            kind: kind.to_string(),
                            field: constraint.field.clone(),
                            index_type: IndexType::BTree,
                            constraint: true,
                        },
                    );
                }
            }
        }
    }

    definitions
}

fn strings(cell: Option<&Cell>) -> Vec<String> {
    match cell {
        Some(Cell::List(items)) => items
            .iter()
            .filter_map(|item| match item {
                Cell::String(value) => Some(value.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn string(cell: Option<&Cell>) -> Option<String> {
    match cell {
        Some(Cell::String(value)) => Some(value.clone()),
        _ => None,
    }
}

/// Parse `show indexes` rows. Token lookup and composite indexes are not ours to manage.
fn present(rows: &CypherRows) -> Result<BTreeMap<String, Definition>> {
    let column = |name: &str| rows.columns.iter().position(|column| column == name);
    let missing = |name: &str| GraphError::schema("show indexes", format!("missing column {name}"));

    let name_at = column("name").ok_or_else(|| missing("name"))?;
    let type_at = column("type").ok_or_else(|| missing("type"))?;
    let entity_at = column("entityType").ok_or_else(|| missing("entityType"))?;
    let labels_at = column("labelsOrTypes").ok_or_else(|| missing("labelsOrTypes"))?;
    let properties_at = column("properties").ok_or_else(|| missing("properties"))?;
    let owner_at = column("owningConstraint").ok_or_else(|| missing("owningConstraint"))?;

    let mut definitions = BTreeMap::new();
    for row in &rows.rows {
        let index_type = match string(row.get(type_at)).as_deref() {
            Some("RANGE") | Some("BTREE") => IndexType::BTree,
            Some("TEXT") => IndexType::TextSearch,
            _ => continue,
        };

        let entity = match string(row.get(entity_at)).as_deref() {
            Some("RELATIONSHIP") => Entity::Relationship,
            _ => Entity::Node,
        };

        let labels = strings(row.get(labels_at));
        let properties = strings(row.get(properties_at));
        let (Some(name), [kind], [field]) = (string(row.get(name_at)), labels.as_slice(), properties.as_slice()) else {
            continue;
        };

        let owner = string(row.get(owner_at));
        let constraint = owner.is_some();
        definitions.insert(
            owner.unwrap_or(name),
            Definition {
                entity,
                kind: kind.clone(),
                field: field.clone(),
                index_type,
                constraint,
            },
        );
    }

    Ok(definitions)
}

/// DDL turning `present` into `desired`.
fn plan(present: &BTreeMap<String, Definition>, desired: &BTreeMap<String, Definition>) -> Vec<String> {
    let mut statements = Vec::new();

    for (name, definition) in present {
        match desired.get(name) {
            Some(wanted) if wanted == definition => {}
            _ => statements.push(definition.drop(name)),
        }
    }

    for (name, definition) in desired {
        if present.get(name) != Some(definition) {
            statements.push(definition.create(name));
        }
    }

    statements
}

/// Sync native indexes and constraints with `schema`.
///
/// Present definitions that are not desired are dropped; a definition whose
/// type or target changed is dropped and recreated. An unchanged schema
/// issues no DDL.
pub async fn assert_schema(ctx: &Context, client: &dyn CypherClient, schema: &Schema) -> Result<()> {
    let mut reader = ctx.run(client.begin(AccessMode::Read)).await?;
    let listing = Statement::new(SHOW_INDEXES, BTreeMap::new());
    log_statement("neo4j", &listing.text, std::iter::empty());
    let rows = ctx.run(reader.run(&listing)).await;
    let rows = match rows {
        Ok(rows) => {
            ctx.run(reader.commit()).await?;
            rows
        }
        Err(err) => {
            if let Err(rollback_err) = reader.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback of index listing failed");
            }
            return Err(err);
        }
    };

    let statements = plan(&present(&rows)?, &desired(schema));
    if statements.is_empty() {
        return Ok(());
    }

    let mut writer = ctx.run(client.begin(AccessMode::Write)).await?;
    for text in statements {
        tracing::info!(driver = "neo4j", statement = %text, "Applying schema change");
        if let Err(err) = ctx.run(writer.run(&Statement::new(text.clone(), BTreeMap::new()))).await {
            if let Err(rollback_err) = writer.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback of schema change failed");
            }
            return Err(GraphError::schema(text, err));
        }
    }

    ctx.run(writer.commit()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Constraint, GraphSchema, Index, Kinds};

    fn schema() -> Schema {
        let mut graph = GraphSchema::named("default");
        graph.nodes = Kinds::from(&["User", "Computer"][..]);
        graph.node_indexes = vec![Index::new("name", IndexType::TextSearch)];
        graph.node_constraints = vec![Constraint::new("objectid", IndexType::BTree)];
        Schema::single(graph)
    }

    fn show_row(name: &str, kind: &str, field: &str, index_type: &str, owner: Option<&str>) -> Vec<Cell> {
        vec![
            Cell::String(name.to_string()),
            Cell::String(index_type.to_string()),
            Cell::String("NODE".to_string()),
            Cell::List(vec![Cell::String(kind.to_string())]),
            Cell::List(vec![Cell::String(field.to_string())]),
            owner.map_or(Cell::Null, |owner| Cell::String(owner.to_string())),
        ]
    }

    fn columns() -> Vec<String> {
        ["name", "type", "entityType", "labelsOrTypes", "properties", "owningConstraint"]
            .iter()
            .map(|column| column.to_string())
            .collect()
    }

    #[test]
    fn test_plan_creates_everything_on_empty_database() {
        let statements = plan(&BTreeMap::new(), &desired(&schema()));

        assert_eq!(statements.len(), 4);
        assert!(statements.contains(&"create text index user_name_index if not exists for (n:User) on (n.name)".to_string()));
        assert!(statements.contains(
            &"create constraint computer_objectid_constraint if not exists for (n:Computer) require n.objectid is unique"
                .to_string()
        ));
    }

    #[test]
    fn test_plan_is_empty_when_in_sync() {
        let rows = CypherRows {
            columns: columns(),
            rows: vec![
                show_row("user_name_index", "User", "name", "TEXT", None),
                show_row("computer_name_index", "Computer", "name", "TEXT", None),
                show_row("backing", "User", "objectid", "RANGE", Some("user_objectid_constraint")),
                show_row("backing2", "Computer", "objectid", "RANGE", Some("computer_objectid_constraint")),
                show_row("lookup", "", "", "LOOKUP", None),
            ],
        };

        assert!(plan(&present(&rows).unwrap(), &desired(&schema())).is_empty());
    }

    #[test]
    fn test_plan_recreates_changed_type_and_drops_extra() {
        let rows = CypherRows {
            columns: columns(),
            rows: vec![
                show_row("user_name_index", "User", "name", "RANGE", None),
                show_row("user_email_index", "User", "email", "RANGE", None),
            ],
        };

        let statements = plan(&present(&rows).unwrap(), &desired(&schema()));
        assert!(statements.contains(&"drop index user_name_index if exists".to_string()));
        assert!(statements.contains(&"drop index user_email_index if exists".to_string()));
        assert!(statements.contains(&"create text index user_name_index if not exists for (n:User) on (n.name)".to_string()));
    }
}
