//! Decode rules keyed on the requested domain type.
//!
//! Each [`FromCell`] impl lists the cell shapes it accepts. Anything else is
//! a [`MappingError::UnexpectedType`]; there is no fallback coercion.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

use super::cell::{Cell, NativeNode, NativePath, NativeRelationship};
use super::KindMapper;
use crate::error::MappingError;
use crate::types::{Kind, Kinds, Node, Path, Properties, Relationship, Value, ID};

/// Decode one result cell into a domain value.
pub trait FromCell: Sized {
    /// Decode `cell`, resolving kind codes through `kinds`.
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError>;
}

/// Decode a whole row into a tuple.
pub trait FromRow: Sized {
    /// Decode `cells` in column order.
    fn from_row(cells: &[Cell], kinds: &dyn KindMapper) -> Result<Self, MappingError>;
}

fn unexpected(target: &'static str, cell: &Cell) -> MappingError {
    MappingError::UnexpectedType {
        target,
        found: cell.shape(),
    }
}

fn malformed(target: &'static str, reason: impl Into<String>) -> MappingError {
    MappingError::MalformedComposite {
        target,
        reason: reason.into(),
    }
}

fn required<'a>(cell: &'a Cell, target: &'static str, field: &str) -> Result<&'a Cell, MappingError> {
    cell.field(field)
        .ok_or_else(|| malformed(target, format!("missing field {field}")))
}

impl FromCell for Cell {
    fn from_cell(cell: &Cell, _: &dyn KindMapper) -> Result<Self, MappingError> {
        Ok(cell.clone())
    }
}

impl FromCell for Value {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Null => Ok(Value::Null),
            Cell::Bool(b) => Ok(Value::Bool(*b)),
            Cell::Int(i) => Ok(Value::Int(*i)),
            Cell::Float(f) => Ok(Value::Float(*f)),
            Cell::String(s) => Ok(Value::String(s.clone())),
            Cell::DateTime(dt) => Ok(Value::DateTime(*dt)),
            Cell::List(items) => items
                .iter()
                .map(|item| Value::from_cell(item, kinds))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Cell::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), Value::from_cell(v, kinds)?)))
                .collect::<Result<BTreeMap<_, _>, MappingError>>()
                .map(Value::Map),
            other => Err(unexpected("value", other)),
        }
    }
}

impl FromCell for bool {
    fn from_cell(cell: &Cell, _: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Bool(b) => Ok(*b),
            other => Err(unexpected("bool", other)),
        }
    }
}

impl FromCell for i64 {
    fn from_cell(cell: &Cell, _: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Int(i) => Ok(*i),
            Cell::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 => Ok(*f as i64),
            Cell::Float(f) => Err(MappingError::OutOfRange {
                target: "i64",
                value: f.to_string(),
            }),
            other => Err(unexpected("i64", other)),
        }
    }
}

macro_rules! narrow_int {
    ($($ty:ty),*) => {
        $(
            impl FromCell for $ty {
                fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
                    let wide = i64::from_cell(cell, kinds).map_err(|err| match err {
                        MappingError::UnexpectedType { found, .. } => MappingError::UnexpectedType {
                            target: stringify!($ty),
                            found,
                        },
                        other => other,
                    })?;

                    <$ty>::try_from(wide).map_err(|_| MappingError::OutOfRange {
                        target: stringify!($ty),
                        value: wide.to_string(),
                    })
                }
            }
        )*
    };
}

narrow_int!(i16, i32, u32, u64, usize);

impl FromCell for f64 {
    fn from_cell(cell: &Cell, _: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Float(f) => Ok(*f),
            Cell::Int(i) => Ok(*i as f64),
            other => Err(unexpected("f64", other)),
        }
    }
}

impl FromCell for String {
    fn from_cell(cell: &Cell, _: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::String(s) => Ok(s.clone()),
            other => Err(unexpected("string", other)),
        }
    }
}

impl FromCell for DateTime<Utc> {
    fn from_cell(cell: &Cell, _: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::DateTime(dt) => Ok(*dt),
            Cell::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| unexpected("datetime", cell)),
            Cell::Int(secs) => Utc.timestamp_opt(*secs, 0).single().ok_or_else(|| MappingError::OutOfRange {
                target: "datetime",
                value: secs.to_string(),
            }),
            Cell::Float(secs) => {
                let whole = secs.trunc() as i64;
                let nanos = (secs.fract() * 1e9).round() as u32;
                Utc.timestamp_opt(whole, nanos).single().ok_or_else(|| MappingError::OutOfRange {
                    target: "datetime",
                    value: secs.to_string(),
                })
            }
            other => Err(unexpected("datetime", other)),
        }
    }
}

impl FromCell for ID {
    fn from_cell(cell: &Cell, _: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Int(i) => ID::try_from(*i).map_err(|_| MappingError::OutOfRange {
                target: "id",
                value: i.to_string(),
            }),
            other => Err(unexpected("id", other)),
        }
    }
}

impl FromCell for Kind {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::String(name) => Ok(Kind::new(name)),
            Cell::Int(code) => {
                let code = i16::try_from(*code).map_err(|_| MappingError::OutOfRange {
                    target: "kind",
                    value: code.to_string(),
                })?;
                kinds.kind_for_id(code).ok_or(MappingError::UnknownKindId(code))
            }
            other => Err(unexpected("kind", other)),
        }
    }
}

impl FromCell for Kinds {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Null => Ok(Kinds::new()),
            Cell::List(items) => items.iter().map(|item| Kind::from_cell(item, kinds)).collect(),
            other => Err(unexpected("kinds", other)),
        }
    }
}

impl FromCell for Properties {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Null => Ok(Properties::new()),
            Cell::Map(_) => match Value::from_cell(cell, kinds)? {
                Value::Map(map) => Ok(Properties::from_map(map)),
                _ => Err(unexpected("properties", cell)),
            },
            other => Err(unexpected("properties", other)),
        }
    }
}

fn native_node(node: &NativeNode) -> Result<Node, MappingError> {
    let id = ID::try_from(node.id).map_err(|_| MappingError::OutOfRange {
        target: "node",
        value: node.id.to_string(),
    })?;
    let kinds: Kinds = node.labels.iter().map(Kind::new).collect();

    Ok(Node::new(id, Properties::from_map(node.properties.clone()), kinds))
}

fn native_relationship(rel: &NativeRelationship) -> Result<Relationship, MappingError> {
    let id = |raw: i64| {
        ID::try_from(raw).map_err(|_| MappingError::OutOfRange {
            target: "relationship",
            value: raw.to_string(),
        })
    };

    Ok(Relationship::new(
        id(rel.id)?,
        id(rel.start_id)?,
        id(rel.end_id)?,
        Properties::from_map(rel.properties.clone()),
        Kind::new(&rel.rel_type),
    ))
}

fn native_path(path: &NativePath) -> Result<Path, MappingError> {
    let nodes = path.nodes.iter().map(native_node).collect::<Result<Vec<_>, _>>()?;
    let edges = path
        .relationships
        .iter()
        .map(native_relationship)
        .collect::<Result<Vec<_>, _>>()?;

    Path::new(nodes, edges).ok_or_else(|| malformed("path", "node count must be edge count + 1"))
}

impl FromCell for Node {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Node(node) => native_node(node),
            Cell::Map(_) => {
                let id = ID::from_cell(required(cell, "node", "id")?, kinds)?;
                let node_kinds = Kinds::from_cell(required(cell, "node", "kind_ids")?, kinds)?;
                let properties = Properties::from_cell(cell.field("properties").unwrap_or(&Cell::Null), kinds)?;

                Ok(Node::new(id, properties, node_kinds))
            }
            other => Err(unexpected("node", other)),
        }
    }
}

impl FromCell for Relationship {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Relationship(rel) => native_relationship(rel),
            Cell::Map(_) => {
                let id = ID::from_cell(required(cell, "relationship", "id")?, kinds)?;
                let start_id = ID::from_cell(required(cell, "relationship", "start_id")?, kinds)?;
                let end_id = ID::from_cell(required(cell, "relationship", "end_id")?, kinds)?;
                let kind = Kind::from_cell(required(cell, "relationship", "kind_id")?, kinds)?;
                let properties = Properties::from_cell(cell.field("properties").unwrap_or(&Cell::Null), kinds)?;

                Ok(Relationship::new(id, start_id, end_id, properties, kind))
            }
            other => Err(unexpected("relationship", other)),
        }
    }
}

impl FromCell for Path {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Path(path) => native_path(path),
            Cell::Map(_) => {
                let nodes = Vec::<Node>::from_cell(required(cell, "path", "nodes")?, kinds)?;
                let edges = Vec::<Relationship>::from_cell(required(cell, "path", "edges")?, kinds)?;

                Path::new(nodes, edges).ok_or_else(|| malformed("path", "node count must be edge count + 1"))
            }
            other => Err(unexpected("path", other)),
        }
    }
}

impl<T: FromCell> FromCell for Vec<T> {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Null => Ok(Vec::new()),
            Cell::List(items) => items.iter().map(|item| T::from_cell(item, kinds)).collect(),
            other => Err(unexpected("list", other)),
        }
    }
}

impl<T: FromCell> FromCell for Option<T> {
    fn from_cell(cell: &Cell, kinds: &dyn KindMapper) -> Result<Self, MappingError> {
        match cell {
            Cell::Null => Ok(None),
            other => T::from_cell(other, kinds).map(Some),
        }
    }
}

macro_rules! tuple_row {
    ($len:expr => $($name:ident $idx:tt),+) => {
        impl<$($name: FromCell),+> FromRow for ($($name,)+) {
            fn from_row(cells: &[Cell], kinds: &dyn KindMapper) -> Result<Self, MappingError> {
                if cells.len() < $len {
                    return Err(MappingError::MissingColumn {
                        index: $len - 1,
                        columns: cells.len(),
                    });
                }

                Ok(($($name::from_cell(&cells[$idx], kinds)?,)+))
            }
        }
    };
}

tuple_row!(1 => A 0);
tuple_row!(2 => A 0, B 1);
tuple_row!(3 => A 0, B 1, C 2);
tuple_row!(4 => A 0, B 1, C 2, D 3);
tuple_row!(5 => A 0, B 1, C 2, D 3, E 4);
tuple_row!(6 => A 0, B 1, C 2, D 3, E 4, F 5);
