//! Result and value mapping.
//!
//! Backends return rows of [`Cell`]s. The domain layer asks for the type it
//! wants ([`Node`](crate::types::Node), [`Kind`], a timestamp, a tuple) and
//! the matching [`FromCell`] rule decodes it, resolving relational kind codes
//! through a [`KindMapper`].

pub mod cell;
pub mod decode;

use std::collections::HashMap;
use std::sync::Arc;

pub use cell::{Cell, NativeNode, NativePath, NativeRelationship};
pub use decode::{FromCell, FromRow};

use crate::error::{GraphError, MappingError, Result};
use crate::types::{Kind, Kinds};

/// Bidirectional kind name / backend code lookup.
pub trait KindMapper: Send + Sync {
    /// Kind for a backend code.
    fn kind_for_id(&self, id: i16) -> Option<Kind>;

    /// Backend code for a kind.
    fn id_for_kind(&self, kind: &Kind) -> Option<i16>;

    /// Resolve several codes; any unknown code is an error.
    fn map_kind_ids(&self, ids: &[i16]) -> std::result::Result<Kinds, MappingError> {
        ids.iter()
            .map(|id| self.kind_for_id(*id).ok_or(MappingError::UnknownKindId(*id)))
            .collect()
    }

    /// Resolve several kinds; any unmapped kind is an error.
    fn map_kinds(&self, kinds: &Kinds) -> std::result::Result<Vec<i16>, MappingError> {
        kinds
            .iter()
            .map(|kind| self.id_for_kind(kind).ok_or_else(|| MappingError::UnknownKind(kind.clone())))
            .collect()
    }
}

/// Mapper for the native engine, where kinds travel as label names.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelMapper;

impl KindMapper for LabelMapper {
    fn kind_for_id(&self, _: i16) -> Option<Kind> {
        None
    }

    fn id_for_kind(&self, _: &Kind) -> Option<i16> {
        None
    }
}

/// Fixed code table, used for decoding snapshots and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticKindMapper {
    by_id: HashMap<i16, Kind>,
    by_kind: HashMap<Kind, i16>,
}

impl StaticKindMapper {
    /// Build from `(code, name)` pairs.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i16, S)>,
        S: AsRef<str>,
    {
        let mut mapper = Self::default();
        for (id, name) in entries {
            let kind = Kind::new(name);
            mapper.by_kind.insert(kind.clone(), id);
            mapper.by_id.insert(id, kind);
        }
        mapper
    }
}

impl KindMapper for StaticKindMapper {
    fn kind_for_id(&self, id: i16) -> Option<Kind> {
        self.by_id.get(&id).cloned()
    }

    fn id_for_kind(&self, kind: &Kind) -> Option<i16> {
        self.by_kind.get(kind).copied()
    }
}

/// Rows returned by one statement, plus the mapper needed to decode them.
#[derive(Clone)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    kinds: Arc<dyn KindMapper>,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns)
            .field("rows", &self.rows.len())
            .finish()
    }
}

impl QueryResult {
    /// Wrap decoded rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>, kinds: Arc<dyn KindMapper>) -> Self {
        Self { columns, rows, kinds }
    }

    /// A result with no rows.
    pub fn empty(kinds: Arc<dyn KindMapper>) -> Self {
        Self::new(Vec::new(), Vec::new(), kinds)
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Borrow the raw rows.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row {
            cells,
            kinds: self.kinds.as_ref(),
        })
    }

    /// Consume into raw rows.
    pub fn into_rows(self) -> Vec<Vec<Cell>> {
        self.rows
    }

    /// Decode every row as a tuple.
    pub fn scan_all<T: FromRow>(&self) -> Result<Vec<T>> {
        self.rows().map(|row| row.scan()).collect()
    }

    /// Decode the first column of every row.
    pub fn column<T: FromCell>(&self) -> Result<Vec<T>> {
        self.rows().map(|row| row.get(0)).collect()
    }

    /// Decode the first column of the first row.
    pub fn first<T: FromCell>(&self) -> Result<T> {
        self.rows().next().ok_or(GraphError::NoResults)?.get(0)
    }
}

/// A borrowed row bound to its kind mapper.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    cells: &'a [Cell],
    kinds: &'a dyn KindMapper,
}

impl<'a> Row<'a> {
    /// Raw cells.
    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }

    /// Decode column `index`.
    pub fn get<T: FromCell>(&self, index: usize) -> Result<T> {
        let cell = self.cells.get(index).ok_or(MappingError::MissingColumn {
            index,
            columns: self.cells.len(),
        })?;

        Ok(T::from_cell(cell, self.kinds)?)
    }

    /// Decode the whole row.
    pub fn scan<T: FromRow>(&self) -> Result<T> {
        Ok(T::from_row(self.cells, self.kinds)?)
    }

    /// Render the row as a JSON array.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.cells.iter().map(Cell::to_json).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Node;

    #[test]
    fn test_first_on_empty_is_no_results() {
        let result = QueryResult::empty(Arc::new(LabelMapper));
        assert!(matches!(result.first::<i64>(), Err(GraphError::NoResults)));
    }

    #[test]
    fn test_scan_all_tuples() {
        let result = QueryResult::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Cell::Int(1), Cell::from("a")],
                vec![Cell::Int(2), Cell::from("b")],
            ],
            Arc::new(LabelMapper),
        );

        let rows: Vec<(i64, String)> = result.scan_all().unwrap();
        assert_eq!(rows, vec![(1, "a".to_string()), (2, "b".to_string())]);
    }

    #[test]
    fn test_unmapped_kind_reported_by_name() {
        let mapper = StaticKindMapper::new([(1, "Base")]);
        let err = mapper
            .map_kinds(&Kinds::from(&["Base", "User"][..]))
            .unwrap_err();
        assert_eq!(err, MappingError::UnknownKind(Kind::new("User")));
    }

    #[test]
    fn test_wrong_shape_for_node() {
        let result = QueryResult::new(vec!["n".into()], vec![vec![Cell::Int(4)]], Arc::new(LabelMapper));
        assert!(matches!(
            result.first::<Node>(),
            Err(GraphError::Mapping(MappingError::UnexpectedType { target: "node", found: "int" }))
        ));
    }
}
