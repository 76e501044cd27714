//! Error taxonomy shared by every backend.
//!
//! | Class | Variants | Retry |
//! |-------|----------|-------|
//! | Connectivity | `Connection`, `Timeout`, `Cancelled` | caller may retry |
//! | Statement | `Query` | no |
//! | Mapping | `Mapping` | no |
//! | Schema | `Schema` | no |
//! | Usage | `Compile`, `Parse`, `Batch`, `MissingGraphTarget`, `TransactionClosed`, `NoResults` | no |

use crate::types::{Kind, PropertyError};

/// Boxed backend error used as an error source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Crate result alias.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the graph access layer.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A session could not be opened or a connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The caller's deadline passed.
    #[error("operation timed out")]
    Timeout,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The backend rejected a statement.
    #[error("error executing statement ({statement}) with parameters [{}]: {source}", .parameters.join(", "))]
    Query {
        /// Statement text as sent.
        statement: String,
        /// Parameter names (values are not echoed).
        parameters: Vec<String>,
        /// Backend error.
        #[source]
        source: BoxError,
    },

    /// A result cell could not be decoded.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// DDL failed while asserting kinds, namespaces, indexes, or constraints.
    #[error("schema assertion failed for {target}: {reason}")]
    Schema {
        /// What was being asserted.
        target: String,
        /// Failure detail.
        reason: String,
    },

    /// A criteria query could not be compiled.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Query text could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A property access failed.
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// A batch operation was rejected.
    #[error("batch error: {0}")]
    Batch(String),

    /// A statement expected to return rows returned none.
    #[error("no results found")]
    NoResults,

    /// A relational operation was issued without a graph namespace.
    #[error("driver operation requires a graph target to be set")]
    MissingGraphTarget,

    /// The transaction was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,
}

impl GraphError {
    /// Wrap a backend error together with the statement that caused it.
    pub fn query<E>(statement: impl Into<String>, parameters: Vec<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Query {
            statement: statement.into(),
            parameters,
            source: source.into(),
        }
    }

    /// Schema assertion failure.
    pub fn schema(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Schema {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout | Self::Cancelled)
    }
}

/// Result cell decoding failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    /// A kind code with no entry in the kind table.
    #[error("unknown kind id {0}")]
    UnknownKindId(i16),

    /// A kind name with no backend code.
    #[error("unable to map kind {0}")]
    UnknownKind(Kind),

    /// A cell of the wrong shape for the requested type.
    #[error("unsupported scan type: cannot decode {found} into {target}")]
    UnexpectedType {
        /// Requested domain type.
        target: &'static str,
        /// Shape of the cell.
        found: &'static str,
    },

    /// A composite cell is missing fields or has fields of the wrong type.
    #[error("malformed {target} composite: {reason}")]
    MalformedComposite {
        /// Requested domain type.
        target: &'static str,
        /// Detail.
        reason: String,
    },

    /// A numeric cell does not fit the requested type.
    #[error("numeric value {value} does not fit {target}")]
    OutOfRange {
        /// Requested domain type.
        target: &'static str,
        /// Rendered value.
        value: String,
    },

    /// The row has fewer columns than requested.
    #[error("column {index} requested but row has {columns} columns")]
    MissingColumn {
        /// Requested column.
        index: usize,
        /// Columns present.
        columns: usize,
    },
}

/// Criteria compilation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// A node variable is used together with relationship-side variables.
    #[error("query mixes node and relationship query variables")]
    AmbiguousVariables,

    /// Ordering was supplied through both the builder and the projection.
    #[error("order specified twice")]
    OrderSpecifiedTwice,

    /// The construct is not supported by the target backend.
    #[error("unsupported expression for {backend}: {detail}")]
    Unsupported {
        /// Target backend.
        backend: &'static str,
        /// What was not supported.
        detail: String,
    },

    /// The query is structurally invalid.
    #[error("invalid query: {0}")]
    Invalid(String),
}

/// Query text syntax error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("syntax error at offset {offset}: {message}")]
pub struct ParseError {
    /// Byte offset into the query text.
    pub offset: usize,
    /// Detail.
    pub message: String,
}

impl ParseError {
    /// Create a parse error.
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_carries_statement() {
        let err = GraphError::query(
            "match (n) return n",
            vec!["p0".to_string()],
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );

        let rendered = err.to_string();
        assert!(rendered.contains("match (n) return n"));
        assert!(rendered.contains("p0"));
        assert!(rendered.contains("boom"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classes() {
        assert!(GraphError::Timeout.is_retryable());
        assert!(GraphError::Cancelled.is_retryable());
        assert!(GraphError::Connection("refused".into()).is_retryable());
        assert!(!GraphError::MissingGraphTarget.is_retryable());
    }
}
