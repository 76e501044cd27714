//! The criteria AST shared by both backends.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::CompileError;
use crate::types::{Kind, Kinds, Value};

/// Pattern variables. Node queries bind `n`; relationship queries bind
/// `s`, `r`, `e`, and optionally the path `p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symbol {
    /// Node of a node query.
    Node,
    /// Relationship of a relationship query.
    Relationship,
    /// Start node of a relationship query.
    Start,
    /// End node of a relationship query.
    End,
    /// Path of a relationship query.
    Path,
}

impl Symbol {
    /// Variable name used in rendered statements.
    pub fn as_str(self) -> &'static str {
        match self {
            Symbol::Node => "n",
            Symbol::Relationship => "r",
            Symbol::Start => "s",
            Symbol::End => "e",
            Symbol::Path => "p",
        }
    }

    /// Whether the symbol binds a node.
    pub fn is_node(self) -> bool {
        matches!(self, Symbol::Node | Symbol::Start | Symbol::End)
    }

    /// Whether the symbol belongs to the relationship side of a query.
    pub fn is_relationship_side(self) -> bool {
        !matches!(self, Symbol::Node)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Equals,
    /// `<>`
    NotEquals,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEquals,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEquals,
    /// Membership in a list.
    In,
    /// Substring match.
    Contains,
    /// Prefix match.
    StartsWith,
    /// Suffix match.
    EndsWith,
}

impl Operator {
    /// Cypher spelling.
    pub fn cypher(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "<>",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEquals => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEquals => "<=",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts with",
            Operator::EndsWith => "ends with",
        }
    }

    /// Whether the operator is a string match.
    pub fn is_string_match(self) -> bool {
        matches!(self, Operator::Contains | Operator::StartsWith | Operator::EndsWith)
    }
}

/// Criteria expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A whole pattern variable.
    Variable(Symbol),
    /// Backend identity of a variable.
    Identity(Symbol),
    /// A property of a variable.
    Property(Symbol, String),
    /// Kinds of a node (`labels(n)`) or the kind of a relationship (`type(r)`).
    KindsOf(Symbol),
    /// A literal value, sent as a parameter.
    Literal(Value),
    /// Binary comparison.
    Comparison {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        operator: Operator,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Conjunction.
    And(Vec<Expr>),
    /// Disjunction.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// The variable carries any of `kinds`.
    KindMatch {
        /// Variable tested.
        symbol: Symbol,
        /// Accepted kinds.
        kinds: Kinds,
    },
    /// The node has at least one relationship in either direction.
    HasRelationships(Symbol),
    /// Operand is null or absent.
    IsNull(Box<Expr>),
    /// Operand is present and not null.
    IsNotNull(Box<Expr>),
    /// Row count of the operand.
    Count {
        /// Counted expression.
        expr: Box<Expr>,
        /// Count distinct values.
        distinct: bool,
    },
    /// Lowercased string operand.
    ToLower(Box<Expr>),
}

impl Expr {
    /// Visit every symbol referenced by the expression.
    pub fn collect_symbols(&self, into: &mut BTreeSet<Symbol>) {
        match self {
            Expr::Variable(symbol)
            | Expr::Identity(symbol)
            | Expr::Property(symbol, _)
            | Expr::KindsOf(symbol)
            | Expr::HasRelationships(symbol) => {
                into.insert(*symbol);
            }
            Expr::KindMatch { symbol, .. } => {
                into.insert(*symbol);
            }
            Expr::Literal(_) => {}
            Expr::Comparison { left, right, .. } => {
                left.collect_symbols(into);
                right.collect_symbols(into);
            }
            Expr::And(items) | Expr::Or(items) => items.iter().for_each(|item| item.collect_symbols(into)),
            Expr::Not(inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::ToLower(inner)
            | Expr::Count { expr: inner, .. } => inner.collect_symbols(into),
        }
    }

    /// Symbols referenced by the expression.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols);
        symbols
    }

    /// Remove empty conjunctions and disjunctions and flatten nested ones.
    ///
    /// Returns `None` when nothing is left.
    pub fn simplify(self) -> Option<Expr> {
        match self {
            Expr::And(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items.into_iter().filter_map(Expr::simplify) {
                    match item {
                        Expr::And(nested) => flat.extend(nested),
                        other => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => None,
                    1 => flat.pop(),
                    _ => Some(Expr::And(flat)),
                }
            }
            Expr::Or(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items.into_iter().filter_map(Expr::simplify) {
                    match item {
                        Expr::Or(nested) => flat.extend(nested),
                        other => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => None,
                    1 => flat.pop(),
                    _ => Some(Expr::Or(flat)),
                }
            }
            Expr::Not(inner) => inner.simplify().map(|inner| Expr::Not(Box::new(inner))),
            other => Some(other),
        }
    }

    /// Split a conjunction into its top-level terms.
    pub fn conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::And(items) => items,
            other => vec![other],
        }
    }

    /// Whether the expression is an aggregate.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Count { .. })
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Ascending,
    /// Descending.
    Descending,
}

/// One `order by` term.
#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    /// Sort key.
    pub expr: Expr,
    /// Direction.
    pub direction: SortDirection,
}

/// Mutation clauses.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Set property values.
    SetProperties {
        /// Target variable.
        symbol: Symbol,
        /// New values.
        properties: BTreeMap<String, Value>,
    },
    /// Remove properties.
    RemoveProperties {
        /// Target variable.
        symbol: Symbol,
        /// Removed keys.
        keys: Vec<String>,
    },
    /// Add node kinds.
    AddKinds {
        /// Target variable.
        symbol: Symbol,
        /// Added kinds.
        kinds: Kinds,
    },
    /// Remove node kinds.
    RemoveKinds {
        /// Target variable.
        symbol: Symbol,
        /// Removed kinds.
        kinds: Kinds,
    },
    /// Delete the matched entities. Nodes are detached first.
    Delete(Vec<Symbol>),
}

impl Update {
    /// Symbols the clause writes to.
    pub fn symbols(&self) -> Vec<Symbol> {
        match self {
            Update::SetProperties { symbol, .. }
            | Update::RemoveProperties { symbol, .. }
            | Update::AddKinds { symbol, .. }
            | Update::RemoveKinds { symbol, .. } => vec![*symbol],
            Update::Delete(symbols) => symbols.clone(),
        }
    }
}

/// Entity creation.
#[derive(Debug, Clone, PartialEq)]
pub enum Create {
    /// Create a node bound to `n`.
    Node {
        /// Node kinds.
        kinds: Kinds,
        /// Node properties.
        properties: BTreeMap<String, Value>,
    },
    /// Create a relationship `r` between the matched `s` and `e`.
    Relationship {
        /// Relationship kind.
        kind: Kind,
        /// Relationship properties.
        properties: BTreeMap<String, Value>,
    },
}

/// Hop semantics of a relationship pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Exactly one hop.
    #[default]
    Single,
    /// Between `min` and `max` hops.
    Bounded {
        /// Minimum depth (at least 1).
        min: u32,
        /// Maximum depth; unbounded when `None`.
        max: Option<u32>,
    },
    /// All shortest paths between each start and end pair.
    AllShortestPaths {
        /// Maximum depth; unbounded when `None`.
        max: Option<u32>,
    },
}

/// Match pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// `(n)`
    Node,
    /// `(s)-[r]->(e)`, optionally bound to the path `p`.
    Relationship(Traversal),
    /// `(s), (e)`: two independent nodes, used to create relationships.
    Endpoints,
}

/// A complete criteria query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Explicit pattern; inferred from the referenced symbols when absent.
    pub pattern: Option<Pattern>,
    /// Filter.
    pub filter: Option<Expr>,
    /// Entity creation.
    pub create: Option<Create>,
    /// Mutation clauses, applied in order.
    pub updates: Vec<Update>,
    /// Return items.
    pub projection: Vec<Expr>,
    /// `return distinct`.
    pub distinct: bool,
    /// Ordering.
    pub order: Vec<SortItem>,
    /// Rows to skip.
    pub skip: Option<u64>,
    /// Row limit.
    pub limit: Option<u64>,
}

impl Query {
    /// An empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query filtered by `filter`.
    pub fn matching(filter: Expr) -> Self {
        Self::new().filter(filter)
    }

    /// Builder: add a filter term (joined with `and`).
    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = match self.filter.take() {
            Some(existing) => Expr::And(vec![existing, filter]).simplify(),
            None => filter.simplify(),
        };
        self
    }

    /// Builder: explicit pattern.
    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Builder: return items.
    pub fn returning(mut self, items: impl IntoIterator<Item = Expr>) -> Self {
        self.projection = items.into_iter().collect();
        self
    }

    /// Builder: distinct return items.
    pub fn returning_distinct(mut self, items: impl IntoIterator<Item = Expr>) -> Self {
        self.distinct = true;
        self.returning(items)
    }

    /// Builder: append an order term.
    pub fn order(mut self, expr: Expr, direction: SortDirection) -> Self {
        self.order.push(SortItem { expr, direction });
        self
    }

    /// Builder: skip rows.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Builder: limit rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder: append a mutation clause.
    pub fn update(mut self, update: Update) -> Self {
        self.updates.push(update);
        self
    }

    /// Builder: create an entity.
    pub fn create(mut self, create: Create) -> Self {
        self.create = Some(create);
        self
    }

    /// Every symbol the query references.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut symbols = BTreeSet::new();
        if let Some(filter) = &self.filter {
            filter.collect_symbols(&mut symbols);
        }
        for item in &self.projection {
            item.collect_symbols(&mut symbols);
        }
        for item in &self.order {
            item.expr.collect_symbols(&mut symbols);
        }
        for update in &self.updates {
            symbols.extend(update.symbols());
        }
        match &self.create {
            Some(Create::Node { .. }) => {
                symbols.insert(Symbol::Node);
            }
            Some(Create::Relationship { .. }) => {
                symbols.insert(Symbol::Start);
                symbols.insert(Symbol::End);
            }
            None => {}
        }
        symbols
    }

    /// The pattern to match: explicit, or inferred from referenced symbols.
    pub fn resolve_pattern(&self) -> Result<Pattern, CompileError> {
        let symbols = self.symbols();
        let has_node = symbols.contains(&Symbol::Node);
        let has_relationship_side = symbols.iter().any(|symbol| symbol.is_relationship_side());

        if has_node && has_relationship_side {
            return Err(CompileError::AmbiguousVariables);
        }

        if let Some(pattern) = self.pattern {
            let valid = match pattern {
                Pattern::Node => !has_relationship_side,
                Pattern::Relationship(_) => !has_node,
                Pattern::Endpoints => {
                    let creates_relationship = matches!(self.create, Some(Create::Relationship { .. }));
                    !has_node
                        && !symbols.contains(&Symbol::Path)
                        && (creates_relationship || !symbols.contains(&Symbol::Relationship))
                }
            };

            return if valid {
                Ok(pattern)
            } else {
                Err(CompileError::Invalid(format!(
                    "pattern {pattern:?} does not bind every referenced variable"
                )))
            };
        }

        if matches!(self.create, Some(Create::Relationship { .. })) {
            return Ok(Pattern::Endpoints);
        }

        if has_relationship_side {
            Ok(Pattern::Relationship(Traversal::Single))
        } else {
            Ok(Pattern::Node)
        }
    }

    /// Whether the query produces any output or side effect.
    pub fn is_empty(&self) -> bool {
        self.projection.is_empty() && self.updates.is_empty() && self.create.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simplify_drops_empty_lists() {
        let expr = Expr::And(vec![
            Expr::Or(vec![]),
            Expr::And(vec![Expr::HasRelationships(Symbol::Node)]),
        ]);
        assert_eq!(expr.simplify(), Some(Expr::HasRelationships(Symbol::Node)));
        assert_eq!(Expr::And(vec![]).simplify(), None);
    }

    #[test]
    fn test_pattern_inference() {
        let node_query = Query::new().returning([Expr::Variable(Symbol::Node)]);
        assert_eq!(node_query.resolve_pattern().unwrap(), Pattern::Node);

        let rel_query = Query::new().returning([Expr::Variable(Symbol::Relationship)]);
        assert_eq!(
            rel_query.resolve_pattern().unwrap(),
            Pattern::Relationship(Traversal::Single)
        );
    }

    #[test]
    fn test_mixed_variables_rejected() {
        let query = Query::matching(Expr::Identity(Symbol::Node)).returning([Expr::Variable(Symbol::Start)]);
        assert_eq!(query.resolve_pattern().unwrap_err(), CompileError::AmbiguousVariables);
    }

    #[test]
    fn test_relationship_create_uses_endpoints() {
        let query = Query::new().create(Create::Relationship {
            kind: Kind::new("MemberOf"),
            properties: BTreeMap::new(),
        });
        assert_eq!(query.resolve_pattern().unwrap(), Pattern::Endpoints);
    }
}
