//! Criteria query builders bound to a transaction.

use super::transaction::Transaction;
use crate::error::{CompileError, GraphError, Result};
use crate::query::{self, Expr, Pattern, Query, SortItem, Symbol, Traversal};
use crate::types::{Direction, Kind, Kinds, Node, Path, Properties, Relationship, ID};

#[derive(Debug, Clone, Default)]
struct Criteria {
    filter: Vec<Expr>,
    order: Option<Vec<SortItem>>,
    offset: Option<u64>,
    limit: Option<u64>,
    error: Option<CompileError>,
}

impl Criteria {
    fn order_by(&mut self, items: Vec<SortItem>) {
        if self.order.is_some() {
            self.error.get_or_insert(CompileError::OrderSpecifiedTwice);
        } else {
            self.order = Some(items);
        }
    }

    fn base(&self) -> Result<Query> {
        if let Some(error) = &self.error {
            return Err(error.clone().into());
        }

        Ok(Query::new().filter(query::and(self.filter.iter().cloned())))
    }

    fn paged(&self, projection: Vec<Expr>) -> Result<Query> {
        let mut query = self.base()?.returning(projection);
        if let Some(order) = &self.order {
            query.order = order.clone();
        }
        query.skip = self.offset;
        query.limit = self.limit;
        Ok(query)
    }
}

/// Node query: `match (n) where … return …`.
#[derive(Debug, Clone)]
pub struct NodeQuery {
    tx: Transaction,
    criteria: Criteria,
}

impl NodeQuery {
    pub(super) fn new(tx: Transaction) -> Self {
        Self {
            tx,
            criteria: Criteria::default(),
        }
    }

    /// Add a filter term; terms are joined with `and`.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.criteria.filter.push(filter);
        self
    }

    /// Result ordering. May be given once.
    pub fn order_by(mut self, items: impl IntoIterator<Item = SortItem>) -> Self {
        self.criteria.order_by(items.into_iter().collect());
        self
    }

    /// Rows to skip.
    pub fn offset(mut self, offset: u64) -> Self {
        self.criteria.offset = Some(offset);
        self
    }

    /// Row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.criteria.limit = Some(limit);
        self
    }

    /// The matching nodes.
    pub async fn fetch(self) -> Result<Vec<Node>> {
        let query = self.criteria.paged(vec![query::node()])?;
        self.tx.execute(&query).await?.column()
    }

    /// IDs of the matching nodes.
    pub async fn fetch_ids(self) -> Result<Vec<ID>> {
        let query = self.criteria.paged(vec![query::node_id()])?;
        self.tx.execute(&query).await?.column()
    }

    /// IDs and kinds of the matching nodes.
    pub async fn fetch_kinds(self) -> Result<Vec<(ID, Kinds)>> {
        let query = self
            .criteria
            .paged(vec![query::node_id(), query::kinds_of(Symbol::Node)])?;
        self.tx.execute(&query).await?.scan_all()
    }

    /// The first matching node, or [`GraphError::NoResults`].
    pub async fn first(mut self) -> Result<Node> {
        self.criteria.limit = Some(1);
        let query = self.criteria.paged(vec![query::node()])?;
        self.tx.execute(&query).await?.first()
    }

    /// Number of matching nodes.
    pub async fn count(self) -> Result<i64> {
        let query = self.criteria.base()?.returning([query::count(query::node())]);
        self.tx.execute(&query).await?.first()
    }

    /// Write property deltas onto every matching node.
    pub async fn update(self, properties: &Properties) -> Result<()> {
        let updates = query::property_updates(Symbol::Node, properties);
        if updates.is_empty() {
            return Ok(());
        }

        let mut query = self.criteria.base()?.pattern(Pattern::Node);
        for update in updates {
            query = query.update(update);
        }
        self.tx.execute(&query).await.map(|_| ())
    }

    /// Delete every matching node with its relationships.
    pub async fn delete(self) -> Result<()> {
        let query = self
            .criteria
            .base()?
            .pattern(Pattern::Node)
            .update(query::delete([Symbol::Node]));
        self.tx.execute(&query).await.map(|_| ())
    }
}

/// Relationship query: `match (s)-[r]->(e) where … return …`.
#[derive(Debug, Clone)]
pub struct RelationshipQuery {
    tx: Transaction,
    criteria: Criteria,
}

impl RelationshipQuery {
    pub(super) fn new(tx: Transaction) -> Self {
        Self {
            tx,
            criteria: Criteria::default(),
        }
    }

    /// Add a filter term over `s`, `r` or `e`.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.criteria.filter.push(filter);
        self
    }

    /// Result ordering. May be given once.
    pub fn order_by(mut self, items: impl IntoIterator<Item = SortItem>) -> Self {
        self.criteria.order_by(items.into_iter().collect());
        self
    }

    /// Rows to skip.
    pub fn offset(mut self, offset: u64) -> Self {
        self.criteria.offset = Some(offset);
        self
    }

    /// Row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.criteria.limit = Some(limit);
        self
    }

    fn single(&self, projection: Vec<Expr>) -> Result<Query> {
        Ok(self
            .criteria
            .paged(projection)?
            .pattern(Pattern::Relationship(Traversal::Single)))
    }

    /// The matching relationships.
    pub async fn fetch(self) -> Result<Vec<Relationship>> {
        let query = self.single(vec![query::relationship()])?;
        self.tx.execute(&query).await?.column()
    }

    /// IDs of the matching relationships.
    pub async fn fetch_ids(self) -> Result<Vec<ID>> {
        let query = self.single(vec![query::relationship_id()])?;
        self.tx.execute(&query).await?.column()
    }

    /// IDs and kinds of the matching relationships.
    pub async fn fetch_kinds(self) -> Result<Vec<(ID, Kind)>> {
        let query = self.single(vec![query::relationship_id(), query::kinds_of(Symbol::Relationship)])?;
        self.tx.execute(&query).await?.scan_all()
    }

    /// Each matching relationship with the node on its far side.
    ///
    /// `Outbound` pairs a relationship with its end node, `Inbound` with its
    /// start node.
    pub async fn fetch_directional(self, direction: Direction) -> Result<Vec<(Relationship, Node)>> {
        let far = match direction {
            Direction::Outbound => query::end(),
            Direction::Inbound => query::start(),
            Direction::Both => {
                return Err(GraphError::Compile(CompileError::Invalid(
                    "directional fetch requires inbound or outbound".to_string(),
                )))
            }
        };

        let query = self.single(vec![query::relationship(), far])?;
        self.tx.execute(&query).await?.scan_all()
    }

    /// All shortest paths between the filtered start and end nodes.
    pub async fn fetch_all_shortest_paths(self) -> Result<Vec<Path>> {
        let query = self
            .criteria
            .paged(vec![query::path()])?
            .pattern(Pattern::Relationship(Traversal::AllShortestPaths { max: None }));
        self.tx.execute(&query).await?.column()
    }

    /// The first matching relationship, or [`GraphError::NoResults`].
    pub async fn first(mut self) -> Result<Relationship> {
        self.criteria.limit = Some(1);
        let query = self.single(vec![query::relationship()])?;
        self.tx.execute(&query).await?.first()
    }

    /// Number of matching relationships.
    pub async fn count(self) -> Result<i64> {
        let query = self
            .criteria
            .base()?
            .pattern(Pattern::Relationship(Traversal::Single))
            .returning([query::count(query::relationship())]);
        self.tx.execute(&query).await?.first()
    }

    /// Write property deltas onto every matching relationship.
    pub async fn update(self, properties: &Properties) -> Result<()> {
        let updates = query::property_updates(Symbol::Relationship, properties);
        if updates.is_empty() {
            return Ok(());
        }

        let mut query = self
            .criteria
            .base()?
            .pattern(Pattern::Relationship(Traversal::Single));
        for update in updates {
            query = query.update(update);
        }
        self.tx.execute(&query).await.map(|_| ())
    }

    /// Delete every matching relationship.
    pub async fn delete(self) -> Result<()> {
        let query = self
            .criteria
            .base()?
            .pattern(Pattern::Relationship(Traversal::Single))
            .update(query::delete([Symbol::Relationship]));
        self.tx.execute(&query).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_twice_is_rejected() {
        let mut criteria = Criteria::default();
        criteria.order_by(vec![query::asc(query::node_property("name"))]);
        criteria.order_by(vec![query::desc(query::node_property("name"))]);

        let err = criteria.paged(vec![query::node()]).unwrap_err();
        assert!(matches!(err, GraphError::Compile(CompileError::OrderSpecifiedTwice)));
    }

    #[test]
    fn test_paged_carries_pagination() {
        let mut criteria = Criteria::default();
        criteria.filter.push(query::kind(Symbol::Node, "User"));
        criteria.offset = Some(10);
        criteria.limit = Some(5);

        let query = criteria.paged(vec![query::node_id()]).unwrap();
        assert_eq!(query.skip, Some(10));
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.filter, Some(query::kind(Symbol::Node, "User")));
    }
}
