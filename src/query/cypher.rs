//! Native engine strategy: render criteria as Cypher text plus parameters.

use std::collections::BTreeMap;

use super::model::{Create, Expr, Pattern, Query, SortDirection, Symbol, Traversal, Update};
use crate::error::CompileError;
use crate::types::{Kinds, Value};

/// Rendered Cypher statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    /// Statement text.
    pub text: String,
    /// Parameters named `p0`, `p1`, ...
    pub parameters: BTreeMap<String, Value>,
}

impl Statement {
    /// A statement with parameters.
    pub fn new(text: impl Into<String>, parameters: BTreeMap<String, Value>) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    /// Parameter names in sorted order.
    pub fn parameter_keys(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }
}

/// Quote an identifier with backticks when it is not a plain name.
pub fn quote_identifier(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .map_or(false, |first| first.is_ascii_alphabetic() || first == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// `:A:B` label suffix.
pub fn label_suffix(kinds: &Kinds) -> String {
    kinds.iter().map(|kind| format!(":{}", quote_identifier(kind.as_str()))).collect()
}

/// `:A|B` relationship type suffix.
pub fn type_suffix(kinds: &Kinds) -> String {
    if kinds.is_empty() {
        return String::new();
    }

    let names: Vec<String> = kinds.iter().map(|kind| quote_identifier(kind.as_str())).collect();
    format!(":{}", names.join("|"))
}

struct Renderer {
    parameters: BTreeMap<String, Value>,
}

impl Renderer {
    fn parameter(&mut self, value: Value) -> String {
        let name = format!("p{}", self.parameters.len());
        let rendered = format!("${name}");
        self.parameters.insert(name, value);
        rendered
    }

    fn expr(&mut self, expr: &Expr, nested: bool) -> Result<String, CompileError> {
        Ok(match expr {
            Expr::Variable(symbol) => symbol.as_str().to_string(),
            Expr::Identity(symbol) => format!("id({})", symbol.as_str()),
            Expr::Property(symbol, name) => format!("{}.{}", symbol.as_str(), quote_identifier(name)),
            Expr::KindsOf(symbol) => match symbol {
                Symbol::Relationship => "type(r)".to_string(),
                Symbol::Path => {
                    return Err(CompileError::Unsupported {
                        backend: "cypher",
                        detail: "kinds of a path".into(),
                    })
                }
                node => format!("labels({})", node.as_str()),
            },
            Expr::Literal(value) => self.parameter(value.clone()),
            Expr::Comparison { left, operator, right } => {
                let left = self.expr(left, true)?;
                let right = self.expr(right, true)?;
                format!("{left} {} {right}", operator.cypher())
            }
            Expr::And(items) => self.join(items, " and ", nested)?,
            Expr::Or(items) => self.join(items, " or ", nested)?,
            Expr::Not(inner) => format!("not ({})", self.expr(inner, false)?),
            Expr::KindMatch { symbol, kinds } => self.kind_match(*symbol, kinds, nested)?,
            Expr::HasRelationships(symbol) => format!("({})<-[]->()", symbol.as_str()),
            Expr::IsNull(inner) => format!("{} is null", self.expr(inner, true)?),
            Expr::IsNotNull(inner) => format!("{} is not null", self.expr(inner, true)?),
            Expr::Count { expr, distinct } => {
                let inner = self.expr(expr, false)?;
                if *distinct {
                    format!("count(distinct {inner})")
                } else {
                    format!("count({inner})")
                }
            }
            Expr::ToLower(inner) => format!("toLower({})", self.expr(inner, false)?),
        })
    }

    fn join(&mut self, items: &[Expr], separator: &str, nested: bool) -> Result<String, CompileError> {
        let rendered = items
            .iter()
            .map(|item| self.expr(item, true))
            .collect::<Result<Vec<_>, _>>()?;

        let joined = rendered.join(separator);
        Ok(if nested && rendered.len() > 1 {
            format!("({joined})")
        } else {
            joined
        })
    }

    fn kind_match(&mut self, symbol: Symbol, kinds: &Kinds, nested: bool) -> Result<String, CompileError> {
        if kinds.is_empty() {
            return Err(CompileError::Invalid("kind match without kinds".into()));
        }

        match symbol {
            Symbol::Relationship => {
                if kinds.len() == 1 {
                    let parameter = self.parameter(Value::from(kinds.strings()[0].clone()));
                    Ok(format!("type(r) = {parameter}"))
                } else {
                    let parameter = self.parameter(Value::from(kinds.clone()));
                    Ok(format!("type(r) in {parameter}"))
                }
            }
            Symbol::Path => Err(CompileError::Unsupported {
                backend: "cypher",
                detail: "kind match on a path".into(),
            }),
            node => {
                let terms: Vec<String> = kinds
                    .iter()
                    .map(|kind| format!("{}:{}", node.as_str(), quote_identifier(kind.as_str())))
                    .collect();
                let joined = terms.join(" or ");
                Ok(if nested && terms.len() > 1 {
                    format!("({joined})")
                } else {
                    joined
                })
            }
        }
    }

    fn update(&mut self, update: &Update) -> Result<String, CompileError> {
        Ok(match update {
            Update::SetProperties { symbol, properties } => {
                let mut assignments = Vec::with_capacity(properties.len());
                for (key, value) in properties {
                    let parameter = self.parameter(value.clone());
                    assignments.push(format!("{}.{} = {parameter}", symbol.as_str(), quote_identifier(key)));
                }
                format!("set {}", assignments.join(", "))
            }
            Update::RemoveProperties { symbol, keys } => {
                let removals: Vec<String> = keys
                    .iter()
                    .map(|key| format!("{}.{}", symbol.as_str(), quote_identifier(key)))
                    .collect();
                format!("remove {}", removals.join(", "))
            }
            Update::AddKinds { symbol, kinds } => format!("set {}{}", symbol.as_str(), label_suffix(kinds)),
            Update::RemoveKinds { symbol, kinds } => format!("remove {}{}", symbol.as_str(), label_suffix(kinds)),
            Update::Delete(symbols) => {
                let names: Vec<&str> = symbols.iter().map(|symbol| symbol.as_str()).collect();
                if symbols.iter().any(|symbol| symbol.is_node()) {
                    format!("detach delete {}", names.join(", "))
                } else {
                    format!("delete {}", names.join(", "))
                }
            }
        })
    }
}

fn depth_range(traversal: Traversal) -> String {
    match traversal {
        Traversal::Single => String::new(),
        Traversal::Bounded { min, max } => match (min, max) {
            (1, None) => "*".to_string(),
            (min, None) => format!("*{min}.."),
            (min, Some(max)) if min == max => format!("*{min}"),
            (min, Some(max)) => format!("*{min}..{max}"),
        },
        Traversal::AllShortestPaths { max } => match max {
            Some(max) => format!("*..{max}"),
            None => "*".to_string(),
        },
    }
}

/// Pull the first top-level relationship kind predicate out of the filter.
fn lift_relationship_kinds(filter: Option<Expr>) -> (Kinds, Option<Expr>) {
    let Some(filter) = filter else {
        return (Kinds::new(), None);
    };

    let mut lifted = None;
    let mut remaining = Vec::new();
    for term in filter.conjuncts() {
        match term {
            Expr::KindMatch {
                symbol: Symbol::Relationship,
                kinds,
            } if lifted.is_none() && !kinds.is_empty() => lifted = Some(kinds),
            other => remaining.push(other),
        }
    }

    (lifted.unwrap_or_default(), Expr::And(remaining).simplify())
}

/// Render a criteria query.
pub fn render(query: &Query) -> Result<Statement, CompileError> {
    if query.is_empty() {
        return Err(CompileError::Invalid("query has no return, create, or update clause".into()));
    }

    if !query.order.is_empty() && query.projection.is_empty() {
        return Err(CompileError::Invalid("order by requires a return clause".into()));
    }

    let pattern = query.resolve_pattern()?;
    let symbols = query.symbols();
    let mut renderer = Renderer {
        parameters: BTreeMap::new(),
    };
    let mut clauses = Vec::new();

    let filter = query.filter.clone().and_then(Expr::simplify);
    let filter = match pattern {
        Pattern::Node => {
            let standalone_create = matches!(query.create, Some(Create::Node { .. }));
            if standalone_create && filter.is_some() {
                return Err(CompileError::Invalid("node creation does not take a filter".into()));
            }
            if !standalone_create {
                clauses.push("match (n)".to_string());
            }
            filter
        }
        Pattern::Relationship(traversal) => {
            let (kinds, filter) = lift_relationship_kinds(filter);
            let hop = format!("(s)-[r{}{}]->(e)", type_suffix(&kinds), depth_range(traversal));
            clauses.push(match traversal {
                Traversal::AllShortestPaths { .. } => format!("match p = allShortestPaths({hop})"),
                _ if symbols.contains(&Symbol::Path) => format!("match p = {hop}"),
                _ => format!("match {hop}"),
            });
            filter
        }
        Pattern::Endpoints => {
            clauses.push("match (s), (e)".to_string());
            filter
        }
    };

    if let Some(filter) = &filter {
        clauses.push(format!("where {}", renderer.expr(filter, false)?));
    }

    match &query.create {
        Some(Create::Node { kinds, properties }) => {
            if properties.is_empty() {
                clauses.push(format!("create (n{})", label_suffix(kinds)));
            } else {
                let parameter = renderer.parameter(Value::Map(properties.clone()));
                clauses.push(format!("create (n{} {parameter})", label_suffix(kinds)));
            }
        }
        Some(Create::Relationship { kind, properties }) => {
            let kind = quote_identifier(kind.as_str());
            if properties.is_empty() {
                clauses.push(format!("create (s)-[r:{kind}]->(e)"));
            } else {
                let parameter = renderer.parameter(Value::Map(properties.clone()));
                clauses.push(format!("create (s)-[r:{kind} {parameter}]->(e)"));
            }
        }
        None => {}
    }

    for update in &query.updates {
        clauses.push(renderer.update(update)?);
    }

    if !query.projection.is_empty() {
        let items = query
            .projection
            .iter()
            .map(|item| renderer.expr(item, false))
            .collect::<Result<Vec<_>, _>>()?;

        let distinct = if query.distinct { "distinct " } else { "" };
        clauses.push(format!("return {distinct}{}", items.join(", ")));

        if !query.order.is_empty() {
            let terms = query
                .order
                .iter()
                .map(|item| {
                    let direction = match item.direction {
                        SortDirection::Ascending => "asc",
                        SortDirection::Descending => "desc",
                    };
                    renderer.expr(&item.expr, false).map(|expr| format!("{expr} {direction}"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            clauses.push(format!("order by {}", terms.join(", ")));
        }
    }

    if let Some(skip) = query.skip {
        clauses.push(format!("skip {skip}"));
    }

    if let Some(limit) = query.limit {
        clauses.push(format!("limit {limit}"));
    }

    Ok(Statement {
        text: clauses.join(" "),
        parameters: renderer.parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::*;
    use crate::types::{Kind, ID};

    #[test]
    fn test_count_with_pagination() {
        let query = Query::matching(in_ids(node_id(), &[ID::new(1), ID::new(2)]))
            .returning([count(node())])
            .skip(20)
            .limit(10);

        let statement = render(&query).unwrap();
        assert_eq!(statement.text, "match (n) where id(n) in $p0 return count(n) skip 20 limit 10");
        assert_eq!(statement.parameters["p0"], Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_update_clause_order() {
        let mut properties = BTreeMap::new();
        properties.insert("test_1".to_string(), Value::from("value"));

        let query = Query::matching(equals(node_id(), ID::new(1)))
            .update(add_kinds(Symbol::Node, Kinds::from(&["User", "Domain", "Computer"][..])))
            .update(set_properties(Symbol::Node, properties))
            .update(delete_properties(Symbol::Node, ["test_2"]));

        assert_eq!(
            render(&query).unwrap().text,
            "match (n) where id(n) = $p0 set n:User:Domain:Computer set n.test_1 = $p1 remove n.test_2"
        );
    }

    #[test]
    fn test_has_relationships_and_order() {
        let query = Query::matching(has_relationships(Symbol::Node))
            .returning([node()])
            .order(node_property("value_1"), SortDirection::Ascending)
            .order(node_property("value_2"), SortDirection::Descending)
            .skip(20)
            .limit(10);

        assert_eq!(
            render(&query).unwrap().text,
            "match (n) where (n)<-[]->() return n order by n.value_1 asc, n.value_2 desc skip 20 limit 10"
        );

        let negated = Query::matching(not(has_relationships(Symbol::Node))).returning([node()]);
        assert_eq!(render(&negated).unwrap().text, "match (n) where not ((n)<-[]->()) return n");
    }

    #[test]
    fn test_all_shortest_paths_lifts_relationship_kinds() {
        let query = Query::matching(and([
            equals(start_property("objectid"), "A"),
            kind_in(Symbol::Start, [Kind::new("A"), Kind::new("B")]),
            kind_in(Symbol::Relationship, [Kind::new("R1"), Kind::new("R2")]),
            equals(end_property("objectid"), "B"),
            kind(Symbol::End, "B"),
        ]))
        .pattern(Pattern::Relationship(Traversal::AllShortestPaths { max: None }))
        .returning([path()]);

        assert_eq!(
            render(&query).unwrap().text,
            "match p = allShortestPaths((s)-[r:R1|R2*]->(e)) where s.objectid = $p0 and (s:A or s:B) and e.objectid = $p1 and e:B return p"
        );
    }

    #[test]
    fn test_negated_string_match() {
        let query = Query::matching(not(string_starts_with(node_property("name"), "adm"))).returning([node()]);
        assert_eq!(
            render(&query).unwrap().text,
            "match (n) where not (n.name starts with $p0) return n"
        );
    }

    #[test]
    fn test_create_node_with_properties() {
        let query = Query::new()
            .create(create_node(
                [Kind::new("Base"), Kind::new("User")],
                &crate::types::Properties::new().with("name", "alice"),
            ))
            .returning([node()]);

        let statement = render(&query).unwrap();
        assert_eq!(statement.text, "create (n:Base:User $p0) return n");
    }

    #[test]
    fn test_create_relationship_between_ids() {
        let query = Query::matching(and([equals(start_id(), ID::new(1)), equals(end_id(), ID::new(2))]))
            .create(create_relationship("MemberOf", &crate::types::Properties::new()))
            .returning([relationship()]);

        assert_eq!(
            render(&query).unwrap().text,
            "match (s), (e) where id(s) = $p0 and id(e) = $p1 create (s)-[r:MemberOf]->(e) return r"
        );
    }

    #[test]
    fn test_delete_detaches_nodes() {
        let query = Query::matching(equals(node_id(), ID::new(5))).update(delete([Symbol::Node]));
        assert_eq!(render(&query).unwrap().text, "match (n) where id(n) = $p0 detach delete n");

        let query = Query::matching(equals(relationship_id(), ID::new(5))).update(delete([Symbol::Relationship]));
        assert_eq!(render(&query).unwrap().text, "match (s)-[r]->(e) where id(r) = $p0 delete r");
    }

    #[test]
    fn test_bounded_traversal_binds_path() {
        let query = Query::matching(equals(start_id(), ID::new(1)))
            .pattern(Pattern::Relationship(Traversal::Bounded { min: 1, max: Some(3) }))
            .returning([path()]);

        assert_eq!(
            render(&query).unwrap().text,
            "match p = (s)-[r*1..3]->(e) where id(s) = $p0 return p"
        );
    }

    #[test]
    fn test_zero_lower_bound_is_kept() {
        assert_eq!(depth_range(Traversal::Bounded { min: 0, max: None }), "*0..");
        assert_eq!(depth_range(Traversal::Bounded { min: 0, max: Some(2) }), "*0..2");
        assert_eq!(depth_range(Traversal::Bounded { min: 1, max: None }), "*");
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(matches!(render(&Query::new()), Err(CompileError::Invalid(_))));
    }
}
