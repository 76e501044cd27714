//! Query text frontend.
//!
//! Parses the supported Cypher subset into a syntax tree and lowers it onto
//! the criteria model, so raw text and builder queries share one compiler.
//! User variable names are bound positionally: a lone node pattern binds
//! `n`, a hop binds `s`, `r`, `e` (swapped for `<-`), two comma separated
//! nodes bind `s` and `e`, and `p = ` binds the path.

use std::collections::BTreeMap;

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, map_res, not, opt, recognize, success, value},
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::model::{Expr, Operator, Pattern, Query, SortDirection, SortItem, Symbol, Traversal, Update};
use crate::error::ParseError;
use crate::types::{Kind, Kinds, Value};

// ─── Syntax tree ──────────────────────────────────────────────────────────────

/// Positions are the length of the remaining input, converted to offsets
/// once the full text length is known.
#[derive(Debug, Clone, PartialEq)]
enum Term {
    Variable { name: String, at: usize },
    Property { name: String, key: String, at: usize },
    Labels { name: String, labels: Vec<String>, at: usize },
    Call { function: String, distinct: bool, args: Vec<Term>, at: usize },
    Literal(Value),
    Parameter { name: String, at: usize },
    List(Vec<Term>),
    Compare { left: Box<Term>, operator: Operator, right: Box<Term> },
    IsNull { term: Box<Term>, negated: bool },
    And(Vec<Term>),
    Or(Vec<Term>),
    Not(Box<Term>),
}

#[derive(Debug, Clone)]
struct NodePattern {
    name: Option<(usize, String)>,
    labels: Vec<String>,
    properties: Vec<(String, Term)>,
}

#[derive(Debug, Clone)]
struct RelationshipPattern {
    name: Option<(usize, String)>,
    types: Vec<String>,
    properties: Vec<(String, Term)>,
    range: Option<(Option<u32>, Option<u32>)>,
    inbound: bool,
}

#[derive(Debug, Clone)]
struct MatchPattern {
    path: Option<(usize, String)>,
    shortest: bool,
    first: NodePattern,
    hop: Option<(RelationshipPattern, NodePattern)>,
    second: Option<NodePattern>,
}

#[derive(Debug, Clone)]
enum RawUpdate {
    SetProperty { at: usize, name: String, key: String, value: Term },
    AddLabels { at: usize, name: String, labels: Vec<String> },
    RemoveProperty { at: usize, name: String, key: String },
    RemoveLabels { at: usize, name: String, labels: Vec<String> },
    Delete(Vec<(usize, String)>),
}

#[derive(Debug, Clone)]
struct Projection {
    distinct: bool,
    items: Vec<Term>,
    order: Vec<(Term, SortDirection)>,
    skip: Option<u64>,
    limit: Option<u64>,
}

#[derive(Debug, Clone)]
struct Statement {
    pattern: MatchPattern,
    filter: Option<Term>,
    updates: Vec<RawUpdate>,
    projection: Option<Projection>,
}

// ─── Lexical helpers ──────────────────────────────────────────────────────────

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn position(input: &str) -> IResult<&str, usize> {
    let (input, _) = multispace0(input)?;
    Ok((input, input.len()))
}

fn sym<'a>(c: char) -> impl FnMut(&'a str) -> IResult<&'a str, char> {
    preceded(multispace0, char(c))
}

fn op<'a>(text: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(multispace0, tag(text))
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(multispace0, terminated(tag_no_case(word), not(satisfy(is_ident_char))))
}

fn identifier(input: &str) -> IResult<&str, String> {
    preceded(
        multispace0,
        alt((
            map(delimited(char('`'), take_while1(|c: char| c != '`'), char('`')), String::from),
            map(
                recognize(pair(
                    satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
                    take_while(is_ident_char),
                )),
                String::from,
            ),
        )),
    )(input)
}

fn quoted(quote: char) -> impl FnMut(&str) -> IResult<&str, String> {
    move |input: &str| {
        let (rest, _) = char(quote)(input)?;
        let mut text = String::new();
        let mut chars = rest.char_indices();

        loop {
            match chars.next() {
                Some((idx, c)) if c == quote => return Ok((&rest[idx + c.len_utf8()..], text)),
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, escaped)) => text.push(escaped),
                    None => break,
                },
                Some((_, c)) => text.push(c),
                None => break,
            }
        }

        Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)))
    }
}

fn string_literal(input: &str) -> IResult<&str, String> {
    preceded(multispace0, alt((quoted('\''), quoted('"'))))(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    map_res(
        preceded(
            multispace0,
            recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        ),
        |text: &str| -> Result<Value, String> {
            if text.contains('.') {
                text.parse::<f64>().map(Value::Float).map_err(|err| err.to_string())
            } else {
                text.parse::<i64>().map(Value::Int).map_err(|err| err.to_string())
            }
        },
    )(input)
}

fn integer(input: &str) -> IResult<&str, u32> {
    map_res(preceded(multispace0, digit1), str::parse::<u32>)(input)
}

fn integer64(input: &str) -> IResult<&str, u64> {
    map_res(preceded(multispace0, digit1), str::parse::<u64>)(input)
}

fn collapse(mut items: Vec<Term>, join: fn(Vec<Term>) -> Term) -> Term {
    if items.len() == 1 {
        if let Some(item) = items.pop() {
            return item;
        }
    }
    join(items)
}

// ─── Expressions ──────────────────────────────────────────────────────────────

fn expression(input: &str) -> IResult<&str, Term> {
    map(separated_list1(keyword("or"), and_expression), |items| collapse(items, Term::Or))(input)
}

fn and_expression(input: &str) -> IResult<&str, Term> {
    map(separated_list1(keyword("and"), not_expression), |items| collapse(items, Term::And))(input)
}

fn not_expression(input: &str) -> IResult<&str, Term> {
    alt((
        map(preceded(keyword("not"), not_expression), |term| Term::Not(Box::new(term))),
        comparison,
    ))(input)
}

enum Tail {
    Null(bool),
    Compare(Operator, Term),
}

fn comparison_operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::NotEquals, op("<>")),
        value(Operator::LessThanOrEquals, op("<=")),
        value(Operator::GreaterThanOrEquals, op(">=")),
        value(Operator::Equals, op("=")),
        value(Operator::LessThan, op("<")),
        value(Operator::GreaterThan, op(">")),
        value(Operator::In, keyword("in")),
        value(Operator::Contains, keyword("contains")),
        value(Operator::StartsWith, pair(keyword("starts"), keyword("with"))),
        value(Operator::EndsWith, pair(keyword("ends"), keyword("with"))),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Term> {
    let (input, left) = atom(input)?;
    let (input, tail) = opt(alt((
        map(tuple((keyword("is"), opt(keyword("not")), keyword("null"))), |(_, negated, _)| {
            Tail::Null(negated.is_some())
        }),
        map(pair(comparison_operator, atom), |(operator, right)| Tail::Compare(operator, right)),
    )))(input)?;

    let term = match tail {
        None => left,
        Some(Tail::Null(negated)) => Term::IsNull {
            term: Box::new(left),
            negated,
        },
        Some(Tail::Compare(operator, right)) => Term::Compare {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        },
    };
    Ok((input, term))
}

fn parameter(input: &str) -> IResult<&str, Term> {
    map(pair(terminated(position, char('$')), identifier), |(at, name)| Term::Parameter { name, at })(input)
}

fn call(input: &str) -> IResult<&str, Term> {
    map(
        tuple((
            position,
            identifier,
            sym('('),
            opt(keyword("distinct")),
            separated_list0(sym(','), expression),
            sym(')'),
        )),
        |(at, function, _, distinct, args, _)| Term::Call {
            function,
            distinct: distinct.is_some(),
            args,
            at,
        },
    )(input)
}

enum Access {
    Property(String),
    Labels(Vec<String>),
}

fn reference(input: &str) -> IResult<&str, Term> {
    map(
        tuple((
            position,
            identifier,
            opt(alt((
                map(preceded(sym('.'), identifier), Access::Property),
                map(many1(preceded(sym(':'), identifier)), Access::Labels),
            ))),
        )),
        |(at, name, access)| match access {
            None => Term::Variable { name, at },
            Some(Access::Property(key)) => Term::Property { name, key, at },
            Some(Access::Labels(labels)) => Term::Labels { name, labels, at },
        },
    )(input)
}

fn atom(input: &str) -> IResult<&str, Term> {
    alt((
        delimited(sym('('), expression, sym(')')),
        map(delimited(sym('['), separated_list0(sym(','), expression), sym(']')), Term::List),
        parameter,
        map(string_literal, |text| Term::Literal(Value::String(text))),
        map(number, Term::Literal),
        value(Term::Literal(Value::Bool(true)), keyword("true")),
        value(Term::Literal(Value::Bool(false)), keyword("false")),
        value(Term::Literal(Value::Null), keyword("null")),
        call,
        reference,
    ))(input)
}

// ─── Patterns ─────────────────────────────────────────────────────────────────

fn property_map(input: &str) -> IResult<&str, Vec<(String, Term)>> {
    delimited(
        sym('{'),
        separated_list0(sym(','), map(tuple((identifier, sym(':'), expression)), |(key, _, term)| (key, term))),
        sym('}'),
    )(input)
}

fn node_pattern(input: &str) -> IResult<&str, NodePattern> {
    map(
        tuple((
            sym('('),
            opt(pair(position, identifier)),
            many0(preceded(sym(':'), identifier)),
            opt(property_map),
            sym(')'),
        )),
        |(_, name, labels, properties, _)| NodePattern {
            name,
            labels,
            properties: properties.unwrap_or_default(),
        },
    )(input)
}

fn range(input: &str) -> IResult<&str, (Option<u32>, Option<u32>)> {
    preceded(
        sym('*'),
        alt((
            map(tuple((opt(integer), op(".."), opt(integer))), |(min, _, max)| (min, max)),
            map(integer, |depth| (Some(depth), Some(depth))),
            success((None, None)),
        )),
    )(input)
}

fn relationship_pattern(input: &str) -> IResult<&str, RelationshipPattern> {
    let (input, inbound) = alt((value(true, op("<-")), value(false, op("-"))))(input)?;
    let (input, body) = opt(delimited(
        sym('['),
        tuple((
            opt(pair(position, identifier)),
            opt(preceded(sym(':'), separated_list1(sym('|'), identifier))),
            opt(range),
            opt(property_map),
        )),
        sym(']'),
    ))(input)?;
    let (input, _) = if inbound { op("-")(input)? } else { op("->")(input)? };

    let (name, types, range, properties) = body.unwrap_or_default();
    Ok((
        input,
        RelationshipPattern {
            name,
            types: types.unwrap_or_default(),
            properties: properties.unwrap_or_default(),
            range,
            inbound,
        },
    ))
}

fn hop(input: &str) -> IResult<&str, (NodePattern, RelationshipPattern, NodePattern)> {
    tuple((node_pattern, relationship_pattern, node_pattern))(input)
}

fn match_pattern(input: &str) -> IResult<&str, MatchPattern> {
    let (input, path) = opt(terminated(pair(position, identifier), sym('=')))(input)?;

    if let Ok((input, (first, relationship, end))) =
        preceded(keyword("allshortestpaths"), delimited(sym('('), hop, sym(')')))(input)
    {
        return Ok((
            input,
            MatchPattern {
                path,
                shortest: true,
                first,
                hop: Some((relationship, end)),
                second: None,
            },
        ));
    }

    let (input, first) = node_pattern(input)?;
    let (input, hop) = opt(pair(relationship_pattern, node_pattern))(input)?;
    let (input, second) = if hop.is_none() {
        opt(preceded(sym(','), node_pattern))(input)?
    } else {
        (input, None)
    };

    Ok((
        input,
        MatchPattern {
            path,
            shortest: false,
            first,
            hop,
            second,
        },
    ))
}

// ─── Clauses ──────────────────────────────────────────────────────────────────

fn set_item(input: &str) -> IResult<&str, RawUpdate> {
    alt((
        map(
            tuple((position, identifier, sym('.'), identifier, sym('='), expression)),
            |(at, name, _, key, _, value)| RawUpdate::SetProperty { at, name, key, value },
        ),
        map(
            tuple((position, identifier, many1(preceded(sym(':'), identifier)))),
            |(at, name, labels)| RawUpdate::AddLabels { at, name, labels },
        ),
    ))(input)
}

fn remove_item(input: &str) -> IResult<&str, RawUpdate> {
    alt((
        map(tuple((position, identifier, sym('.'), identifier)), |(at, name, _, key)| {
            RawUpdate::RemoveProperty { at, name, key }
        }),
        map(
            tuple((position, identifier, many1(preceded(sym(':'), identifier)))),
            |(at, name, labels)| RawUpdate::RemoveLabels { at, name, labels },
        ),
    ))(input)
}

fn update_clause(input: &str) -> IResult<&str, Vec<RawUpdate>> {
    alt((
        preceded(keyword("set"), separated_list1(sym(','), set_item)),
        preceded(keyword("remove"), separated_list1(sym(','), remove_item)),
        map(
            preceded(
                pair(opt(keyword("detach")), keyword("delete")),
                separated_list1(sym(','), pair(position, identifier)),
            ),
            |names| vec![RawUpdate::Delete(names)],
        ),
    ))(input)
}

fn sort_item(input: &str) -> IResult<&str, (Term, SortDirection)> {
    map(
        pair(
            expression,
            opt(alt((
                value(SortDirection::Descending, alt((keyword("descending"), keyword("desc")))),
                value(SortDirection::Ascending, alt((keyword("ascending"), keyword("asc")))),
            ))),
        ),
        |(term, direction)| (term, direction.unwrap_or_default()),
    )(input)
}

fn projection(input: &str) -> IResult<&str, Projection> {
    let (input, _) = keyword("return")(input)?;
    let (input, distinct) = opt(keyword("distinct"))(input)?;
    let (input, items) = separated_list1(sym(','), terminated(expression, opt(pair(keyword("as"), identifier))))(input)?;
    let (input, order) = opt(preceded(
        pair(keyword("order"), keyword("by")),
        separated_list1(sym(','), sort_item),
    ))(input)?;
    let (input, skip) = opt(preceded(keyword("skip"), integer64))(input)?;
    let (input, limit) = opt(preceded(keyword("limit"), integer64))(input)?;

    Ok((
        input,
        Projection {
            distinct: distinct.is_some(),
            items,
            order: order.unwrap_or_default(),
            skip,
            limit,
        },
    ))
}

fn statement(input: &str) -> IResult<&str, Statement> {
    let (input, _) = keyword("match")(input)?;
    let (input, pattern) = match_pattern(input)?;
    let (input, filter) = opt(preceded(keyword("where"), expression))(input)?;
    let (input, updates) = many0(update_clause)(input)?;
    let (input, projection) = opt(projection)(input)?;

    Ok((
        input,
        Statement {
            pattern,
            filter,
            updates: updates.into_iter().flatten().collect(),
            projection,
        },
    ))
}

// ─── Lowering ─────────────────────────────────────────────────────────────────

struct Lowering<'p> {
    total: usize,
    parameters: &'p BTreeMap<String, Value>,
    bindings: BTreeMap<String, Symbol>,
}

impl<'p> Lowering<'p> {
    fn error(&self, at: usize, message: impl Into<String>) -> ParseError {
        ParseError::new(self.total.saturating_sub(at), message)
    }

    fn bind(&mut self, name: &Option<(usize, String)>, symbol: Symbol) -> Result<(), ParseError> {
        if let Some((at, name)) = name {
            if self.bindings.insert(name.clone(), symbol).is_some() {
                return Err(self.error(*at, format!("variable {name} is bound twice")));
            }
        }
        Ok(())
    }

    fn symbol(&self, name: &str, at: usize) -> Result<Symbol, ParseError> {
        self.bindings
            .get(name)
            .copied()
            .ok_or_else(|| self.error(at, format!("variable {name} is not defined")))
    }

    fn variable(&self, term: &Term) -> Result<Symbol, ParseError> {
        match term {
            Term::Variable { name, at } => self.symbol(name, *at),
            other => Err(ParseError::new(0, format!("expected a variable, found {other:?}"))),
        }
    }

    fn literal(&self, term: &Term) -> Result<Value, ParseError> {
        match self.expr(term)? {
            Expr::Literal(value) => Ok(value),
            other => Err(ParseError::new(0, format!("expected a literal, found {other:?}"))),
        }
    }

    fn labels(symbol: Symbol, labels: &[String]) -> Vec<Expr> {
        labels
            .iter()
            .map(|label| Expr::KindMatch {
                symbol,
                kinds: Kinds::from(Kind::new(label)),
            })
            .collect()
    }

    fn expr(&self, term: &Term) -> Result<Expr, ParseError> {
        match term {
            Term::Variable { name, at } => Ok(Expr::Variable(self.symbol(name, *at)?)),
            Term::Property { name, key, at } => Ok(Expr::Property(self.symbol(name, *at)?, key.clone())),
            Term::Labels { name, labels, at } => {
                let symbol = self.symbol(name, *at)?;
                let mut matches = Self::labels(symbol, labels);
                Ok(if matches.len() == 1 {
                    matches.remove(0)
                } else {
                    Expr::And(matches)
                })
            }
            Term::Call { function, distinct, args, at } => self.call(function, *distinct, args, *at),
            Term::Literal(value) => Ok(Expr::Literal(value.clone())),
            Term::Parameter { name, at } => self
                .parameters
                .get(name)
                .map(|value| Expr::Literal(value.clone()))
                .ok_or_else(|| self.error(*at, format!("missing parameter ${name}"))),
            Term::List(items) => Ok(Expr::Literal(Value::List(
                items.iter().map(|item| self.literal(item)).collect::<Result<_, _>>()?,
            ))),
            Term::Compare { left, operator, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                Ok(Self::lift_relationship_type(left, *operator, right))
            }
            Term::IsNull { term, negated } => {
                let inner = Box::new(self.expr(term)?);
                Ok(if *negated {
                    Expr::IsNotNull(inner)
                } else {
                    Expr::IsNull(inner)
                })
            }
            Term::And(items) => Ok(Expr::And(items.iter().map(|item| self.expr(item)).collect::<Result<_, _>>()?)),
            Term::Or(items) => Ok(Expr::Or(items.iter().map(|item| self.expr(item)).collect::<Result<_, _>>()?)),
            Term::Not(inner) => Ok(Expr::Not(Box::new(self.expr(inner)?))),
        }
    }

    /// `type(r) = 'K'` and `type(r) in [...]` become kind matches so both
    /// backends treat them like pattern types.
    fn lift_relationship_type(left: Expr, operator: Operator, right: Expr) -> Expr {
        if let (Expr::KindsOf(Symbol::Relationship), Expr::Literal(literal)) = (&left, &right) {
            let kinds: Option<Kinds> = match (operator, literal) {
                (Operator::Equals, Value::String(name)) => Some(Kinds::from(Kind::new(name))),
                (Operator::In, Value::List(items)) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(name) => Some(Kind::new(name)),
                        _ => None,
                    })
                    .collect(),
                _ => None,
            };

            if let Some(kinds) = kinds {
                return Expr::KindMatch {
                    symbol: Symbol::Relationship,
                    kinds,
                };
            }
        }

        Expr::Comparison {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        }
    }

    fn call(&self, function: &str, distinct: bool, args: &[Term], at: usize) -> Result<Expr, ParseError> {
        let [arg] = args else {
            return Err(self.error(at, format!("{function} takes exactly one argument")));
        };

        match function.to_ascii_lowercase().as_str() {
            "id" => Ok(Expr::Identity(self.variable(arg)?)),
            "type" | "labels" => Ok(Expr::KindsOf(self.variable(arg)?)),
            "count" => Ok(Expr::Count {
                expr: Box::new(self.expr(arg)?),
                distinct,
            }),
            "tolower" => Ok(Expr::ToLower(Box::new(self.expr(arg)?))),
            _ => Err(self.error(at, format!("unsupported function {function}"))),
        }
    }

    fn pattern_filters(&self, symbol: Symbol, labels: &[String], properties: &[(String, Term)], filters: &mut Vec<Expr>) -> Result<(), ParseError> {
        filters.extend(Self::labels(symbol, labels));
        for (key, term) in properties {
            filters.push(Expr::Comparison {
                left: Box::new(Expr::Property(symbol, key.clone())),
                operator: Operator::Equals,
                right: Box::new(self.expr(term)?),
            });
        }
        Ok(())
    }

    fn pattern(&mut self, pattern: &MatchPattern, filters: &mut Vec<Expr>) -> Result<Pattern, ParseError> {
        match (&pattern.hop, &pattern.second) {
            (Some((relationship, end)), _) => {
                let (start, end) = if relationship.inbound {
                    (end, &pattern.first)
                } else {
                    (&pattern.first, end)
                };

                self.bind(&pattern.path, Symbol::Path)?;
                self.bind(&start.name, Symbol::Start)?;
                self.bind(&relationship.name, Symbol::Relationship)?;
                self.bind(&end.name, Symbol::End)?;

                self.pattern_filters(Symbol::Start, &start.labels, &start.properties, filters)?;
                if !relationship.types.is_empty() {
                    filters.push(Expr::KindMatch {
                        symbol: Symbol::Relationship,
                        kinds: relationship.types.iter().map(Kind::new).collect(),
                    });
                }
                self.pattern_filters(Symbol::Relationship, &[], &relationship.properties, filters)?;
                self.pattern_filters(Symbol::End, &end.labels, &end.properties, filters)?;

                let traversal = match (pattern.shortest, relationship.range) {
                    (true, Some((_, max))) => Traversal::AllShortestPaths { max },
                    (true, None) => Traversal::AllShortestPaths { max: Some(1) },
                    (false, None) => Traversal::Single,
                    (false, Some((min, max))) => Traversal::Bounded {
                        min: min.unwrap_or(1),
                        max,
                    },
                };
                Ok(Pattern::Relationship(traversal))
            }
            (None, second) => {
                if let Some((at, _)) = &pattern.path {
                    return Err(self.error(*at, "a path variable requires a relationship pattern"));
                }

                match second {
                    Some(second) => {
                        self.bind(&pattern.first.name, Symbol::Start)?;
                        self.bind(&second.name, Symbol::End)?;
                        self.pattern_filters(Symbol::Start, &pattern.first.labels, &pattern.first.properties, filters)?;
                        self.pattern_filters(Symbol::End, &second.labels, &second.properties, filters)?;
                        Ok(Pattern::Endpoints)
                    }
                    None => {
                        self.bind(&pattern.first.name, Symbol::Node)?;
                        self.pattern_filters(Symbol::Node, &pattern.first.labels, &pattern.first.properties, filters)?;
                        Ok(Pattern::Node)
                    }
                }
            }
        }
    }

    fn update(&self, update: &RawUpdate) -> Result<Update, ParseError> {
        match update {
            RawUpdate::SetProperty { at, name, key, value } => {
                let mut properties = BTreeMap::new();
                properties.insert(key.clone(), self.literal(value)?);
                Ok(Update::SetProperties {
                    symbol: self.symbol(name, *at)?,
                    properties,
                })
            }
            RawUpdate::AddLabels { at, name, labels } => Ok(Update::AddKinds {
                symbol: self.symbol(name, *at)?,
                kinds: labels.iter().map(Kind::new).collect(),
            }),
            RawUpdate::RemoveProperty { at, name, key } => Ok(Update::RemoveProperties {
                symbol: self.symbol(name, *at)?,
                keys: vec![key.clone()],
            }),
            RawUpdate::RemoveLabels { at, name, labels } => Ok(Update::RemoveKinds {
                symbol: self.symbol(name, *at)?,
                kinds: labels.iter().map(Kind::new).collect(),
            }),
            RawUpdate::Delete(names) => Ok(Update::Delete(
                names
                    .iter()
                    .map(|(at, name)| self.symbol(name, *at))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }
}

/// Parse query text into a criteria query.
///
/// `$name` placeholders are resolved from `parameters`; a placeholder with
/// no value is an error at its offset.
pub fn parse(text: &str, parameters: &BTreeMap<String, Value>) -> Result<Query, ParseError> {
    let total = text.len();
    let (rest, statement) = statement(text).map_err(|err| match err {
        nom::Err::Error(err) | nom::Err::Failure(err) => {
            ParseError::new(total - err.input.len(), "expected a match clause")
        }
        nom::Err::Incomplete(_) => ParseError::new(total, "incomplete query"),
    })?;

    let rest = rest.trim_start();
    if !rest.is_empty() {
        let snippet: String = rest.chars().take(24).collect();
        return Err(ParseError::new(total - rest.len(), format!("unexpected input near '{snippet}'")));
    }

    let mut lowering = Lowering {
        total,
        parameters,
        bindings: BTreeMap::new(),
    };

    let mut filters = Vec::new();
    let pattern = lowering.pattern(&statement.pattern, &mut filters)?;
    if let Some(filter) = &statement.filter {
        filters.push(lowering.expr(filter)?);
    }

    let mut query = Query::new().pattern(pattern).filter(Expr::And(filters));
    for update in &statement.updates {
        query = query.update(lowering.update(update)?);
    }

    if let Some(projection) = &statement.projection {
        query.projection = projection
            .items
            .iter()
            .map(|item| lowering.expr(item))
            .collect::<Result<_, _>>()?;
        query.distinct = projection.distinct;
        query.order = projection
            .order
            .iter()
            .map(|(term, direction)| {
                lowering.expr(term).map(|expr| SortItem {
                    expr,
                    direction: *direction,
                })
            })
            .collect::<Result<_, _>>()?;
        query.skip = projection.skip;
        query.limit = projection.limit;
    }

    Ok(query)
}
