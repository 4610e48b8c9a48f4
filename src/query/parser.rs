use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while1};
use nom::character::complete::{char, digit1, multispace0, multispace1};
use nom::combinator::{all_consuming, map, map_res, opt};
use nom::multi::{fold_many0, separated_list1};
use nom::number::complete::double;
use nom::sequence::{delimited, preceded, separated_pair, terminated, tuple};
use nom::IResult;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::bytes_to_vector;
use crate::query::ast::{AstNode, LogicOp};
use crate::query::params::QueryParams;

/// Parser for the query grammar: field scopes `@name:…`, bare terms, tag
/// lists `{a|b}`, numeric ranges `[lo hi]`, `-` negation, `|` OR,
/// juxtaposition AND, parentheses, and a root-level KNN clause
/// `expr => [KNN k @field $param]`.
pub struct QueryParser<'a> {
    params: &'a QueryParams,
}

struct KnnClause<'a> {
    limit: usize,
    field: &'a str,
    param: &'a str,
}

impl<'a> QueryParser<'a> {
    pub fn new(params: &'a QueryParams) -> Self {
        QueryParser { params }
    }

    pub fn parse(&self, input: &str) -> Result<AstNode> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(AstNode::Empty);
        }

        let (_, (filter, knn)) = all_consuming(query)(trimmed)
            .map_err(|err| Error::new(ErrorKind::Parse, format!("invalid query: {err}")))?;

        match knn {
            None => Ok(filter),
            Some(clause) => {
                let bytes = self.params.get(clause.param).ok_or_else(|| {
                    Error::new(ErrorKind::Parse, format!("unknown parameter ${}", clause.param))
                })?;
                Ok(AstNode::Knn {
                    limit: clause.limit,
                    field: clause.field.to_string(),
                    vector: bytes_to_vector(bytes),
                    filter: Box::new(filter),
                })
            }
        }
    }
}

type PResult<'a, O> = IResult<&'a str, O>;

fn query(input: &str) -> PResult<(AstNode, Option<KnnClause>)> {
    terminated(
        tuple((
            or_expr,
            opt(preceded(
                delimited(multispace0, tag("=>"), multispace0),
                knn_clause,
            )),
        )),
        multispace0,
    )(input)
}

fn knn_clause(input: &str) -> PResult<KnnClause> {
    map(
        delimited(
            char('['),
            tuple((
                preceded(multispace0, tag_no_case("KNN")),
                preceded(multispace1, map_res(digit1, str::parse::<usize>)),
                preceded(multispace1, preceded(char('@'), identifier)),
                preceded(multispace1, preceded(char('$'), identifier)),
            )),
            preceded(multispace0, char(']')),
        ),
        |(_, limit, field, param)| KnnClause { limit, field, param },
    )(input)
}

fn or_expr(input: &str) -> PResult<AstNode> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(delimited(multispace0, char('|'), multispace0), and_expr),
        move || first.clone(),
        |acc, node| AstNode::combine(LogicOp::Or, acc, node),
    )(input)
}

// Juxtaposition: `a b` is an implicit AND.
fn and_expr(input: &str) -> PResult<AstNode> {
    let (input, first) = unary(input)?;
    fold_many0(
        preceded(multispace0, unary),
        move || first.clone(),
        |acc, node| AstNode::combine(LogicOp::And, acc, node),
    )(input)
}

fn unary(input: &str) -> PResult<AstNode> {
    alt((
        map(preceded(char('-'), unary), |node| AstNode::Negate(Box::new(node))),
        primary,
    ))(input)
}

fn primary(input: &str) -> PResult<AstNode> {
    alt((parens, star, field_scope, term))(input)
}

fn parens(input: &str) -> PResult<AstNode> {
    delimited(
        char('('),
        delimited(multispace0, or_expr, multispace0),
        char(')'),
    )(input)
}

fn star(input: &str) -> PResult<AstNode> {
    map(char('*'), |_| AstNode::Star)(input)
}

fn field_scope(input: &str) -> PResult<AstNode> {
    map(
        separated_pair(preceded(char('@'), identifier), char(':'), field_body),
        |(field, node)| AstNode::Field { field: field.to_string(), node: Box::new(node) },
    )(input)
}

// Inside a field scope only terms, tag lists, ranges and grouped
// expressions are meaningful.
fn field_body(input: &str) -> PResult<AstNode> {
    alt((parens, tags, range, term))(input)
}

fn tags(input: &str) -> PResult<AstNode> {
    map(
        delimited(
            char('{'),
            separated_list1(
                char('|'),
                delimited(multispace0, map(identifier, str::to_lowercase), multispace0),
            ),
            char('}'),
        ),
        AstNode::Tags,
    )(input)
}

fn range(input: &str) -> PResult<AstNode> {
    map(
        delimited(
            char('['),
            separated_pair(
                preceded(multispace0, double),
                multispace1,
                terminated(double, multispace0),
            ),
            char(']'),
        ),
        |(lo, hi)| AstNode::Range { lo, hi },
    )(input)
}

fn term(input: &str) -> PResult<AstNode> {
    map(identifier, |t| AstNode::Term(t.to_lowercase()))(input)
}

fn identifier(input: &str) -> PResult<&str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::vector_to_bytes;

    fn parse(input: &str) -> Result<AstNode> {
        let params = QueryParams::new();
        QueryParser::new(&params).parse(input)
    }

    #[test]
    fn empty_input_yields_empty_node() {
        assert_eq!(parse("").unwrap(), AstNode::Empty);
        assert_eq!(parse("   ").unwrap(), AstNode::Empty);
    }

    #[test]
    fn star() {
        assert_eq!(parse("*").unwrap(), AstNode::Star);
    }

    #[test]
    fn bare_term_is_lowercased() {
        assert_eq!(parse("Apple").unwrap(), AstNode::Term("apple".into()));
    }

    #[test]
    fn field_scoped_tags_and_range() {
        let ast = parse("@tag:{sale} @price:[15 40]").unwrap();
        let AstNode::Logical { op: LogicOp::And, nodes } = ast else {
            panic!("expected AND");
        };
        assert_eq!(
            nodes[0],
            AstNode::Field {
                field: "tag".into(),
                node: Box::new(AstNode::Tags(vec!["sale".into()])),
            }
        );
        assert_eq!(
            nodes[1],
            AstNode::Field {
                field: "price".into(),
                node: Box::new(AstNode::Range { lo: 15.0, hi: 40.0 }),
            }
        );
    }

    #[test]
    fn or_and_negation() {
        let ast = parse("@tag:{sale} | apple").unwrap();
        assert!(matches!(ast, AstNode::Logical { op: LogicOp::Or, .. }));

        let ast = parse("-apple").unwrap();
        assert_eq!(ast, AstNode::Negate(Box::new(AstNode::Term("apple".into()))));
    }

    #[test]
    fn tag_list_alternatives() {
        let ast = parse("@color:{red | blue}").unwrap();
        assert_eq!(
            ast,
            AstNode::Field {
                field: "color".into(),
                node: Box::new(AstNode::Tags(vec!["red".into(), "blue".into()])),
            }
        );
    }

    #[test]
    fn grouped_expression() {
        let ast = parse("(a | b) c").unwrap();
        let AstNode::Logical { op: LogicOp::And, nodes } = ast else {
            panic!("expected AND");
        };
        assert!(matches!(nodes[0], AstNode::Logical { op: LogicOp::Or, .. }));
        assert_eq!(nodes[1], AstNode::Term("c".into()));
    }

    #[test]
    fn knn_resolves_parameter_vector() {
        let mut params = QueryParams::new();
        params.bind("vec", vector_to_bytes(&[0.1, 0.1]));
        let ast = QueryParser::new(&params).parse("*=>[KNN 2 @v $vec]").unwrap();
        let AstNode::Knn { limit, field, vector, filter } = ast else {
            panic!("expected KNN");
        };
        assert_eq!(limit, 2);
        assert_eq!(field, "v");
        assert_eq!(vector, vec![0.1, 0.1]);
        assert_eq!(*filter, AstNode::Star);
    }

    #[test]
    fn knn_with_unknown_parameter_fails() {
        let err = parse("*=>[KNN 2 @v $missing]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn malformed_queries_fail() {
        assert!(parse("@@").is_err());
        assert!(parse("@price:[15").is_err());
        assert!(parse("{loose}").is_err());
        assert!(parse("a |").is_err());
    }

    #[test]
    fn range_accepts_infinities() {
        let ast = parse("@price:[-inf inf]").unwrap();
        let AstNode::Field { node, .. } = ast else { panic!("expected field") };
        let AstNode::Range { lo, hi } = *node else { panic!("expected range") };
        assert_eq!(lo, f64::NEG_INFINITY);
        assert_eq!(hi, f64::INFINITY);
    }
}
