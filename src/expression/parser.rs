// Expression parser: pest grammar plus a Pratt pass for operator precedence

use lazy_static::lazy_static;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Number, Value};

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::error::ParseError;

#[derive(Parser)]
#[grammar = "expression/grammar.pest"]
struct ExpressionParser;

lazy_static! {
    // Lowest precedence first.
    static ref PRATT: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::neq, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::not) | Op::prefix(Rule::neg));
}

/// Parse expression source (without the leading `=`) into a syntax tree.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let mut pairs = ExpressionParser::parse(Rule::expression, source).map_err(|err| {
        ParseError::Syntax {
            source_text: source.to_string(),
            message: err.to_string(),
        }
    })?;

    let conditional = pairs
        .next()
        .and_then(|expression| expression.into_inner().next())
        .ok_or_else(|| syntax(source, "empty expression"))?;

    build_conditional(conditional)
}

fn syntax(source: &str, message: &str) -> ParseError {
    ParseError::Syntax {
        source_text: source.to_string(),
        message: message.to_string(),
    }
}

fn unexpected(pair: &Pair<'_, Rule>) -> ParseError {
    syntax(pair.as_str(), &format!("unexpected {:?}", pair.as_rule()))
}

fn build_conditional(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let source = pair.as_str();
    let mut inner = pair.into_inner();
    let sequence = inner
        .next()
        .ok_or_else(|| syntax(source, "missing operand"))?;
    let condition = build_sequence(sequence)?;

    match (inner.next(), inner.next()) {
        (Some(then), Some(otherwise)) => Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(build_conditional(then)?),
            otherwise: Box::new(build_conditional(otherwise)?),
        }),
        _ => Ok(condition),
    }
}

fn build_sequence(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    PRATT
        .map_primary(build_term)
        .map_prefix(|op, operand| {
            let operand = operand?;
            match op.as_rule() {
                Rule::not => Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                }),
                Rule::neg => Ok(negate(operand)),
                _ => Err(unexpected(&op)),
            }
        })
        .map_infix(|lhs, op, rhs| {
            let op = binary_op(&op)?;
            Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs?),
                rhs: Box::new(rhs?),
            })
        })
        .parse(pair.into_inner())
}

// Fold `-<number>` into a literal so `-1` stays a constant.
fn negate(operand: Expr) -> Expr {
    if let Expr::Literal(Value::Number(number)) = &operand {
        if let Some(int) = number.as_i64().and_then(i64::checked_neg) {
            return Expr::Literal(Value::from(int));
        }
        if let Some(float) = number.as_f64().and_then(|f| Number::from_f64(-f)) {
            return Expr::Literal(Value::Number(float));
        }
    }
    Expr::Unary {
        op: UnaryOp::Negate,
        operand: Box::new(operand),
    }
}

fn binary_op(pair: &Pair<'_, Rule>) -> Result<BinaryOp, ParseError> {
    let op = match pair.as_rule() {
        Rule::or => BinaryOp::Or,
        Rule::and => BinaryOp::And,
        Rule::eq => BinaryOp::Equal,
        Rule::neq => BinaryOp::NotEqual,
        Rule::lt => BinaryOp::Less,
        Rule::le => BinaryOp::LessEqual,
        Rule::gt => BinaryOp::Greater,
        Rule::ge => BinaryOp::GreaterEqual,
        Rule::add => BinaryOp::Add,
        Rule::sub => BinaryOp::Subtract,
        Rule::mul => BinaryOp::Multiply,
        Rule::div => BinaryOp::Divide,
        Rule::rem => BinaryOp::Remainder,
        _ => return Err(unexpected(pair)),
    };
    Ok(op)
}

fn build_term(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let source = pair.as_str();
    let mut inner = pair.into_inner();
    let primary = inner
        .next()
        .ok_or_else(|| syntax(source, "missing operand"))?;
    let mut expr = build_primary(primary)?;

    for accessor in inner {
        expr = match accessor.as_rule() {
            Rule::member => {
                let field = accessor
                    .into_inner()
                    .next()
                    .map(|identifier| identifier.as_str().to_string())
                    .ok_or_else(|| syntax(source, "missing member name"))?;
                Expr::Member {
                    target: Box::new(expr),
                    field,
                }
            }
            Rule::index => {
                let key = accessor
                    .into_inner()
                    .next()
                    .ok_or_else(|| syntax(source, "missing index"))?;
                Expr::Index {
                    target: Box::new(expr),
                    key: Box::new(build_conditional(key)?),
                }
            }
            _ => return Err(unexpected(&accessor)),
        };
    }

    Ok(expr)
}

fn build_primary(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::number => parse_number(pair.as_str()).map(Expr::Literal),
        Rule::string => {
            let raw = pair
                .into_inner()
                .next()
                .map(|chars| chars.as_str())
                .unwrap_or_default();
            Ok(Expr::Literal(Value::String(unescape(raw))))
        }
        Rule::boolean => Ok(Expr::Literal(Value::Bool(pair.as_str() == "true"))),
        Rule::null => Ok(Expr::Literal(Value::Null)),
        Rule::scope_ref => Ok(Expr::ScopeRef(
            pair.into_inner()
                .map(|segment| segment.as_str().to_string())
                .collect(),
        )),
        Rule::identifier => Ok(Expr::Identifier(pair.as_str().to_string())),
        Rule::call => {
            let mut inner = pair.into_inner();
            let function = inner
                .next()
                .map(|name| name.as_str().to_string())
                .unwrap_or_default();
            let args = inner.map(build_conditional).collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Call { function, args })
        }
        Rule::conditional => build_conditional(pair),
        _ => Err(unexpected(&pair)),
    }
}

fn parse_number(text: &str) -> Result<Value, ParseError> {
    let is_float = text.contains(['.', 'e', 'E']);
    if !is_float {
        if let Ok(int) = text.parse::<i64>() {
            return Ok(Value::from(int));
        }
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ParseError::InvalidNumber(text.to_string()))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
