// Expression evaluation against a JSON scope

use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::error::EvaluationError;
use super::functions::FunctionRegistry;

/// Evaluate `expr` with `root` as the scope object.
///
/// Lookups of absent keys resolve to `null` rather than failing, so a
/// response can read the outputs of a step that never ran.
pub fn evaluate(
    expr: &Expr,
    root: &Value,
    functions: &FunctionRegistry,
) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::ScopeRef(path) => Ok(path
            .iter()
            .try_fold(root, |current, segment| current.get(segment.as_str()))
            .cloned()
            .unwrap_or(Value::Null)),

        Expr::Identifier(name) => Ok(root.get(name.as_str()).cloned().unwrap_or(Value::Null)),

        Expr::Member { target, field } => {
            let target = evaluate(target, root, functions)?;
            Ok(target.get(field.as_str()).cloned().unwrap_or(Value::Null))
        }

        Expr::Index { target, key } => {
            let target = evaluate(target, root, functions)?;
            let key = evaluate(key, root, functions)?;
            let found = match (&target, &key) {
                (Value::Object(map), Value::String(name)) => map.get(name).cloned(),
                (Value::Array(items), Value::Number(n)) => n
                    .as_u64()
                    .and_then(|i| items.get(i as usize))
                    .cloned(),
                (Value::Null, _) => None,
                (_, other) => {
                    return Err(EvaluationError::mismatch("[]", "string or integer key", other))
                }
            };
            Ok(found.unwrap_or(Value::Null))
        }

        Expr::Call { function, args } => {
            let callable = functions
                .get(function)
                .ok_or_else(|| EvaluationError::UnknownFunction(function.clone()))?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, root, functions))
                .collect::<Result<Vec<_>, _>>()?;
            callable(&args)
        }

        Expr::Unary { op, operand } => {
            let value = evaluate(operand, root, functions)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!as_bool("!", &value)?)),
                UnaryOp::Negate => negate(&value),
            }
        }

        Expr::Binary { op, lhs, rhs } => evaluate_binary(*op, lhs, rhs, root, functions),

        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            let condition = evaluate(condition, root, functions)?;
            if as_bool("?:", &condition)? {
                evaluate(then, root, functions)
            } else {
                evaluate(otherwise, root, functions)
            }
        }
    }
}

fn evaluate_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    root: &Value,
    functions: &FunctionRegistry,
) -> Result<Value, EvaluationError> {
    // Logical operators short-circuit before the right side is touched.
    match op {
        BinaryOp::And => {
            let left = evaluate(lhs, root, functions)?;
            if !as_bool(op.symbol(), &left)? {
                return Ok(Value::Bool(false));
            }
            let right = evaluate(rhs, root, functions)?;
            return Ok(Value::Bool(as_bool(op.symbol(), &right)?));
        }
        BinaryOp::Or => {
            let left = evaluate(lhs, root, functions)?;
            if as_bool(op.symbol(), &left)? {
                return Ok(Value::Bool(true));
            }
            let right = evaluate(rhs, root, functions)?;
            return Ok(Value::Bool(as_bool(op.symbol(), &right)?));
        }
        _ => {}
    }

    let left = evaluate(lhs, root, functions)?;
    let right = evaluate(rhs, root, functions)?;

    match op {
        BinaryOp::Equal => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = compare(op, &left, &right)?;
            let result = match op {
                BinaryOp::Less => ordering == Ordering::Less,
                BinaryOp::LessEqual => ordering != Ordering::Greater,
                BinaryOp::Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Ok(Value::String(format!("{}{}", display(&left), display(&right))))
        }
        _ => arithmetic(op, &left, &right),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    let (a, b) = match (left, right) {
        (Value::Number(a), Value::Number(b)) => (a, b),
        (Value::Number(_), other) | (other, _) => {
            return Err(EvaluationError::mismatch(op.symbol(), "number", other))
        }
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Subtract => x.checked_sub(y),
            BinaryOp::Multiply => x.checked_mul(y),
            BinaryOp::Remainder | BinaryOp::Divide if y == 0 => {
                return Err(EvaluationError::DivisionByZero)
            }
            BinaryOp::Remainder => x.checked_rem(y),
            // Exact integer division stays integral.
            BinaryOp::Divide if x.checked_rem(y) == Some(0) => x.checked_div(y),
            BinaryOp::Divide => return float(x as f64 / y as f64, op),
            _ => None,
        };
        return result
            .map(Value::from)
            .ok_or_else(|| EvaluationError::Overflow(op.symbol().to_string()));
    }

    let x = a.as_f64().unwrap_or_default();
    let y = b.as_f64().unwrap_or_default();
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide | BinaryOp::Remainder if y == 0.0 => {
            return Err(EvaluationError::DivisionByZero)
        }
        BinaryOp::Divide => x / y,
        BinaryOp::Remainder => x % y,
        _ => return Err(EvaluationError::mismatch(op.symbol(), "number", left)),
    };
    float(result, op)
}

fn float(value: f64, op: BinaryOp) -> Result<Value, EvaluationError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| EvaluationError::Overflow(op.symbol().to_string()))
}

fn negate(value: &Value) -> Result<Value, EvaluationError> {
    match value {
        Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                int.checked_neg()
                    .map(Value::from)
                    .ok_or_else(|| EvaluationError::Overflow("-".to_string()))
            } else {
                float(-n.as_f64().unwrap_or_default(), BinaryOp::Subtract)
            }
        }
        other => Err(EvaluationError::mismatch("-", "number", other)),
    }
}

fn as_bool(operation: &str, value: &Value) -> Result<bool, EvaluationError> {
    value
        .as_bool()
        .ok_or_else(|| EvaluationError::mismatch(operation, "bool", value))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Ordering, EvaluationError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .ok_or_else(|| EvaluationError::mismatch(op.symbol(), "comparable number", left)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Number(_), other) | (Value::String(_), other) | (other, _) => Err(
            EvaluationError::mismatch(op.symbol(), "two numbers or two strings", other),
        ),
    }
}

/// Render a value the way string concatenation sees it: strings without
/// quotes, `null` as the empty string, everything else as JSON.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
