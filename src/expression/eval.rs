//! Tree-walking evaluator over JSON values.
//!
//! Numbers are compared and combined as `f64`; integral results are folded
//! back to JSON integers. A string holding an RFC 3339 timestamp is coerced
//! to Unix seconds when compared or combined with a number, which is what
//! lets filters like `item.createdAt > time.Now - 7 * time.Day` work.

use chrono::DateTime;
use serde_json::{Map, Value};
use std::borrow::Cow;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::errors::{ExpressionError, ExpressionResult};
use super::parser::number;

pub fn evaluate<'a>(expr: &'a Expr, env: &'a Value) -> ExpressionResult<Cow<'a, Value>> {
    match expr {
        Expr::Literal(value) => Ok(Cow::Borrowed(value)),
        Expr::Ident(name) => env
            .get(name)
            .map(Cow::Borrowed)
            .ok_or_else(|| ExpressionError::UnknownIdentifier(name.clone())),
        Expr::Member(target, field) => {
            let base = evaluate(target, env)?;
            member(base, field).ok_or_else(|| unknown_path(expr))?
        }
        Expr::Index(target, index) => {
            let base = evaluate(target, env)?;
            let index = evaluate(index, env)?;
            index_into(base, &index, expr)
        }
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, env).map(Cow::into_owned))
            .collect::<ExpressionResult<Vec<_>>>()
            .map(|items| Cow::Owned(Value::Array(items))),
        Expr::Object(entries) => {
            let mut object = Map::with_capacity(entries.len());
            for (key, value) in entries {
                object.insert(key.clone(), evaluate(value, env)?.into_owned());
            }
            Ok(Cow::Owned(Value::Object(object)))
        }
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, env)?;
            unary(*op, &value).map(Cow::Owned)
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !as_bool(&*evaluate(lhs, env)?, "&&")? {
                return Ok(Cow::Owned(Value::Bool(false)));
            }
            let rhs = as_bool(&*evaluate(rhs, env)?, "&&")?;
            Ok(Cow::Owned(Value::Bool(rhs)))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if as_bool(&*evaluate(lhs, env)?, "||")? {
                return Ok(Cow::Owned(Value::Bool(true)));
            }
            let rhs = as_bool(&*evaluate(rhs, env)?, "||")?;
            Ok(Cow::Owned(Value::Bool(rhs)))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lhs, env)?;
            let rhs = evaluate(rhs, env)?;
            binary(*op, &lhs, &rhs).map(Cow::Owned)
        }
        Expr::Conditional(condition, then, otherwise) => {
            if as_bool(&*evaluate(condition, env)?, "?:")? {
                evaluate(then, env)
            } else {
                evaluate(otherwise, env)
            }
        }
    }
}

/// Check that every statically addressable path resolves in `env`
pub fn validate_identifiers(expr: &Expr, env: &Value) -> ExpressionResult<()> {
    let mut result = Ok(());
    expr.walk(&mut |node| {
        if result.is_err() || !is_static_path(node) {
            return;
        }
        if let Err(e @ ExpressionError::UnknownIdentifier(_)) = evaluate(node, env) {
            result = Err(e);
        }
    });
    result
}

fn is_static_path(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) => true,
        Expr::Member(target, _) => is_static_path(target),
        Expr::Index(target, index) => {
            matches!(**index, Expr::Literal(_)) && is_static_path(target)
        }
        _ => false,
    }
}

fn member<'a>(base: Cow<'a, Value>, field: &str) -> Option<ExpressionResult<Cow<'a, Value>>> {
    match base {
        Cow::Borrowed(Value::Object(map)) => map.get(field).map(|v| Ok(Cow::Borrowed(v))),
        Cow::Owned(Value::Object(mut map)) => map.remove(field).map(|v| Ok(Cow::Owned(v))),
        other => Some(Err(ExpressionError::type_mismatch(
            ".",
            format!("cannot read field {field:?} of {}", type_name(&other)),
        ))),
    }
}

fn index_into<'a>(
    base: Cow<'a, Value>,
    index: &Value,
    expr: &Expr,
) -> ExpressionResult<Cow<'a, Value>> {
    match index {
        Value::String(key) if base.is_object() => {
            member(base, key).ok_or_else(|| unknown_path(expr))?
        }
        Value::Number(n) if base.is_array() => {
            let i = n
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
                .ok_or_else(|| {
                    ExpressionError::type_mismatch("[]", format!("non-integer index {n}"))
                })?;
            let len = base.as_array().map(Vec::len).unwrap_or(0);
            if i < 0 || i as usize >= len {
                return Err(ExpressionError::IndexOutOfBounds { index: i, len });
            }
            match base {
                Cow::Borrowed(Value::Array(items)) => Ok(Cow::Borrowed(&items[i as usize])),
                Cow::Owned(Value::Array(mut items)) => Ok(Cow::Owned(items.swap_remove(i as usize))),
                other => Err(ExpressionError::type_mismatch(
                    "[]",
                    format!("cannot index {}", type_name(&other)),
                )),
            }
        }
        _ => Err(ExpressionError::type_mismatch(
            "[]",
            format!("cannot index {} with {}", type_name(&base), type_name(index)),
        )),
    }
}

fn unary(op: UnaryOp, value: &Value) -> ExpressionResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!as_bool(value, "!")?)),
        UnaryOp::Negate => as_number(value)
            .map(|n| number(-n))
            .ok_or_else(|| ExpressionError::type_mismatch("-", format!("cannot negate {}", type_name(value)))),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> ExpressionResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(lhs, rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(lhs, rhs))),
        BinaryOp::Less | BinaryOp::LessOrEqual | BinaryOp::Greater | BinaryOp::GreaterOrEqual => {
            compare(op, lhs, rhs).map(Value::Bool)
        }
        BinaryOp::In => contains(rhs, lhs).map(Value::Bool),
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(op, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::And => Ok(Value::Bool(as_bool(lhs, "&&")? && as_bool(rhs, "&&")?)),
        BinaryOp::Or => Ok(Value::Bool(as_bool(lhs, "||")? || as_bool(rhs, "||")?)),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> ExpressionResult<Value> {
    let (Some(a), Some(b)) = (coerce_number(lhs), coerce_number(rhs)) else {
        return Err(ExpressionError::type_mismatch(
            op.to_string(),
            format!("cannot combine {} and {}", type_name(lhs), type_name(rhs)),
        ));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Err(ExpressionError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Rem if b == 0.0 => return Err(ExpressionError::DivisionByZero),
        BinaryOp::Rem => a % b,
        _ => {
            return Err(ExpressionError::type_mismatch(
                op.to_string(),
                "not an arithmetic operator",
            ))
        }
    };
    Ok(number(result))
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> ExpressionResult<bool> {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            let (Some(a), Some(b)) = (coerce_number(lhs), coerce_number(rhs)) else {
                return Err(ExpressionError::type_mismatch(
                    op.to_string(),
                    format!("cannot compare {} and {}", type_name(lhs), type_name(rhs)),
                ));
            };
            a.partial_cmp(&b).ok_or_else(|| {
                ExpressionError::type_mismatch(op.to_string(), "comparison with NaN")
            })?
        }
    };
    Ok(match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessOrEqual => ordering.is_le(),
        BinaryOp::Greater => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn contains(haystack: &Value, needle: &Value) -> ExpressionResult<bool> {
    match (haystack, needle) {
        (Value::Array(items), needle) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        (Value::String(text), Value::String(part)) => Ok(text.contains(part.as_str())),
        _ => Err(ExpressionError::type_mismatch(
            "in",
            format!("cannot search {} in {}", type_name(needle), type_name(haystack)),
        )),
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn as_bool(value: &Value, operation: &str) -> ExpressionResult<bool> {
    value.as_bool().ok_or_else(|| {
        ExpressionError::type_mismatch(
            operation,
            format!("expected bool, found {}", type_name(value)),
        )
    })
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Numbers as-is; RFC 3339 strings as Unix seconds
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.timestamp() as f64 + f64::from(t.timestamp_subsec_millis()) / 1000.0),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn unknown_path(expr: &Expr) -> ExpressionError {
    ExpressionError::UnknownIdentifier(describe(expr))
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member(target, field) => format!("{}.{field}", describe(target)),
        Expr::Index(target, index) => match &**index {
            Expr::Literal(value) => format!("{}[{value}]", describe(target)),
            _ => format!("{}[..]", describe(target)),
        },
        _ => "<expression>".to_string(),
    }
}
