//! Operator evaluation shared by the compiler's constant folder and the
//! renderer's tree-walking evaluator — a single function per arity, grounded
//! on spec §9's note that operators dispatch through one evaluator rather
//! than per-operator node types, and on `builtins.cpp`'s arithmetic/
//! comparison coercion rules.

use crate::ast::Operator;
use crate::value::Value;

/// Evaluates a unary operator (`Not`, `Neg`, and the `is`-tests) against an
/// already-evaluated operand.
pub fn apply_unary(op: Operator, operand: &Value) -> Value {
    match op {
        Operator::Not => Value::Bool(!operand.is_truthy()),
        Operator::Neg => match operand.as_f64() {
            Some(n) if matches!(operand, Value::Int(_)) => Value::Int(-(n as i64)),
            Some(n) => Value::Float(-n),
            None => Value::Int(0),
        },
        Operator::IsDefined => Value::Bool(!operand.is_absent()),
        Operator::IsNull => Value::Bool(operand.is_absent()),
        Operator::IsEmpty => Value::Bool(operand.is_empty()),
        Operator::IsIterable => Value::Bool(matches!(operand, Value::List(_) | Value::Map(_))),
        Operator::IsEven => Value::Bool(operand.as_f64().map(|n| (n as i64) % 2 == 0).unwrap_or(false)),
        Operator::IsOdd => Value::Bool(operand.as_f64().map(|n| (n as i64) % 2 != 0).unwrap_or(false)),
        _ => Value::Null,
    }
}

/// Evaluates a binary operator against already-evaluated operands.
pub fn apply_binary(op: Operator, left: &Value, right: &Value) -> Value {
    match op {
        Operator::Or => Value::Bool(left.is_truthy() || right.is_truthy()),
        Operator::And => Value::Bool(left.is_truthy() && right.is_truthy()),
        Operator::In => Value::Bool(contains(left, right)),
        Operator::NotIn => Value::Bool(!contains(left, right)),
        Operator::Eq => Value::Bool(left.structural_eq(right)),
        Operator::Ne => Value::Bool(!left.structural_eq(right)),
        Operator::Lt => compare(left, right).map(|o| o.is_lt()).map(Value::Bool).unwrap_or(Value::Bool(false)),
        Operator::Le => compare(left, right).map(|o| o.is_le()).map(Value::Bool).unwrap_or(Value::Bool(false)),
        Operator::Gt => compare(left, right).map(|o| o.is_gt()).map(Value::Bool).unwrap_or(Value::Bool(false)),
        Operator::Ge => compare(left, right).map(|o| o.is_ge()).map(Value::Bool).unwrap_or(Value::Bool(false)),
        Operator::Concat => Value::Str(format!("{}{}", left.to_display_string(), right.to_display_string())),
        Operator::Add => numeric(left, right, |a, b| a + b, |a, b| a + b),
        Operator::Sub => numeric(left, right, |a, b| a - b, |a, b| a - b),
        Operator::Mul => numeric(left, right, |a, b| a * b, |a, b| a * b),
        Operator::Div => {
            let (a, b) = (left.as_f64().unwrap_or(0.0), right.as_f64().unwrap_or(0.0));
            if b == 0.0 { Value::Int(0) } else { Value::Float(a / b) }
        }
        Operator::Mod => {
            let (a, b) = (left.as_f64().unwrap_or(0.0) as i64, right.as_f64().unwrap_or(0.0) as i64);
            if b == 0 { Value::Int(0) } else { Value::Int(a % b) }
        }
        Operator::Pow => {
            let (a, b) = (left.as_f64().unwrap_or(0.0), right.as_f64().unwrap_or(0.0));
            let result = a.powf(b);
            if is_int(left) && is_int(right) && b >= 0.0 {
                Value::Int(result as i64)
            } else {
                Value::Float(result)
            }
        }
        Operator::DivisibleBy => {
            let b = right.as_f64().unwrap_or(0.0) as i64;
            let a = left.as_f64().unwrap_or(0.0) as i64;
            Value::Bool(b != 0 && a % b == 0)
        }
        Operator::StartsWith => Value::Bool(left.to_display_string().starts_with(&right.to_display_string())),
        Operator::EndsWith => Value::Bool(left.to_display_string().ends_with(&right.to_display_string())),
        _ => Value::Null,
    }
}

fn is_int(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_))
}

fn numeric(left: &Value, right: &Value, f64_op: impl Fn(f64, f64) -> f64, int_op: impl Fn(i64, i64) -> i64) -> Value {
    if is_int(left) && is_int(right) {
        let a = left.as_f64().unwrap_or(0.0) as i64;
        let b = right.as_f64().unwrap_or(0.0) as i64;
        Value::Int(int_op(a, b))
    } else {
        let a = left.as_f64().unwrap_or(0.0);
        let b = right.as_f64().unwrap_or(0.0);
        Value::Float(f64_op(a, b))
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

/// `in`/`not in` membership. An empty-string left operand is always `false`
/// regardless of the right operand (resolved open question, spec §9).
fn contains(needle: &Value, haystack: &Value) -> bool {
    if matches!(needle, Value::Str(s) if s.is_empty()) {
        return false;
    }
    match haystack {
        Value::List(items) => items.iter().any(|item| item.structural_eq(needle)),
        Value::Map(map) => map.contains_key(&needle.to_display_string()),
        Value::Str(haystack) => match needle {
            Value::Str(needle) => haystack.contains(needle.as_str()),
            _ => haystack.contains(&needle.to_display_string()),
        },
        _ => false,
    }
}
