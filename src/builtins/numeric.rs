//! Numeric builtins: `abs`, `max`, `min`, `round`, `range`. Grounded on
//! `builtins.cpp`'s `filterAbs`/`filterMax`/`filterMin`/`filterRound`/
//! `filterRange` (original_source).

use crate::value::Value;

pub fn abs(args: &[Value]) -> Value {
    match args.first() {
        Some(v) => match v.as_f64() {
            Some(n) if matches!(v, Value::Int(_)) => Value::Int(n.abs() as i64),
            Some(n) => Value::Float(n.abs()),
            None => Value::Null,
        },
        None => Value::Null,
    }
}

pub fn max(args: &[Value]) -> Value {
    extremum(args, |a, b| a > b)
}

pub fn min(args: &[Value]) -> Value {
    extremum(args, |a, b| a < b)
}

fn extremum(args: &[Value], better: impl Fn(f64, f64) -> bool) -> Value {
    let items = flatten(args);
    let mut best: Option<&Value> = None;
    for item in &items {
        let Some(n) = item.as_f64() else { continue };
        match best {
            Some(b) if !better(n, b.as_f64().unwrap_or(0.0)) => {}
            _ => best = Some(item),
        }
    }
    best.cloned().unwrap_or(Value::Null)
}

fn flatten(args: &[Value]) -> Vec<Value> {
    if args.len() == 1 {
        if let Value::List(items) = &args[0] {
            return items.clone();
        }
    }
    args.to_vec()
}

/// `round(value, precision = 0, mode = "common")`, modes `common|ceil|floor`.
pub fn round(args: &[Value]) -> Value {
    let n = args.first().and_then(Value::as_f64).unwrap_or(0.0);
    let precision = args.get(1).and_then(Value::as_f64).unwrap_or(0.0) as i32;
    let mode = args.get(2).map(Value::to_display_string).unwrap_or_else(|| "common".to_string());
    let factor = 10f64.powi(precision);
    let scaled = n * factor;
    let rounded = match mode.as_str() {
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        _ => scaled.round(),
    };
    let result = rounded / factor;
    if precision <= 0 {
        Value::Int(result as i64)
    } else {
        Value::Float(result)
    }
}

/// `range(low, high, step = 1)` — numeric or single-character alphanumeric.
pub fn range(args: &[Value]) -> Value {
    let Some(low) = args.first() else { return Value::List(Vec::new()) };
    let Some(high) = args.get(1) else { return Value::List(Vec::new()) };
    let step = args.get(2).and_then(Value::as_f64).unwrap_or(1.0).abs().max(1.0);

    if let (Value::Str(a), Value::Str(b)) = (low, high) {
        if a.chars().count() == 1 && b.chars().count() == 1 {
            let start = a.chars().next().unwrap() as i64;
            let end = b.chars().next().unwrap() as i64;
            return Value::List(char_range(start, end, step as i64));
        }
    }

    let start = low.as_f64().unwrap_or(0.0) as i64;
    let end = high.as_f64().unwrap_or(0.0) as i64;
    Value::List(int_range(start, end, step as i64))
}

fn int_range(start: i64, end: i64, step: i64) -> Vec<Value> {
    let mut out = Vec::new();
    if start <= end {
        let mut i = start;
        while i <= end {
            out.push(Value::Int(i));
            i += step;
        }
    } else {
        let mut i = start;
        while i >= end {
            out.push(Value::Int(i));
            i -= step;
        }
    }
    out
}

fn char_range(start: i64, end: i64, step: i64) -> Vec<Value> {
    int_range(start, end, step)
        .into_iter()
        .filter_map(|v| match v {
            Value::Int(n) => char::from_u32(n as u32).map(|c| Value::Str(c.to_string())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_inclusive_when_divisible() {
        let result = range(&[Value::Int(1), Value::Int(10), Value::Int(3)]);
        let Value::List(items) = result else { panic!("expected list") };
        let values: Vec<i64> = items.into_iter().map(|v| v.as_f64().unwrap() as i64).collect();
        assert_eq!(values, vec![1, 4, 7, 10]);
    }

    #[test]
    fn round_common_mode_rounds_half_away_from_zero() {
        assert!(matches!(round(&[Value::Float(2.5)]), Value::Int(3)));
    }
}
