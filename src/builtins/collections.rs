//! List/map builtins. Grounded on `builtins.cpp`'s `filterBatch`/
//! `filterJoin`/`filterKeys`/`filterMerge`/`filterReverse`/`filterSlice`/
//! `filterSort`/`filterDefault`/`functionCycle` (original_source).

use indexmap::IndexMap;

use crate::value::Value;

fn as_list(v: &Value) -> Vec<Value> {
    match v {
        Value::List(items) => items.clone(),
        Value::Map(map) => map.values().cloned().collect(),
        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// `batch(list, count, fill = null)` — pads `list` up to a multiple of
/// `count` with `fill`, matching the original's fixed-size-chunk fill-only
/// behavior (it does not chunk, only pads the flat list).
pub fn batch(args: &[Value]) -> Value {
    if args.len() < 2 {
        return Value::Null;
    }
    let mut list = as_list(&args[0]);
    let count = args[1].as_f64().unwrap_or(0.0) as usize;
    let fill = args.get(2).cloned().unwrap_or(Value::Null);
    if list.len() < count {
        list.resize(count, fill);
    }
    Value::List(list)
}

/// `cycle(array, position)`.
pub fn cycle(args: &[Value]) -> Value {
    let list = args.first().map(as_list).unwrap_or_default();
    if list.is_empty() {
        return Value::Null;
    }
    let i = args.get(1).and_then(Value::as_f64).unwrap_or(0.0) as i64;
    let idx = (i.rem_euclid(list.len() as i64)) as usize;
    list[idx].clone()
}

/// `default(value, fallback)` — an absent or empty value yields `fallback`.
pub fn default(args: &[Value]) -> Value {
    match args.first() {
        Some(v) if !v.is_empty() => v.clone(),
        _ => args.get(1).cloned().unwrap_or(Value::Null),
    }
}

pub fn first(args: &[Value]) -> Value {
    as_list(args.first().unwrap_or(&Value::Null)).into_iter().next().unwrap_or(Value::Null)
}

pub fn last(args: &[Value]) -> Value {
    as_list(args.first().unwrap_or(&Value::Null)).into_iter().next_back().unwrap_or(Value::Null)
}

pub fn join(args: &[Value]) -> Value {
    let list = args.first().map(as_list).unwrap_or_default();
    let sep = args.get(1).map(Value::to_display_string).unwrap_or_default();
    Value::Str(list.iter().map(Value::to_display_string).collect::<Vec<_>>().join(&sep))
}

pub fn keys(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Map(map)) => Value::List(map.keys().map(|k| Value::Str(k.clone())).collect()),
        Some(Value::List(items)) => Value::List((0..items.len() as i64).map(Value::Int).collect()),
        _ => Value::List(Vec::new()),
    }
}

pub fn length(args: &[Value]) -> Value {
    let n = match args.first() {
        Some(Value::List(items)) => items.len(),
        Some(Value::Map(map)) => map.len(),
        Some(Value::Str(s)) => s.chars().count(),
        Some(Value::Null) | None => 0,
        Some(_) => 1,
    };
    Value::Int(n as i64)
}

/// `merge(a, b)` — list concatenation, or map merge with `b`'s keys
/// overwriting `a`'s, matching the original's behavior per value shape.
pub fn merge(args: &[Value]) -> Value {
    match (args.first(), args.get(1)) {
        (Some(Value::List(a)), Some(Value::List(b))) => {
            let mut out = a.clone();
            out.extend(b.clone());
            Value::List(out)
        }
        (Some(Value::Map(a)), Some(Value::Map(b))) => {
            let mut out: IndexMap<String, Value> = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            Value::Map(out)
        }
        _ => Value::Null,
    }
}

pub fn reverse(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Str(s)) => Value::Str(s.chars().rev().collect()),
        Some(v) => {
            let mut items = as_list(v);
            items.reverse();
            Value::List(items)
        }
        None => Value::Null,
    }
}

/// `slice(value, start, length = null)` — negative `start` counts from the
/// end, matching Twig's slice filter semantics.
pub fn slice(args: &[Value]) -> Value {
    let Some(value) = args.first() else { return Value::Null };
    let items = as_list(value);
    let len = items.len() as i64;
    let start = args.get(1).and_then(Value::as_f64).unwrap_or(0.0) as i64;
    let start = if start < 0 { (len + start).max(0) } else { start.min(len) };
    let take = args.get(2).and_then(Value::as_f64).map(|n| n as i64).unwrap_or(len - start);
    let end = (start + take.max(0)).min(len);
    let sliced: Vec<Value> = items.into_iter().skip(start as usize).take((end - start).max(0) as usize).collect();

    if matches!(value, Value::Str(_)) {
        Value::Str(sliced.iter().map(Value::to_display_string).collect())
    } else {
        Value::List(sliced)
    }
}

pub fn sort(args: &[Value]) -> Value {
    let mut items = args.first().map(as_list).unwrap_or_default();
    items.sort_by(|a, b| match (a, b) {
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => a.as_f64().unwrap_or(0.0).partial_cmp(&b.as_f64().unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal),
    });
    Value::List(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_pads_to_multiple() {
        let result = batch(&[Value::List(vec![Value::Int(1)]), Value::Int(3), Value::Int(0)]);
        let Value::List(items) = result else { panic!() };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn slice_handles_negative_start() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]);
        let result = slice(&[list, Value::Int(-2)]);
        let Value::List(items) = result else { panic!() };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn default_falls_back_on_empty() {
        assert!(matches!(default(&[Value::Str(String::new()), Value::Str("x".into())]), Value::Str(ref s) if s == "x"));
    }
}
