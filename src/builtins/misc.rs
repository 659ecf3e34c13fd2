//! Builtins with no pure-function shape: `json_encode` (needs a conversion
//! to `serde_json::Value`), `dump` and `random` (deliberately non-constant
//! per spec §6), and the `raw`/`format` stubs. Grounded on `builtins.cpp`'s
//! `filterJsonEncode`/`functionDump`/`functionRandom`/`filterRaw`/
//! `filterFormat` (original_source) — the latter two are unconditional
//! stubs there too.

use rand::Rng;
use serde_json::Value as Json;

use crate::value::Value;

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::Number((*n).into()),
        Value::Float(n) => serde_json::Number::from_f64(*n).map(Json::Number).unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()),
        Value::Object(obj) => Json::String(obj.to_display_string()),
    }
}

pub fn json_encode(args: &[Value]) -> Value {
    match args.first() {
        Some(v) => Value::Str(serde_json::to_string(&to_json(v)).unwrap_or_default()),
        None => Value::Str("null".to_string()),
    }
}

/// `dump(...)` — a developer-facing debug rendering of each argument's
/// type and value, deliberately non-constant so it always reflects the
/// live environment at render time.
pub fn dump(args: &[Value]) -> Value {
    let parts: Vec<String> = args.iter().map(|v| format!("{}({})", v.type_name(), v.to_display_string())).collect();
    Value::Str(parts.join(", "))
}

/// `random()`, `random(max)`, `random(array)`, `random(string)`.
pub fn random(args: &[Value]) -> Value {
    let mut rng = rand::thread_rng();
    match args.first() {
        None => Value::Int(rng.gen()),
        Some(Value::List(items)) => items.get(rng.gen_range(0..items.len().max(1))).cloned().unwrap_or(Value::Null),
        Some(Value::Str(s)) => {
            let chars: Vec<char> = s.chars().collect();
            if chars.is_empty() {
                Value::Str(String::new())
            } else {
                Value::Str(chars[rng.gen_range(0..chars.len())].to_string())
            }
        }
        Some(v) => match v.as_f64() {
            Some(max) if max >= 0.0 => Value::Int(rng.gen_range(0..=(max as i64).max(0))),
            _ => Value::Int(rng.gen()),
        },
    }
}

/// Present-but-unimplemented, matching the reference implementation's own
/// unconditional-empty stubs.
pub fn raw(_args: &[Value]) -> Value {
    Value::Null
}

pub fn format(_args: &[Value]) -> Value {
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_encode_round_trips_a_map() {
        let mut map = indexmap::IndexMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let result = json_encode(&[Value::Map(map)]);
        assert!(matches!(result, Value::Str(ref s) if s == "{\"a\":1}"));
    }

    #[test]
    fn random_with_empty_list_is_null() {
        assert!(matches!(random(&[Value::List(Vec::new())]), Value::Null));
    }
}
