//! Variable-accessor capability (spec §6): walks a chain `base.k1.k2…`
//! against the caller's [`Value`], dispatching per step by shape. Grounded
//! on `variableaccessor.cpp`'s `walkChain` dispatch order: list before map,
//! then the structured-object protocol with fields taking priority over
//! methods.

use crate::value::Value;

/// A key in an access chain: either a dotted/member name or a computed
/// `[expr]` subscript, already evaluated to a `Value`.
#[derive(Debug, Clone)]
pub enum Key {
    Name(String),
    Index(Value),
}

/// The structured-object protocol for `Value::Object`. First matching
/// overload wins; fields are tried before methods.
pub trait StructuredObject {
    fn field_by_name(&self, _name: &str) -> Option<Value> {
        None
    }

    fn method_by_name(&self, _name: &str, _args: &[Value]) -> Option<Value> {
        None
    }

    fn to_display_string(&self) -> String;
}

/// Walks one step of an access chain. A failed step returns `Value::Null`
/// (absent), never an error — the renderer surfaces genuine failures
/// through `VariableNotSet`, not through the chain walk itself.
pub fn step(base: &Value, key: &Key) -> Value {
    match (base, key) {
        (Value::List(items), Key::Index(idx)) => {
            let Some(i) = idx.as_f64() else { return Value::Null };
            let i = i as i64;
            let idx = if i < 0 { items.len() as i64 + i } else { i };
            if idx < 0 {
                return Value::Null;
            }
            items.get(idx as usize).cloned().unwrap_or(Value::Null)
        }
        (Value::List(items), Key::Name(name)) => {
            name.parse::<usize>().ok().and_then(|i| items.get(i).cloned()).unwrap_or(Value::Null)
        }
        (Value::Map(map), Key::Name(name)) => map.get(name).cloned().unwrap_or(Value::Null),
        (Value::Map(map), Key::Index(idx)) => {
            let k = idx.to_display_string();
            map.get(&k).cloned().unwrap_or(Value::Null)
        }
        (Value::Object(obj), Key::Name(name)) => {
            obj.field_by_name(name).or_else(|| obj.method_by_name(name, &[])).unwrap_or(Value::Null)
        }
        (Value::Object(obj), Key::Index(idx)) => {
            let k = idx.to_display_string();
            obj.field_by_name(&k).unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

/// Walks a full chain starting from `base`.
pub fn walk_chain(base: &Value, keys: &[Key]) -> Value {
    let mut current = base.clone();
    for key in keys {
        current = step(&current, key);
    }
    current
}

/// Calls a method on the resolved chain head (used by `ChainedVariable`
/// when the final step is itself a method call, e.g. `user.fullName()`).
pub fn call_method(base: &Value, name: &str, args: &[Value]) -> Value {
    match base {
        Value::Object(obj) => obj.method_by_name(name, args).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn list_index_bounds_checked() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(step(&list, &Key::Index(Value::Int(5))), Value::Null));
        assert!(matches!(step(&list, &Key::Index(Value::Int(0))), Value::Int(1)));
    }

    #[test]
    fn map_by_key() {
        let mut map = IndexMap::new();
        map.insert("name".to_string(), Value::Str("a".to_string()));
        let v = Value::Map(map);
        assert!(matches!(step(&v, &Key::Name("name".to_string())), Value::Str(ref s) if s == "a"));
    }
}
