//! The dynamic value variant flowing through render: `Null | Bool | Int |
//! Float | String | List | Map | Object`. Plain ownership — no refcounted
//! heap/arena the way the teacher's own `Value` works, since the render
//! model here never needs cross-node aliasing of a runtime value (per spec
//! §9's design note, the sum type alone is sufficient).

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::accessor::StructuredObject;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Object(Rc<dyn StructuredObject>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(n) => write!(f, "Int({n})"),
            Self::Float(n) => write!(f, "Float({n})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::List(v) => write!(f, "List({v:?})"),
            Self::Map(m) => write!(f, "Map({m:?})"),
            Self::Object(_) => write!(f, "Object(..)"),
        }
    }
}

impl fmt::Debug for dyn StructuredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<object>")
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness: absent is false, boolean is itself, anything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            _ => true,
        }
    }

    /// Natural string projection used for rendering and string coercion.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => if *b { "1".to_string() } else { String::new() },
            Self::Int(n) => n.to_string(),
            Self::Float(n) => format_float(*n),
            Self::Str(s) => s.clone(),
            Self::List(items) => items.iter().map(Value::to_display_string).collect::<Vec<_>>().join(""),
            Self::Map(map) => map.values().map(Value::to_display_string).collect::<Vec<_>>().join(""),
            Self::Object(obj) => obj.to_display_string(),
        }
    }

    /// Converts to `f64` when the value is numeric or a numeric-looking
    /// string; `None` for anything else (arithmetic/comparison then fall
    /// back to their own zero/false defaults per spec §4.5).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Str(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Structural equality on the variant, used by `==`/`!=`.
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structural_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| v.structural_eq(bv)))
            }
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Formats a float the way Twig's source renders a `double`: integral
/// values drop their trailing `.0`, matching `QVariant::toString()` for
/// whole doubles.
pub fn format_float(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        let mut s = format!("{n}");
        if !s.contains('.') && !s.contains('e') {
            s.push_str(".0");
        }
        s
    }
}
