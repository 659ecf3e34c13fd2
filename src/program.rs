//! The compiled `Program` record (spec §3): variable slot table, usage
//! records, function table, block map, dependencies, and the escape/
//! spaceless render state. Grounded on `templateengine_p.hpp`'s
//! `TemplateProgramPrivate`.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::ast::{Ast, SharedBody};
use crate::error::TemplateError;
use crate::location::Location;
use crate::value::Value;

/// Escape modes for expansion rendering, matching Twig's `escape` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeMode {
    #[default]
    Verbatim,
    Html,
    JavaScript,
    Css,
    Url,
    HtmlAttr,
}

impl EscapeMode {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "html" => Self::Html,
            "js" | "javascript" => Self::JavaScript,
            "css" => Self::Css,
            "url" => Self::Url,
            "html_attr" => Self::HtmlAttr,
            "false" | "off" | "none" => Self::Verbatim,
            _ => return None,
        })
    }
}

/// Bitset of whitespace trim modes attached to a node via the side table
/// rather than a field on the node itself, so the entry transfers cleanly
/// when a node is replaced during constant folding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimFlags(u8);

impl TrimFlags {
    pub const NONE: Self = Self(0);
    pub const LEFT: Self = Self(1);
    pub const RIGHT: Self = Self(2);
    pub const INNER_LEFT: Self = Self(4);
    pub const INNER_RIGHT: Self = Self(8);

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// A registered callable: either a user function or a built-in, tagged
/// with whether it is safe to constant-fold (spec §6).
pub type Callback = Rc<dyn Fn(&[Value]) -> Value>;

#[derive(Clone)]
pub struct Function {
    pub callback: Callback,
    pub is_constant: bool,
}

pub type FunctionMap = IndexMap<String, Function>;

/// Per-variable-reference bookkeeping: where it happened, whether it wrote
/// the slot, and (for writes) whether the written value was constant.
#[derive(Debug, Clone, Copy)]
pub struct VariableUsage {
    pub location: Location,
    pub is_write: bool,
    pub is_constant: bool,
}

/// Mutable state threaded through compile only; dropped before the Program
/// is published (spec §3's "compile-time state owned by the compile pass").
#[derive(Default)]
pub struct CompileInfo {
    pub condition_branch_depth: u32,
    pub current_parent_block: Option<SharedBody>,
    pub trim: AHashMap<u32, TrimFlags>,
}

/// The compiled, renderable template together with its slot table, function
/// table, block map, and dependency list (spec §3's "Program record").
pub struct Program {
    pub root: Option<Ast>,
    pub error: TemplateError,
    pub dependencies: Vec<String>,
    pub escape_mode: EscapeMode,
    pub spaceless: bool,
    pub variables: Vec<String>,
    pub values: Vec<Value>,
    pub usages: Vec<Vec<VariableUsage>>,
    pub functions: FunctionMap,
    pub blocks: IndexMap<String, SharedBody>,
    pub version_id: i64,
    pub locale_decimal_point: char,
    pub locale_group_separator: char,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            root: None,
            error: TemplateError::none(),
            dependencies: Vec::new(),
            escape_mode: EscapeMode::Verbatim,
            spaceless: false,
            variables: Vec::new(),
            values: Vec::new(),
            usages: Vec::new(),
            functions: IndexMap::new(),
            blocks: IndexMap::new(),
            version_id: -1,
            locale_decimal_point: '.',
            locale_group_separator: ',',
        }
    }
}

impl Program {
    /// Returns the slot for `name`, allocating a fresh one (initialized to
    /// `Value::Null`, i.e. "absent") on first encounter.
    pub fn slot_for(&mut self, name: &str) -> usize {
        if let Some(idx) = self.variables.iter().position(|v| v == name) {
            return idx;
        }
        let idx = self.variables.len();
        self.variables.push(name.to_string());
        self.values.push(Value::Null);
        self.usages.push(Vec::new());
        idx
    }

    pub fn record_usage(&mut self, slot: usize, location: Location, is_write: bool, is_constant: bool) {
        self.usages[slot].push(VariableUsage { location, is_write, is_constant });
    }

    pub fn prepend_write_usage(&mut self, slot: usize, location: Location) {
        self.usages[slot].insert(0, VariableUsage { location, is_write: true, is_constant: false });
    }

    pub fn is_first_usage_writing(&self, slot: usize) -> bool {
        self.usages[slot].first().is_some_and(|u| u.is_write)
    }

    /// A variable is constant-at-point-P iff its latest preceding write
    /// usage (relative to the usages recorded *so far*, i.e. during
    /// compile) had `is_constant=true` and no write happened inside a
    /// conditional branch.
    pub fn last_write_is_constant(&self, slot: usize) -> bool {
        self.usages[slot]
            .iter()
            .rev()
            .find(|u| u.is_write)
            .is_some_and(|u| u.is_constant)
    }
}
