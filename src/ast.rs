//! The closed AST node-kind table (spec §3), modeled as a single tagged
//! `Kind` enum wrapped by [`Ast`] rather than a `Box<dyn Node>` hierarchy of
//! per-kind types — grounded on spec §9's own design note ("Operators as a
//! closed tag... do not dispatch through polymorphic per-operator classes")
//! and the corpus's general closed-enum-over-trait-objects idiom. Compile
//! rewrites consume `self` and return an owned new [`Ast`], replacing the
//! reference implementation's in-place pointer-swap (`swapAndDestroy`).

use std::cell::RefCell;
use std::rc::Rc;

use regex::Regex;

use crate::location::Location;
use crate::program::EscapeMode;
use crate::value::Value;

pub type NodeId = u32;

/// Every operator, unary test, and binary test the expression grammar can
/// produce — a single closed tag consumed by one evaluator function (spec
/// §9), rather than a polymorphic per-operator node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Or,
    And,
    In,
    NotIn,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Not,
    Neg,
    IsDefined,
    IsNull,
    IsEmpty,
    IsIterable,
    IsEven,
    IsOdd,
    DivisibleBy,
    StartsWith,
    EndsWith,
}

/// A shared, mutable block body: the master's body is swapped in place when
/// a later same-named block overrides it (spec §4.4), and `parent()`
/// references share this same cell rather than aliasing a raw pointer.
pub type SharedBody = Rc<RefCell<Ast>>;

#[derive(Clone)]
pub enum Kind {
    Text(String),
    Noop,
    Literal(Value),
    Variable {
        name: String,
        slot: Option<usize>,
        write: bool,
    },
    ChainedVariable {
        base: Box<Ast>,
        chain: Vec<Ast>,
    },
    MultipleValue(Vec<Ast>),
    Expression {
        op: Operator,
        left: Box<Ast>,
        right: Option<Box<Ast>>,
    },
    MatchesTest {
        value: Box<Ast>,
        test: Option<Box<Ast>>,
        compiled_regex: Option<Rc<Regex>>,
    },
    Ternary {
        condition: Box<Ast>,
        on_success: Option<Box<Ast>>,
        on_failure: Option<Box<Ast>>,
    },
    MethodCall {
        name: String,
        arguments: Vec<Ast>,
    },
    /// Marks the position, within a `{% filter %}` chain's innermost call
    /// argument list, where the rendered body string is spliced in at
    /// render time (spec §9's filter-chaining note; replaces the source's
    /// in-place literal mutation with a dedicated placeholder slot).
    FilterBodyPlaceholder,
    ValueMap(Vec<(Ast, Ast)>),
    StringLit {
        template: String,
        inserts: Vec<(usize, usize, Ast)>,
    },
    Multiple(Vec<Ast>),
    IfClause {
        condition: Box<Ast>,
        on_true: Box<Ast>,
        on_false: Option<Box<Ast>>,
    },
    ForLoop {
        variable: String,
        key: Option<String>,
        variable_slot: Option<usize>,
        key_slot: Option<usize>,
        iterable: Box<Ast>,
        body: Box<Ast>,
        or_else: Option<Box<Ast>>,
        condition: Option<Box<Ast>>,
        loop_slot: Option<usize>,
    },
    Set {
        name: String,
        slot: Option<usize>,
        value: Box<Ast>,
    },
    Block {
        name: String,
        body: SharedBody,
    },
    Include {
        /// The parsed name expression (often a string literal, sometimes a
        /// concatenation); the compiler folds/evaluates it to resolve which
        /// template(s) to link in.
        name_expr: Option<Box<Ast>>,
        names: Vec<String>,
        is_extends: bool,
        sub_tree: Option<Box<Ast>>,
    },
    Embed {
        name_expr: Option<Box<Ast>>,
        names: Vec<String>,
        overrides: Box<Ast>,
        sub_tree: Option<Box<Ast>>,
    },
    Filter {
        chain: Box<Ast>,
        body: Box<Ast>,
    },
    Autoescape {
        /// Raw mode name from source, e.g. `"html"`; `None` for bare
        /// `{% autoescape %}` (defaults to `Html`). Resolved into `mode` by
        /// the compiler, mirroring how `Variable::slot` starts `None` and is
        /// filled in during compile.
        mode_name: Option<String>,
        mode: EscapeMode,
        body: Box<Ast>,
    },
    Spaceless {
        body: Box<Ast>,
    },
}

#[derive(Clone)]
pub struct Ast {
    pub id: NodeId,
    pub loc: Location,
    pub kind: Kind,
}

impl Ast {
    pub fn new(id: NodeId, loc: Location, kind: Kind) -> Self {
        Self { id, loc, kind }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.kind, Kind::Noop)
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match &self.kind {
            Kind::Literal(v) => Some(v),
            _ => None,
        }
    }
}

/// Hands out unique, monotonically increasing node ids for the whitespace
/// trim side table and the embed/block bookkeeping.
#[derive(Default)]
pub struct NodeIdAllocator {
    next: NodeId,
}

impl NodeIdAllocator {
    pub fn alloc(&mut self) -> NodeId {
        let id = self.next;
        self.next += 1;
        id
    }
}
