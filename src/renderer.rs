//! Tree-walking render over a compiled [`Program`] (spec §4.5). Grounded on
//! `astnodes.cpp`'s `*::render`/`*::evaluate` methods: every `Node` subclass
//! there owns both an evaluate-to-value and a render-to-string path; here
//! that split is `Renderer::eval` (value position) vs `Renderer::render_body`
//! (text-output position) over the same closed `Kind` enum.

use ahash::AHashMap;
use chrono::{DateTime, Local, TimeZone};
use indexmap::IndexMap;

use crate::accessor::{self, Key};
use crate::ast::{Ast, Kind};
use crate::builtins;
use crate::compiler::splice;
use crate::error::{Kind as ErrKind, RenderError};
use crate::escape;
use crate::location::Location;
use crate::ops;
use crate::program::{EscapeMode, Program};
use crate::value::Value;

pub struct RenderOutcome {
    pub output: String,
    pub error: Option<RenderError>,
}

/// Renders `program` against `initial` (the caller-supplied environment
/// merged by variable name). The pre-render guard rejects up front any
/// variable whose first usage in the compiled tree is a read rather than a
/// write and that `initial` does not supply — spec §7's "missing variables
/// detected in the pre-render guard abort render before producing output."
pub fn render(program: &Program, initial: &IndexMap<String, Value>) -> Result<RenderOutcome, RenderError> {
    let Some(root) = program.root.as_ref() else {
        return Err(RenderError { kind: ErrKind::NoProgram, message: "no compiled root".into(), location: Location::default() });
    };

    let mut slots = vec![Value::Null; program.variables.len()];
    for (i, name) in program.variables.iter().enumerate() {
        if let Some(value) = initial.get(name) {
            slots[i] = value.clone();
        }
    }

    for (i, name) in program.variables.iter().enumerate() {
        if !program.is_first_usage_writing(i) && !initial.contains_key(name) {
            let location = program.usages[i].first().map(|u| u.location).unwrap_or_default();
            return Err(RenderError {
                kind: ErrKind::VariableNotSet,
                message: format!("variable '{name}' is not set"),
                location,
            });
        }
    }

    let mut renderer = Renderer { program, slots, current_mode: EscapeMode::Verbatim, error: None };
    let mut output = String::new();
    renderer.render_body(root, &mut output);
    Ok(RenderOutcome { output, error: renderer.error })
}

struct Renderer<'a> {
    program: &'a Program,
    slots: Vec<Value>,
    /// Mirrors `TemplateProgramPrivate::escapeMode` during render: the
    /// active autoescape mode, restored after each `Autoescape` body so an
    /// explicit `escape()`/`e` call inside it can recognize a matching mode
    /// and skip its own escaping (the whole-body pass covers it once).
    current_mode: EscapeMode,
    error: Option<RenderError>,
}

impl<'a> Renderer<'a> {
    fn record_error(&mut self, kind: ErrKind, loc: Location, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(RenderError { kind, message: message.into(), location: loc });
        }
    }

    /// Evaluates `node` to a [`Value`]. Only ever called on the
    /// expression-shaped `Kind` variants the parser can actually produce in
    /// a value position; the control-flow-only variants fall through to a
    /// defensive `Value::Null` so the match stays exhaustive.
    fn eval(&mut self, node: &Ast) -> Value {
        match &node.kind {
            Kind::Literal(v) => v.clone(),
            Kind::Text(s) => Value::Str(s.clone()),
            Kind::Variable { slot, .. } => slot.and_then(|s| self.slots.get(s)).cloned().unwrap_or(Value::Null),
            Kind::ChainedVariable { base, chain } => {
                let base = self.eval(base);
                let keys: Vec<Key> = chain.iter().map(|c| Key::Index(self.eval(c))).collect();
                accessor::walk_chain(&base, &keys)
            }
            Kind::MultipleValue(items) => Value::List(items.iter().map(|i| self.eval(i)).collect()),
            Kind::ValueMap(pairs) => {
                let mut map = IndexMap::new();
                for (k, v) in pairs {
                    let key = self.eval(k).to_display_string();
                    map.insert(key, self.eval(v));
                }
                Value::Map(map)
            }
            Kind::StringLit { template, inserts } => {
                let resolved: Vec<(usize, usize, String)> =
                    inserts.iter().map(|(off, len, n)| (*off, *len, self.eval(n).to_display_string())).collect();
                Value::Str(splice(template, &resolved))
            }
            Kind::Expression { op, left, right } => {
                let left = self.eval(left);
                match right {
                    Some(r) => {
                        let right = self.eval(r);
                        ops::apply_binary(*op, &left, &right)
                    }
                    None => ops::apply_unary(*op, &left),
                }
            }
            Kind::MatchesTest { value, test, compiled_regex } => {
                let value = self.eval(value).to_display_string();
                let matched = match compiled_regex {
                    Some(re) => re.is_match(&value),
                    None => match test {
                        Some(t) => {
                            let pattern = self.eval(t).to_display_string();
                            regex::Regex::new(&pattern).map(|re| re.is_match(&value)).unwrap_or(false)
                        }
                        None => false,
                    },
                };
                Value::Bool(matched)
            }
            Kind::Ternary { condition, on_success, on_failure } => {
                let cond = self.eval(condition);
                if cond.is_truthy() {
                    match on_success {
                        Some(n) => self.eval(n),
                        None => cond,
                    }
                } else {
                    match on_failure {
                        Some(n) => self.eval(n),
                        None => Value::Null,
                    }
                }
            }
            Kind::MethodCall { name, arguments } => {
                let args: Vec<Value> = arguments.iter().map(|a| self.eval(a)).collect();
                self.dispatch_method_call(node.loc, name, args)
            }
            Kind::FilterBodyPlaceholder => Value::Null,
            _ => Value::Null,
        }
    }

    /// Like [`Self::eval`], but any `FilterBodyPlaceholder` encountered is
    /// substituted with `placeholder` instead of evaluating to `Null` — used
    /// by `{% filter %}` to splice the rendered body into the innermost
    /// call's argument list, replacing the original's in-place
    /// placeholder-node mutation.
    fn eval_with_placeholder(&mut self, node: &Ast, placeholder: &Value) -> Value {
        match &node.kind {
            Kind::FilterBodyPlaceholder => placeholder.clone(),
            Kind::MethodCall { name, arguments } => {
                let args: Vec<Value> = arguments.iter().map(|a| self.eval_with_placeholder(a, placeholder)).collect();
                self.dispatch_method_call(node.loc, name, args)
            }
            _ => self.eval(node),
        }
    }

    fn dispatch_method_call(&mut self, loc: Location, name: &str, args: Vec<Value>) -> Value {
        if builtins::RENDER_DISPATCHED.contains(&name) {
            return match name {
                "parent" => Value::Null, // always resolved at compile time; never reached
                "block" => self.render_named_block(args.first()),
                "escape" | "e" => self.builtin_escape(loc, &args),
                "date" => self.builtin_date(&args),
                "number_format" => self.builtin_number_format(&args),
                _ => unreachable!("RENDER_DISPATCHED and this match must list the same names"),
            };
        }

        if let Some(function) = self.program.functions.get(name) {
            return (function.callback)(&args);
        }
        match args.first() {
            Some(receiver) => accessor::call_method(receiver, name, &args[1..]),
            None => Value::Null,
        }
    }

    fn render_named_block(&mut self, name: Option<&Value>) -> Value {
        let Some(name) = name.map(Value::to_display_string) else { return Value::Str(String::new()) };
        let Some(master) = self.program.blocks.get(&name).cloned() else {
            return Value::Str(String::new());
        };
        let mut out = String::new();
        self.render_body(&master.borrow(), &mut out);
        Value::Str(out)
    }

    fn builtin_escape(&mut self, loc: Location, args: &[Value]) -> Value {
        let data = args.first().map(Value::to_display_string).unwrap_or_default();
        let mode_name = args.get(1).map(Value::to_display_string).unwrap_or_else(|| "html".to_string());
        let Some(mode) = EscapeMode::parse(&mode_name) else {
            self.record_error(ErrKind::InvalidEscapeMode, loc, format!("unknown escape mode '{mode_name}'"));
            return Value::Str(String::new());
        };
        if mode == EscapeMode::Verbatim {
            self.record_error(ErrKind::InvalidEscapeMode, loc, "escape mode cannot be verbatim");
            return Value::Str(String::new());
        }
        // Already inside a matching Autoescape: return the raw value and let
        // its whole-body pass escape it exactly once (`filterEscape`'s
        // double-escape-avoidance check).
        if mode == self.current_mode {
            return Value::Str(data);
        }
        Value::Str(escape::escape(&data, mode))
    }

    fn builtin_date(&mut self, args: &[Value]) -> Value {
        let dt: DateTime<Local> = match args.first() {
            None => Local::now(),
            Some(Value::Int(ts)) => Local.timestamp_opt(*ts, 0).single().unwrap_or_else(Local::now),
            Some(Value::Float(ts)) => Local.timestamp_opt(*ts as i64, 0).single().unwrap_or_else(Local::now),
            Some(Value::Str(s)) => DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Local))
                .unwrap_or_else(|_| Local::now()),
            Some(_) => Local::now(),
        };
        let format = args.get(1).map(Value::to_display_string).unwrap_or_else(|| "%Y-%m-%d %H:%M:%S".to_string());
        Value::Str(dt.format(&format).to_string())
    }

    fn builtin_number_format(&mut self, args: &[Value]) -> Value {
        let n = args.first().and_then(Value::as_f64).unwrap_or(0.0);
        let decimals = args.get(1).and_then(Value::as_f64).unwrap_or(0.0).max(0.0) as usize;
        let decimal_point =
            args.get(2).map(Value::to_display_string).unwrap_or_else(|| self.program.locale_decimal_point.to_string());
        let group_separator =
            args.get(3).map(Value::to_display_string).unwrap_or_else(|| self.program.locale_group_separator.to_string());

        let formatted = format!("{n:.decimals$}");
        let (integer_part, fraction_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), ""));
        let negative = integer_part.starts_with('-');
        let digits = integer_part.trim_start_matches('-');

        let mut grouped = String::new();
        for (i, c) in digits.chars().rev().enumerate() {
            if i > 0 && i % 3 == 0 {
                grouped.push_str(&group_separator.chars().rev().collect::<String>());
            }
            grouped.push(c);
        }
        let integer_grouped: String = grouped.chars().rev().collect();

        let mut result = String::new();
        if negative {
            result.push('-');
        }
        result.push_str(&integer_grouped);
        if decimals > 0 {
            result.push_str(&decimal_point);
            result.push_str(fraction_part);
        }
        Value::Str(result)
    }

    fn render_body(&mut self, node: &Ast, out: &mut String) {
        match &node.kind {
            Kind::Text(s) => out.push_str(s),
            Kind::Noop => {}
            Kind::Multiple(items) => {
                for item in items {
                    self.render_body(item, out);
                }
            }
            Kind::IfClause { condition, on_true, on_false } => {
                if self.eval(condition).is_truthy() {
                    self.render_body(on_true, out);
                } else if let Some(n) = on_false {
                    self.render_body(n, out);
                }
            }
            Kind::ForLoop { variable_slot, key_slot, loop_slot, iterable, body, or_else, condition, .. } => {
                self.render_for_loop(*variable_slot, *key_slot, *loop_slot, iterable, body, or_else.as_deref(), condition.as_deref(), out);
            }
            Kind::Set { slot, value, .. } => {
                let v = self.eval(value);
                if let Some(slot) = slot {
                    self.slots[*slot] = v;
                }
            }
            Kind::Block { body, .. } => self.render_body(&body.borrow(), out),
            Kind::Filter { chain, body } => {
                let mut rendered_body = String::new();
                self.render_body(body, &mut rendered_body);
                let placeholder = Value::Str(rendered_body);
                let result = self.eval_with_placeholder(chain, &placeholder);
                out.push_str(&self.maybe_escape(result.to_display_string(), chain));
            }
            Kind::Autoescape { mode, body, .. } => {
                let previous = self.current_mode;
                self.current_mode = *mode;
                let mut inner = String::new();
                self.render_body(body, &mut inner);
                self.current_mode = previous;
                out.push_str(&escape::escape(&inner, *mode));
            }
            Kind::Spaceless { body } => self.render_body(body, out),
            // Fully inlined by the compiler; never present in a compiled tree.
            Kind::Include { .. } | Kind::Embed { .. } => {}
            // Every remaining Kind is value-producing: evaluate, then apply
            // the active autoescape mode unless this expansion's outermost
            // call is itself an explicit `escape`/`e`/`raw` (it already
            // produced the intended output).
            _ => {
                let value = self.eval(node);
                out.push_str(&self.maybe_escape(value.to_display_string(), node));
            }
        }
    }

    /// Applies the active autoescape mode to `text`, unless `node`'s
    /// outermost call already is an explicit `escape`/`e`/`raw`, matching
    /// Twig's "explicit escape/raw suppresses auto-escaping" convention.
    fn maybe_escape(&self, text: String, node: &Ast) -> String {
        if self.current_mode == EscapeMode::Verbatim {
            return text;
        }
        if let Kind::MethodCall { name, .. } = &node.kind {
            if matches!(name.as_str(), "escape" | "e" | "raw") {
                return text;
            }
        }
        escape::escape(&text, self.current_mode)
    }

    #[allow(clippy::too_many_arguments)]
    fn render_for_loop(
        &mut self,
        variable_slot: Option<usize>,
        key_slot: Option<usize>,
        loop_slot: Option<usize>,
        iterable: &Ast,
        body: &Ast,
        or_else: Option<&Ast>,
        condition: Option<&Ast>,
        out: &mut String,
    ) {
        let iterable = self.eval(iterable);
        let pairs: Vec<(Value, Value)> = match iterable {
            Value::List(items) => items.into_iter().enumerate().map(|(i, v)| (Value::Int(i as i64), v)).collect(),
            Value::Map(map) => map.into_iter().map(|(k, v)| (Value::Str(k), v)).collect(),
            _ => Vec::new(),
        };

        let previous_variable = variable_slot.map(|s| self.slots[s].clone());
        let previous_key = key_slot.map(|s| self.slots[s].clone());
        let previous_loop = loop_slot.map(|s| self.slots[s].clone());

        let mut filtered = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            if let Some(cond) = condition {
                if let Some(vs) = variable_slot {
                    self.slots[vs] = v.clone();
                }
                if let Some(ks) = key_slot {
                    self.slots[ks] = k.clone();
                }
                if !self.eval(cond).is_truthy() {
                    continue;
                }
            }
            filtered.push((k, v));
        }

        if filtered.is_empty() {
            if let Some(vs) = variable_slot {
                self.slots[vs] = previous_variable.clone().unwrap_or(Value::Null);
            }
            if let Some(ks) = key_slot {
                self.slots[ks] = previous_key.clone().unwrap_or(Value::Null);
            }
            if let Some(or_else) = or_else {
                self.render_body(or_else, out);
            }
            return;
        }

        let parent = Value::Map({
            let mut m = IndexMap::new();
            m.insert("loop".to_string(), previous_loop.clone().unwrap_or(Value::Null));
            m
        });

        let total = filtered.len();
        let has_condition = condition.is_some();
        for (index, (key, value)) in filtered.into_iter().enumerate() {
            if let Some(vs) = variable_slot {
                self.slots[vs] = value;
            }
            if let Some(ks) = key_slot {
                self.slots[ks] = key;
            }
            if let Some(ls) = loop_slot {
                self.slots[ls] = loop_meta(index, total, has_condition, parent.clone());
            }
            self.render_body(body, out);
        }

        if let Some(s) = variable_slot {
            self.slots[s] = previous_variable.unwrap_or(Value::Null);
        }
        if let Some(s) = key_slot {
            self.slots[s] = previous_key.unwrap_or(Value::Null);
        }
        if let Some(s) = loop_slot {
            self.slots[s] = previous_loop.unwrap_or(Value::Null);
        }
    }
}

/// Builds the `loop` meta-map for iteration `index` (0-based) of `total`.
///
/// `revindex`, `revindex0`, `last`, and `length` need the full iterable
/// length to compute and are therefore only available when the loop has no
/// `if` filter condition (astnodes.cpp:920-925: "Some values are only
/// available if we know the total length").
fn loop_meta(index: usize, total: usize, has_condition: bool, parent: Value) -> Value {
    let mut map: AHashMap<&str, Value> = AHashMap::default();
    map.insert("index", Value::Int(index as i64 + 1));
    map.insert("index0", Value::Int(index as i64));
    map.insert("first", Value::Bool(index == 0));
    map.insert("parent", parent);
    if !has_condition {
        map.insert("revindex", Value::Int((total - index) as i64));
        map.insert("revindex0", Value::Int((total - index - 1) as i64));
        map.insert("last", Value::Bool(index + 1 == total));
        map.insert("length", Value::Int(total as i64));
    }
    let mut ordered = IndexMap::new();
    let keys: &[&str] = if has_condition {
        &["index", "index0", "first", "parent"]
    } else {
        &["index", "index0", "revindex", "revindex0", "first", "last", "length", "parent"]
    };
    for key in keys {
        ordered.insert(key.to_string(), map.remove(key).unwrap());
    }
    Value::Map(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_template;
    use crate::loader::MemoryLoader;
    use crate::program::Program;

    fn compile(source: &str) -> Program {
        let loader = MemoryLoader::new();
        loader.add("t", source);
        let mut program = Program::default();
        crate::builtins::register(&mut program.functions);
        compile_template("t", &mut program, &loader).unwrap();
        program
    }

    #[test]
    fn arithmetic_constant_fold_renders_directly() {
        let program = compile("{{ 1 + 2 * 3 }}");
        let outcome = render(&program, &IndexMap::new()).unwrap();
        assert_eq!(outcome.output, "7");
    }

    #[test]
    fn missing_variable_is_rejected_before_render() {
        let program = compile("Hello {{ name }}!");
        let err = render(&program, &IndexMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrKind::VariableNotSet);
    }

    #[test]
    fn present_variable_renders() {
        let program = compile("Hello {{ name }}!");
        let mut vars = IndexMap::new();
        vars.insert("name".to_string(), Value::Str("World".to_string()));
        let outcome = render(&program, &vars).unwrap();
        assert_eq!(outcome.output, "Hello World!");
    }

    #[test]
    fn for_loop_restores_loop_variable_afterward() {
        let program = compile("{% for i in [1,2,3] %}{{ loop.index }}:{{ i }};{% endfor %}");
        let outcome = render(&program, &IndexMap::new()).unwrap();
        assert_eq!(outcome.output, "1:1;2:2;3:3;");
    }

    #[test]
    fn nested_for_loop_exposes_outer_loop_as_parent() {
        let program = compile(
            "{% for i in [1,2] %}{% for j in [10,20] %}{{ loop.parent.loop.index }}.{{ loop.index }};{% endfor %}{% endfor %}",
        );
        let outcome = render(&program, &IndexMap::new()).unwrap();
        assert_eq!(outcome.output, "1.1;1.2;2.1;2.2;");
    }

    #[test]
    fn filtered_for_loop_omits_length_dependent_meta() {
        let program = compile(
            "{% for i in [1,2,3,4] if i > 2 %}{{ loop.index }}:{{ i }}:{{ loop.last is defined }};{% endfor %}",
        );
        let outcome = render(&program, &IndexMap::new()).unwrap();
        assert_eq!(outcome.output, "1:3:false;2:4:false;");
    }

    #[test]
    fn autoescape_is_idempotent_with_explicit_escape() {
        let program = compile(r#"{% autoescape "html" %}{{ s|escape }}{% endautoescape %}"#);
        let mut vars = IndexMap::new();
        vars.insert("s".to_string(), Value::Str("<a>".to_string()));
        let outcome = render(&program, &vars).unwrap();
        assert_eq!(outcome.output, "&lt;a&gt;");
    }
}
