//! The bottom-up compile pass (spec §4.4): constant folding, variable slot
//! allocation, include/extends/embed linking, block first-seen-master-wins
//! resolution with `parent()` snapshotting, whitespace trim, spaceless/
//! autoescape scoping, and regex precompilation. Grounded on `compiler.cpp`'s
//! single-pass `compileInternal`.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use regex::Regex;

use crate::ast::{Ast, Kind, NodeId, NodeIdAllocator, SharedBody};
use crate::error::{Kind as ErrKind, CompileError};
use crate::loader::Loader;
use crate::location::Location;
use crate::ops;
use crate::parser;
use crate::program::{CompileInfo, EscapeMode, Program, TrimFlags};
use crate::tokenizer;
use crate::value::Value;

/// Compiles `name` via `loader` into `program`, replacing any previously
/// compiled root. The caller (the engine façade) is responsible for
/// registering built-in/user functions on `program.functions` beforehand so
/// constant folding can see them.
pub fn compile_template(name: &str, program: &mut Program, loader: &dyn Loader) -> Result<(), CompileError> {
    let mut ids = NodeIdAllocator::default();
    let mut compiler = Compiler {
        program,
        ids: &mut ids,
        loader,
        const_values: AHashMap::default(),
        info: CompileInfo::default(),
    };
    let root = compiler.compile_named_subtree(name)?;
    compiler.program.root = Some(root);
    Ok(())
}

struct Compiler<'a> {
    program: &'a mut Program,
    ids: &'a mut NodeIdAllocator,
    loader: &'a dyn Loader,
    const_values: AHashMap<usize, Value>,
    info: CompileInfo,
}

impl<'a> Compiler<'a> {
    fn err(&self, kind: ErrKind, loc: Location, message: impl Into<String>) -> CompileError {
        CompileError { kind, message: message.into(), location: loc }
    }

    /// Loads, tokenizes, parses, and compiles `name`'s source into `self`'s
    /// Program, sharing the variable table, function table, and block map.
    fn compile_named_subtree(&mut self, name: &str) -> Result<Ast, CompileError> {
        self.program.dependencies.push(name.to_string());
        let source = self
            .loader
            .load(name)
            .map_err(|e| self.err(ErrKind::TemplateNotFound, Location::default(), e.message))?;
        let tokens = tokenizer::tokenize(&source)
            .map_err(|e| self.err(ErrKind::SyntaxError, e.location, e.message))?;
        let (ast, _ids, trim) =
            parser::parse(tokens).map_err(|e| self.err(e.kind, e.location, e.message))?;
        let previous_trim = std::mem::replace(&mut self.info.trim, trim);
        let compiled = self.compile_node(ast);
        self.info.trim = previous_trim;
        compiled
    }

    fn slot_and_read(&mut self, loc: Location, name: &str) -> (usize, bool) {
        let slot = self.program.slot_for(name);
        let is_const = self.const_values.contains_key(&slot);
        self.program.record_usage(slot, loc, false, is_const);
        (slot, is_const)
    }

    fn compile_node(&mut self, node: Ast) -> Result<Ast, CompileError> {
        let Ast { id, loc, kind } = node;
        match kind {
            Kind::Noop | Kind::Literal(_) | Kind::FilterBodyPlaceholder => Ok(Ast::new(id, loc, kind)),

            // `SpacelessNode::compile` in the original applies the tag-gap
            // collapse to each `TextNode` while `dptr->spaceless` is set,
            // rather than the renderer re-walking the whole body per request.
            Kind::Text(text) => {
                let text = if self.program.spaceless { collapse_spaceless(&text) } else { text };
                Ok(Ast::new(id, loc, Kind::Text(text)))
            }

            Kind::Variable { name, .. } => {
                let (slot, is_const) = self.slot_and_read(loc, &name);
                if is_const {
                    let value = self.const_values[&slot].clone();
                    return Ok(Ast::new(id, loc, Kind::Literal(value)));
                }
                Ok(Ast::new(id, loc, Kind::Variable { name, slot: Some(slot), write: false }))
            }

            Kind::ChainedVariable { base, chain } => {
                let base = Box::new(self.compile_node(*base)?);
                let chain = chain.into_iter().map(|c| self.compile_node(c)).collect::<Result<Vec<_>, _>>()?;
                Ok(Ast::new(id, loc, Kind::ChainedVariable { base, chain }))
            }

            Kind::MultipleValue(items) => {
                let items = items.into_iter().map(|i| self.compile_node(i)).collect::<Result<Vec<_>, _>>()?;
                if items.iter().all(|i| i.as_literal().is_some()) {
                    let values = items.iter().map(|i| i.as_literal().unwrap().clone()).collect();
                    return Ok(Ast::new(id, loc, Kind::Literal(Value::List(values))));
                }
                Ok(Ast::new(id, loc, Kind::MultipleValue(items)))
            }

            Kind::ValueMap(pairs) => {
                let pairs = pairs
                    .into_iter()
                    .map(|(k, v)| Ok((self.compile_node(k)?, self.compile_node(v)?)))
                    .collect::<Result<Vec<_>, CompileError>>()?;
                if pairs.iter().all(|(k, v)| k.as_literal().is_some() && v.as_literal().is_some()) {
                    let mut map = IndexMap::new();
                    for (k, v) in &pairs {
                        map.insert(k.as_literal().unwrap().to_display_string(), v.as_literal().unwrap().clone());
                    }
                    return Ok(Ast::new(id, loc, Kind::Literal(Value::Map(map))));
                }
                Ok(Ast::new(id, loc, Kind::ValueMap(pairs)))
            }

            Kind::StringLit { template, inserts } => {
                let inserts = inserts
                    .into_iter()
                    .map(|(off, len, node)| Ok((off, len, self.compile_node(node)?)))
                    .collect::<Result<Vec<_>, CompileError>>()?;
                if inserts.iter().all(|(_, _, n)| n.as_literal().is_some()) {
                    let resolved: Vec<(usize, usize, String)> = inserts
                        .iter()
                        .map(|(off, len, n)| (*off, *len, n.as_literal().unwrap().to_display_string()))
                        .collect();
                    return Ok(Ast::new(id, loc, Kind::Literal(Value::Str(splice(&template, &resolved)))));
                }
                Ok(Ast::new(id, loc, Kind::StringLit { template, inserts }))
            }

            Kind::Expression { op, left, right } => {
                let left = Box::new(self.compile_node(*left)?);
                let right = right.map(|r| self.compile_node(*r)).transpose()?.map(Box::new);

                if let Some(lv) = left.as_literal() {
                    match &right {
                        Some(r) => {
                            if let Some(rv) = r.as_literal() {
                                return Ok(Ast::new(id, loc, Kind::Literal(ops::apply_binary(op, lv, rv))));
                            }
                        }
                        None => return Ok(Ast::new(id, loc, Kind::Literal(ops::apply_unary(op, lv)))),
                    }
                }
                Ok(Ast::new(id, loc, Kind::Expression { op, left, right }))
            }

            Kind::MatchesTest { value, test, compiled_regex: _ } => {
                let value = Box::new(self.compile_node(*value)?);
                let test = test.map(|t| self.compile_node(*t)).transpose()?.map(Box::new);
                let compiled_regex = match &test {
                    Some(t) => match t.as_literal() {
                        Some(Value::Str(pattern)) => Some(Rc::new(Regex::new(pattern).map_err(|e| {
                            self.err(ErrKind::InvalidRegularExpression, loc, format!("invalid regex '{pattern}': {e}"))
                        })?)),
                        _ => None,
                    },
                    None => None,
                };
                Ok(Ast::new(id, loc, Kind::MatchesTest { value, test, compiled_regex }))
            }

            Kind::Ternary { condition, on_success, on_failure } => {
                let condition = self.compile_node(*condition)?;
                if let Some(cond_value) = condition.as_literal().cloned() {
                    return if cond_value.is_truthy() {
                        match on_success {
                            Some(n) => self.compile_node(*n),
                            None => Ok(condition),
                        }
                    } else {
                        match on_failure {
                            Some(n) => self.compile_node(*n),
                            None => Ok(Ast::new(id, loc, Kind::Noop)),
                        }
                    };
                }
                self.info.condition_branch_depth += 1;
                let on_success = on_success.map(|n| self.compile_node(*n)).transpose()?.map(Box::new);
                let on_failure = on_failure.map(|n| self.compile_node(*n)).transpose()?.map(Box::new);
                self.info.condition_branch_depth -= 1;
                Ok(Ast::new(id, loc, Kind::Ternary { condition: Box::new(condition), on_success, on_failure }))
            }

            Kind::MethodCall { name, arguments } => self.compile_method_call(id, loc, name, arguments),

            Kind::Multiple(items) => self.compile_multiple(id, loc, items),

            Kind::IfClause { condition, on_true, on_false } => {
                let condition = self.compile_node(*condition)?;
                if let Some(cond_value) = condition.as_literal() {
                    return if cond_value.is_truthy() {
                        self.compile_node(*on_true)
                    } else {
                        match on_false {
                            Some(n) => self.compile_node(*n),
                            None => Ok(Ast::new(id, loc, Kind::Noop)),
                        }
                    };
                }
                self.info.condition_branch_depth += 1;
                let on_true = Box::new(self.compile_node(*on_true)?);
                let on_false = on_false.map(|n| self.compile_node(*n)).transpose()?.map(Box::new);
                self.info.condition_branch_depth -= 1;
                Ok(Ast::new(id, loc, Kind::IfClause { condition: Box::new(condition), on_true, on_false }))
            }

            Kind::ForLoop { variable, key, iterable, body, or_else, condition, .. } => {
                let iterable = Box::new(self.compile_node(*iterable)?);
                let variable_slot = Some(self.program.slot_for(&variable));
                self.program.prepend_write_usage(variable_slot.unwrap(), loc);
                let key_slot = key.as_ref().map(|k| {
                    let slot = self.program.slot_for(k);
                    self.program.prepend_write_usage(slot, loc);
                    slot
                });
                let loop_slot = if contains_variable(&body, "loop") || or_else.as_ref().is_some_and(|b| contains_variable(b, "loop")) {
                    let slot = self.program.slot_for("loop");
                    self.program.prepend_write_usage(slot, loc);
                    Some(slot)
                } else {
                    None
                };

                let body = Box::new(self.compile_node(*body)?);
                let or_else = or_else.map(|n| self.compile_node(*n)).transpose()?.map(Box::new);
                let condition = condition.map(|c| self.compile_node(*c)).transpose()?.map(Box::new);

                Ok(Ast::new(
                    id,
                    loc,
                    Kind::ForLoop { variable, key, variable_slot, key_slot, iterable, body, or_else, condition, loop_slot },
                ))
            }

            Kind::Set { name, value, .. } => {
                let value = Box::new(self.compile_node(*value)?);
                let slot = self.program.slot_for(&name);
                let literal = value.as_literal().cloned();
                let is_constant = literal.is_some() && self.info.condition_branch_depth == 0;
                self.program.record_usage(slot, loc, true, is_constant);
                if is_constant {
                    self.const_values.insert(slot, literal.unwrap());
                } else {
                    self.const_values.remove(&slot);
                }
                Ok(Ast::new(id, loc, Kind::Set { name, slot: Some(slot), value }))
            }

            Kind::Block { name, body } => self.compile_block(id, loc, name, body),

            Kind::Include { name_expr, .. } => {
                let target = self.resolve_target(loc, name_expr)?;
                self.compile_named_subtree(&target)
            }

            Kind::Embed { name_expr, overrides, .. } => {
                let target = self.resolve_target(loc, name_expr)?;
                let saved_blocks = std::mem::take(&mut self.program.blocks);
                let sub_tree = self.compile_named_subtree(&target);
                let sub_tree = match sub_tree {
                    Ok(t) => t,
                    Err(e) => {
                        self.program.blocks = saved_blocks;
                        return Err(e);
                    }
                };
                let overrides_result = self.compile_node(*overrides);
                self.program.blocks = saved_blocks;
                overrides_result?;
                Ok(sub_tree)
            }

            Kind::Filter { chain, body } => {
                let body = Box::new(self.compile_node(*body)?);
                let chain = Box::new(self.compile_node(*chain)?);
                Ok(Ast::new(id, loc, Kind::Filter { chain, body }))
            }

            Kind::Autoescape { mode_name, body, .. } => {
                let resolved = match mode_name.as_deref() {
                    Some(n) => EscapeMode::parse(n).ok_or_else(|| {
                        self.err(ErrKind::InvalidEscapeMode, loc, format!("unknown escape mode '{n}'"))
                    })?,
                    None => EscapeMode::Html,
                };
                if resolved == EscapeMode::Verbatim {
                    return Err(self.err(ErrKind::InvalidEscapeMode, loc, "autoescape mode cannot be verbatim"));
                }
                let body = Box::new(self.compile_node(*body)?);
                Ok(Ast::new(id, loc, Kind::Autoescape { mode_name: None, mode: resolved, body }))
            }

            Kind::Spaceless { body } => {
                let previous = self.program.spaceless;
                self.program.spaceless = true;
                let body = self.compile_node(*body);
                self.program.spaceless = previous;
                Ok(Ast::new(id, loc, Kind::Spaceless { body: Box::new(body?) }))
            }
        }
    }

    fn resolve_target(&mut self, loc: Location, name_expr: Option<Box<Ast>>) -> Result<String, CompileError> {
        let expr = name_expr.ok_or_else(|| self.err(ErrKind::EmptyTemplateName, loc, "missing template name"))?;
        let compiled = self.compile_node(*expr)?;
        let candidates = match compiled.as_literal() {
            Some(Value::Str(s)) if !s.is_empty() => vec![s.clone()],
            Some(Value::Str(_)) => return Err(self.err(ErrKind::EmptyTemplateName, loc, "template name is empty")),
            Some(Value::List(items)) => items.iter().filter_map(|v| match v {
                Value::Str(s) => Some(s.clone()),
                _ => None,
            }).collect(),
            _ => return Err(self.err(ErrKind::NonConstantExpression, loc, "template name must be a constant string")),
        };
        candidates
            .into_iter()
            .find(|name| self.loader.exists(name))
            .ok_or_else(|| self.err(ErrKind::TemplateNotFound, loc, "no candidate template exists"))
    }

    fn compile_method_call(&mut self, id: NodeId, loc: Location, name: String, arguments: Vec<Ast>) -> Result<Ast, CompileError> {
        if name == "parent" && arguments.is_empty() {
            return match &self.info.current_parent_block {
                Some(master) => Ok(master.borrow().clone()),
                None => Err(self.err(ErrKind::NoParentBlock, loc, "parent() used outside an overriding block")),
            };
        }

        let arguments = arguments.into_iter().map(|a| self.compile_node(a)).collect::<Result<Vec<_>, _>>()?;

        if let Some(function) = self.program.functions.get(&name) {
            if function.is_constant && arguments.iter().all(|a| a.as_literal().is_some()) {
                let values: Vec<Value> = arguments.iter().map(|a| a.as_literal().unwrap().clone()).collect();
                let result = (function.callback)(&values);
                return Ok(Ast::new(id, loc, Kind::Literal(result)));
            }
        }

        Ok(Ast::new(id, loc, Kind::MethodCall { name, arguments }))
    }

    fn compile_block(&mut self, id: NodeId, loc: Location, name: String, body: SharedBody) -> Result<Ast, CompileError> {
        let inner = Rc::try_unwrap(body)
            .map(RefCell::into_inner)
            .unwrap_or_else(|rc| rc.borrow().clone());

        if let Some(master) = self.program.blocks.get(&name).cloned() {
            let previous_parent = self.info.current_parent_block.replace(master.clone());
            let compiled = self.compile_node(inner);
            self.info.current_parent_block = previous_parent;
            *master.borrow_mut() = compiled?;
            Ok(Ast::new(id, loc, Kind::Noop))
        } else {
            let new_master: SharedBody = Rc::new(RefCell::new(Ast::new(self.ids.alloc(), loc, Kind::Noop)));
            self.program.blocks.insert(name.clone(), new_master.clone());
            let previous_parent = self.info.current_parent_block.take();
            let compiled = self.compile_node(inner);
            self.info.current_parent_block = previous_parent;
            *new_master.borrow_mut() = compiled?;
            Ok(Ast::new(id, loc, Kind::Block { name, body: new_master }))
        }
    }

    /// Compiles each child, applies whitespace trim to the bordering `Text`
    /// children per the node's `TrimFlags`, then merges adjacent
    /// `Text`/`Literal` runs and drops `Noop`s.
    fn compile_multiple(&mut self, id: NodeId, loc: Location, items: Vec<Ast>) -> Result<Ast, CompileError> {
        let mut compiled = items.into_iter().map(|i| self.compile_node(i)).collect::<Result<Vec<_>, _>>()?;

        for idx in 0..compiled.len() {
            let flags = self.info.trim.get(&compiled[idx].id).copied().unwrap_or(TrimFlags::NONE);
            if flags.is_none() {
                continue;
            }
            if flags.contains(TrimFlags::LEFT) && idx > 0 {
                trim_text_trailing(&mut compiled[idx - 1]);
            }
            if flags.contains(TrimFlags::RIGHT) && idx + 1 < compiled.len() {
                trim_text_leading(&mut compiled[idx + 1]);
            }
        }

        let mut merged: Vec<Ast> = Vec::with_capacity(compiled.len());
        for node in compiled {
            if node.is_noop() {
                continue;
            }
            let as_text = match &node.kind {
                Kind::Text(s) => Some(s.clone()),
                Kind::Literal(v) => Some(v.to_display_string()),
                _ => None,
            };
            if let Some(text) = as_text {
                if let Some(Kind::Text(prev)) = merged.last_mut().map(|n| &mut n.kind) {
                    prev.push_str(&text);
                    continue;
                }
                merged.push(Ast::new(node.id, node.loc, Kind::Text(text)));
            } else {
                merged.push(node);
            }
        }

        match merged.len() {
            0 => Ok(Ast::new(id, loc, Kind::Noop)),
            1 => Ok(merged.into_iter().next().unwrap()),
            _ => Ok(Ast::new(id, loc, Kind::Multiple(merged))),
        }
    }
}

/// Collapses whitespace that sits only between a `>` and a `<` (or at the
/// very start before `<`, or the very end after `>`) down to nothing,
/// matching `TextNode::trimSpacesBetweenHtmlTags`'s regex verbatim.
fn collapse_spaceless(text: &str) -> String {
    thread_local! {
        static RE: Regex = Regex::new(r"(^|>)[[:space:]]+(<|$)").unwrap();
    }
    RE.with(|re| re.replace_all(text, "$1$2").into_owned())
}

fn trim_text_trailing(node: &mut Ast) {
    if let Kind::Text(s) = &mut node.kind {
        let trimmed = s.trim_end().to_string();
        *s = trimmed;
    }
}

fn trim_text_leading(node: &mut Ast) {
    if let Kind::Text(s) = &mut node.kind {
        let trimmed = s.trim_start().to_string();
        *s = trimmed;
    }
}

/// Splices interpolation inserts into `template`, applying them in source
/// order with cumulative offset shifting (spec §4.5's string-interpolation
/// re-render rule, used here once at compile time when every insert is
/// itself constant).
pub fn splice(template: &str, inserts: &[(usize, usize, String)]) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut result = String::new();
    let mut cursor = 0usize;
    for (offset, len, value) in inserts {
        if *offset > chars.len() {
            continue;
        }
        result.extend(&chars[cursor..*offset]);
        result.push_str(value);
        cursor = (*offset + *len).min(chars.len());
    }
    result.extend(&chars[cursor..]);
    result
}

/// Recursively checks whether `node` references the variable `name` anywhere
/// in its subtree — used to decide whether a `for` loop needs to allocate
/// and pre-satisfy the `loop` meta-variable's slot.
fn contains_variable(node: &Ast, name: &str) -> bool {
    match &node.kind {
        Kind::Variable { name: n, .. } => n == name,
        Kind::ChainedVariable { base, chain } => contains_variable(base, name) || chain.iter().any(|c| contains_variable(c, name)),
        Kind::MultipleValue(items) | Kind::Multiple(items) => items.iter().any(|i| contains_variable(i, name)),
        Kind::ValueMap(pairs) => pairs.iter().any(|(k, v)| contains_variable(k, name) || contains_variable(v, name)),
        Kind::StringLit { inserts, .. } => inserts.iter().any(|(_, _, n)| contains_variable(n, name)),
        Kind::Expression { left, right, .. } => contains_variable(left, name) || right.as_ref().is_some_and(|r| contains_variable(r, name)),
        Kind::MatchesTest { value, test, .. } => contains_variable(value, name) || test.as_ref().is_some_and(|t| contains_variable(t, name)),
        Kind::Ternary { condition, on_success, on_failure } => {
            contains_variable(condition, name)
                || on_success.as_ref().is_some_and(|n| contains_variable(n, name))
                || on_failure.as_ref().is_some_and(|n| contains_variable(n, name))
        }
        Kind::MethodCall { arguments, .. } => arguments.iter().any(|a| contains_variable(a, name)),
        Kind::IfClause { condition, on_true, on_false } => {
            contains_variable(condition, name)
                || contains_variable(on_true, name)
                || on_false.as_ref().is_some_and(|n| contains_variable(n, name))
        }
        Kind::ForLoop { iterable, body, or_else, condition, .. } => {
            contains_variable(iterable, name)
                || contains_variable(body, name)
                || or_else.as_ref().is_some_and(|n| contains_variable(n, name))
                || condition.as_ref().is_some_and(|c| contains_variable(c, name))
        }
        Kind::Set { value, .. } => contains_variable(value, name),
        Kind::Block { body, .. } => contains_variable(&body.borrow(), name),
        Kind::Include { name_expr, .. } | Kind::Embed { name_expr, .. } => {
            name_expr.as_ref().is_some_and(|n| contains_variable(n, name))
        }
        Kind::Filter { chain, body } => contains_variable(chain, name) || contains_variable(body, name),
        Kind::Autoescape { body, .. } | Kind::Spaceless { body } => contains_variable(body, name),
        Kind::Text(_) | Kind::Noop | Kind::Literal(_) | Kind::FilterBodyPlaceholder => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;

    #[test]
    fn folds_constant_arithmetic() {
        let loader = MemoryLoader::new();
        loader.add("t", "{{ 1 + 2 }}");
        let mut program = Program::default();
        compile_template("t", &mut program, &loader).unwrap();
        assert!(matches!(program.root, Some(Ast { kind: Kind::Text(ref s), .. }) if s == "3"));
    }

    #[test]
    fn if_else_folds_to_chosen_branch() {
        let loader = MemoryLoader::new();
        loader.add("t", "{% if 1 > 2 %}A{% else %}B{% endif %}");
        let mut program = Program::default();
        compile_template("t", &mut program, &loader).unwrap();
        assert!(matches!(program.root, Some(Ast { kind: Kind::Text(ref s), .. }) if s == "B"));
    }

    #[test]
    fn extends_overrides_block() {
        let loader = MemoryLoader::new();
        loader.add("base", "{% block b %}X{% endblock %}");
        loader.add("child", "{% extends \"base\" %}{% block b %}Y{% endblock %}");
        let mut program = Program::default();
        compile_template("child", &mut program, &loader).unwrap();
        let master = program.blocks.get("b").unwrap();
        assert!(matches!(&master.borrow().kind, Kind::Text(s) if s == "Y"));
    }
}
