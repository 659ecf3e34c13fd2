//! The built-in filter/function table (spec §6). Grounded on
//! `builtins.cpp`'s `Builtins::call` dispatch table and its constant/
//! non-constant split in `isConstantBuiltin`.
//!
//! `escape`/`e`, `date`, `number_format`, `parent`, and `block` are
//! deliberately NOT registered here: each needs access to render-time
//! `Program` state (the active autoescape mode, locale separators, the
//! block map) that the flat `Fn(&[Value]) -> Value` callback shape can't
//! carry, so the renderer special-cases all five by name before falling
//! back to this table, the same way the reference implementation's
//! `Builtins::call` takes a `TemplateProgramPrivate*` for exactly those.

mod collections;
mod misc;
mod numeric;
mod strings;

use std::rc::Rc;

use crate::program::{Function, FunctionMap};

/// Registers every context-free built-in into `functions`. Called once by
/// the engine façade before compiling any template, so the compiler's
/// constant folder can see `is_constant` built-ins immediately.
pub fn register(functions: &mut FunctionMap) {
    let constant: &[(&str, fn(&[crate::value::Value]) -> crate::value::Value)] = &[
        ("abs", numeric::abs),
        ("batch", collections::batch),
        ("capitalize", strings::capitalize),
        ("cycle", collections::cycle),
        ("default", collections::default),
        ("first", collections::first),
        ("join", collections::join),
        ("json_encode", misc::json_encode),
        ("keys", collections::keys),
        ("last", collections::last),
        ("length", collections::length),
        ("lower", strings::lower),
        ("merge", collections::merge),
        ("nl2br", strings::nl2br),
        ("max", numeric::max),
        ("min", numeric::min),
        ("upper", strings::upper),
        ("range", numeric::range),
        ("replace", strings::replace),
        ("reverse", collections::reverse),
        ("round", numeric::round),
        ("slice", collections::slice),
        ("sort", collections::sort),
        ("split", strings::split),
        ("striptags", strings::striptags),
        ("title", strings::title),
        ("trim", strings::trim),
        ("url_encode", strings::url_encode),
    ];

    for (name, f) in constant {
        functions.insert(name.to_string(), Function { callback: Rc::new(*f), is_constant: true });
    }

    let non_constant: &[(&str, fn(&[crate::value::Value]) -> crate::value::Value)] =
        &[("dump", misc::dump), ("random", misc::random), ("raw", misc::raw), ("format", misc::format)];

    for (name, f) in non_constant {
        functions.insert(name.to_string(), Function { callback: Rc::new(*f), is_constant: false });
    }
}

/// Names handled by the renderer's own dispatch rather than through
/// [`FunctionMap`] — exposed so the renderer can check membership before
/// falling back to `Program.functions`.
pub const RENDER_DISPATCHED: &[&str] = &["escape", "e", "date", "number_format", "parent", "block"];
