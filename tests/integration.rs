//! End-to-end coverage of the six testable scenarios from spec §8, driven
//! entirely through the public `Engine`/`MemoryLoader` surface.

use indexmap::IndexMap;
use twigstone::{Engine, ErrorKind, MemoryLoader, Value};

fn engine(templates: &[(&str, &str)]) -> Engine {
    let loader = MemoryLoader::new();
    for (name, source) in templates {
        loader.add(*name, *source);
    }
    Engine::new(Box::new(loader))
}

#[test]
fn constant_arithmetic_is_folded_and_rendered() {
    let e = engine(&[("t", "{{ 1 + 2 * 3 }}")]);
    assert_eq!(e.render("t").unwrap(), "7");
}

#[test]
fn missing_variable_is_reported_and_nothing_renders() {
    let e = engine(&[("t", "Hello {{ name }}!")]);
    let err = e.render("t").unwrap_err();
    assert_eq!(err.kind, ErrorKind::VariableNotSet);
}

#[test]
fn variable_substitution_succeeds_once_supplied() {
    let mut e = engine(&[("t", "Hello {{ name }}!")]);
    e.set_value("name", Value::Str("Ada".to_string()));
    assert_eq!(e.render("t").unwrap(), "Hello Ada!");
}

#[test]
fn if_else_folds_to_the_constant_branch() {
    let e = engine(&[("t", "{% if 1 > 0 %}yes{% else %}no{% endif %}")]);
    assert_eq!(e.render("t").unwrap(), "yes");
}

#[test]
fn extends_applies_child_block_override() {
    let e = engine(&[
        ("base", "<{% block title %}base{% endblock %}>"),
        ("child", "{% extends \"base\" %}{% block title %}child{% endblock %}"),
    ]);
    assert_eq!(e.render("child").unwrap(), "<child>");
}

#[test]
fn child_block_can_reach_parent_content() {
    let e = engine(&[
        ("base", "<{% block title %}base{% endblock %}>"),
        ("child", "{% extends \"base\" %}{% block title %}{{ parent() }}+child{% endblock %}"),
    ]);
    assert_eq!(e.render("child").unwrap(), "<base+child>");
}

#[test]
fn for_loop_exposes_loop_index_and_restores_afterward() {
    let mut e = engine(&[("t", "{% for i in items %}{{ loop.index }}:{{ i }} {% endfor %}done")]);
    let mut items = IndexMap::new();
    items.insert("items".to_string(), Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]));
    e.set_values(items);
    assert_eq!(e.render("t").unwrap(), "1:a 2:b done");
}

#[test]
fn autoescape_does_not_double_escape_an_explicit_escape_call() {
    let mut e = engine(&[("t", r#"{% autoescape "html" %}{{ s|escape }}{% endautoescape %}"#)]);
    e.set_value("s", Value::Str("<b>x</b>".to_string()));
    assert_eq!(e.render("t").unwrap(), "&lt;b&gt;x&lt;/b&gt;");
}

#[test]
fn autoescape_still_escapes_a_plain_expansion() {
    let mut e = engine(&[("t", r#"{% autoescape "html" %}{{ s }}{% endautoescape %}"#)]);
    e.set_value("s", Value::Str("<b>".to_string()));
    assert_eq!(e.render("t").unwrap(), "&lt;b&gt;");
}

#[test]
fn repeated_variable_references_share_one_slot() {
    let mut e = engine(&[("t", "{{ x }}-{{ x }}-{{ x }}")]);
    e.set_value("x", Value::Int(9));
    assert_eq!(e.render("t").unwrap(), "9-9-9");
}

#[test]
fn compiled_program_is_reused_across_renders() {
    let mut e = engine(&[("t", "{{ n }}")]);
    e.set_value("n", Value::Int(1));
    assert_eq!(e.render("t").unwrap(), "1");
    assert!(e.is_template_in_cache("t"));
    e.set_value("n", Value::Int(2));
    assert_eq!(e.render("t").unwrap(), "2");
}

#[test]
fn filter_chain_applies_left_to_right() {
    let mut e = engine(&[("t", "{{ s|upper|trim }}")]);
    e.set_value("s", Value::Str("  hello  ".to_string()));
    assert_eq!(e.render("t").unwrap(), "HELLO");
}

#[test]
fn unknown_template_surfaces_as_template_not_found() {
    let e = engine(&[]);
    let err = e.render("nope").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TemplateNotFound);
}
