//! Per-mode escape transforms (spec §4.4's autoescape modes), applied once
//! against a template's fully-rendered body string. Grounded verbatim on
//! `builtins.cpp`'s `escape()`, including its distinctive `HtmlAttr`
//! hex-entity-style percent-substitution.

use crate::program::EscapeMode;

/// Escapes `data` for `mode`. `Verbatim` returns an empty string, matching
/// the reference implementation's own `escape()` — callers never invoke
/// this with `Verbatim` in practice since the compiler rejects it as an
/// autoescape mode, but the filter form (`|escape('none')`) can still reach
/// it at render time.
pub fn escape(data: &str, mode: EscapeMode) -> String {
    match mode {
        EscapeMode::Verbatim => String::new(),
        EscapeMode::Html => html_escape(data),
        EscapeMode::JavaScript | EscapeMode::Css => js_escape(data),
        EscapeMode::Url => url_encode(data),
        EscapeMode::HtmlAttr => html_attr_escape(data),
    }
}

fn html_escape(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    for c in data.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn js_escape(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    for c in data.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// RFC 3986 percent-encoding, leaving the unreserved set (`A-Za-z0-9-._~`)
/// untouched, matching `QUrl::toPercentEncoding`'s default unreserved set.
fn url_encode(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    for byte in data.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(*byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Percent-encodes everything except `-._~`, then rewrites the `%` marker
/// itself into `&#x`, producing an HTML hex-entity-flavored attribute
/// escape — the exact two-step transform `builtins.cpp` performs.
fn html_attr_escape(data: &str) -> String {
    let included: &[u8] = b"-._~";
    let mut percent_encoded = String::with_capacity(data.len());
    for byte in data.as_bytes() {
        if byte.is_ascii_alphanumeric() || included.contains(byte) {
            percent_encoded.push(*byte as char);
        } else {
            percent_encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    percent_encoded.replace('%', "&#x")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escapes_reserved_chars() {
        assert_eq!(escape("<a href=\"x\">'&'</a>", EscapeMode::Html), "&lt;a href=&quot;x&quot;&gt;'&amp;'&lt;/a&gt;");
    }

    #[test]
    fn js_escapes_quotes_and_control_chars() {
        assert_eq!(escape("a\"b'c\nd", EscapeMode::JavaScript), "a\\\"b\\'c\\nd");
    }

    #[test]
    fn url_leaves_unreserved_untouched() {
        assert_eq!(escape("a b_c-d.e~f", EscapeMode::Url), "a%20b_c-d.e~f");
    }

    #[test]
    fn html_attr_uses_hex_entity_marker() {
        assert_eq!(escape(" ", EscapeMode::HtmlAttr), "&#x20");
    }
}
