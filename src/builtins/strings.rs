//! String builtins. Grounded on `builtins.cpp`'s `filterCapitalize`/
//! `filterTitle`/`filterTrim`/`filterSplit`/`filterReplace`/`filterStriptags`/
//! `filterNl2br`/`filterUrlEncode` (original_source).

use crate::escape::escape;
use crate::program::EscapeMode;
use crate::value::Value;

fn arg_str(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::to_display_string).unwrap_or_default()
}

pub fn capitalize(args: &[Value]) -> Value {
    let s = arg_str(args, 0);
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => Value::Str(first.to_uppercase().collect::<String>() + chars.as_str()),
        None => Value::Str(s),
    }
}

pub fn title(args: &[Value]) -> Value {
    let s = arg_str(args, 0);
    let result = s
        .split_inclusive(char::is_whitespace)
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<String>();
    Value::Str(result)
}

pub fn lower(args: &[Value]) -> Value {
    Value::Str(arg_str(args, 0).to_lowercase())
}

pub fn upper(args: &[Value]) -> Value {
    Value::Str(arg_str(args, 0).to_uppercase())
}

pub fn trim(args: &[Value]) -> Value {
    match args.get(1) {
        Some(chars) => {
            let chars = chars.to_display_string();
            let pattern: &[char] = &chars.chars().collect::<Vec<_>>();
            Value::Str(arg_str(args, 0).trim_matches(pattern).to_string())
        }
        None => Value::Str(arg_str(args, 0).trim().to_string()),
    }
}

/// `split(string, delimiter, limit = -1)`. An empty delimiter with a
/// positive limit splits into fixed-size chunks, matching Twig's split.
pub fn split(args: &[Value]) -> Value {
    let s = arg_str(args, 0);
    let delimiter = arg_str(args, 1);
    let limit = args.get(2).and_then(Value::as_f64).map(|n| n as i64).unwrap_or(-1);

    if delimiter.is_empty() {
        let chunk_size = if limit > 0 { limit as usize } else { 1 };
        let chars: Vec<char> = s.chars().collect();
        return Value::List(
            chars
                .chunks(chunk_size.max(1))
                .map(|chunk| Value::Str(chunk.iter().collect()))
                .collect(),
        );
    }

    let parts: Vec<&str> = if limit > 0 {
        s.splitn(limit as usize, delimiter.as_str()).collect()
    } else {
        s.split(delimiter.as_str()).collect()
    };
    Value::List(parts.into_iter().map(|p| Value::Str(p.to_string())).collect())
}

/// `replace(string, {search: replacement, ...})`.
pub fn replace(args: &[Value]) -> Value {
    let mut s = arg_str(args, 0);
    if let Some(Value::Map(map)) = args.get(1) {
        for (search, replacement) in map {
            s = s.replace(search.as_str(), &replacement.to_display_string());
        }
    }
    Value::Str(s)
}

/// `striptags(string)` — removes `<...>` tag markup, leaving plain text.
pub fn striptags(args: &[Value]) -> Value {
    let s = arg_str(args, 0);
    let mut out = String::with_capacity(s.len());
    let mut depth = 0u32;
    for c in s.chars() {
        match c {
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    Value::Str(out)
}

pub fn nl2br(args: &[Value]) -> Value {
    Value::Str(arg_str(args, 0).replace('\n', "<br />"))
}

pub fn url_encode(args: &[Value]) -> Value {
    Value::Str(escape(&arg_str(args, 0), EscapeMode::Url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_capitalizes_each_word() {
        assert!(matches!(title(&[Value::Str("hello world".into())]), Value::Str(ref s) if s == "Hello World"));
    }

    #[test]
    fn split_with_empty_delimiter_chunks() {
        let result = split(&[Value::Str("abcdef".into()), Value::Str(String::new()), Value::Int(2)]);
        let Value::List(items) = result else { panic!() };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn striptags_removes_markup() {
        assert!(matches!(striptags(&[Value::Str("<b>hi</b>".into())]), Value::Str(ref s) if s == "hi"));
    }
}
