//! Signature and identifier parsing shared by the per-source normalizers.
//!
//! Extractors hand us declarations in whatever syntax the project uses
//! (Python `def`, Rust `fn`, TypeScript `function`, bare `name(args)`),
//! so parsing is tolerant and keyword-agnostic.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use skillsmith_shared::raw::field_str;
use skillsmith_shared::{Param, RawRecord, Signature};

/// A usable cross-source identifier: no whitespace, path segments joined by
/// `.`, `::`, `#` or `/`. Hyphens are allowed inside segments (config keys,
/// kebab-case doc anchors).
static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$@][\w$@-]*(?:(?:\.|::|#|/)[A-Za-z_$@][\w$@-]*)*$")
        .expect("identifier regex")
});

/// Definition keywords that mark a line as a declaration rather than a call.
const DEFINITION_KEYWORDS: &[&str] = &["def", "fn", "function", "func", "fun", "sub", "method"];

/// Receivers that never appear in documented call signatures.
const RECEIVERS: &[&str] = &["self", "&self", "&mut self", "mut self", "cls", "this"];

pub fn is_identifier(candidate: &str) -> bool {
    IDENT_RE.is_match(candidate)
}

/// Reduce heading-ish text (`` ## `rotate()` `` or `Rotate:`) to a bare
/// identifier candidate. Returns `None` for narrative text.
pub fn clean_heading(text: &str) -> Option<String> {
    let mut s = text.trim().trim_start_matches('#').trim();
    s = s.trim_matches('`').trim();
    if let Some(open) = s.find('(') {
        s = s[..open].trim_end();
    }
    let s = s.trim_end_matches(':').trim().trim_matches('`');
    is_identifier(s).then(|| s.to_string())
}

/// Drop a surrounding Markdown code fence.
pub fn strip_fence(code: &str) -> &str {
    let mut body = code.trim();
    if body.starts_with("```") || body.starts_with("~~~") {
        body = body.split_once('\n').map_or("", |(_, rest)| rest);
    }
    let trimmed = body.trim_end();
    if let Some(without) = trimmed
        .strip_suffix("```")
        .or_else(|| trimmed.strip_suffix("~~~"))
    {
        return without.trim_end();
    }
    trimmed
}

/// Find the first declaration in a block of code and parse it.
///
/// Lines introduced by a definition keyword win over bare `name(args)`
/// lines, which are usually usage examples.
pub fn parse_declaration(code: &str) -> Option<(String, Signature)> {
    let code = strip_fence(code);
    let mut bare = None;

    for line in code.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") || line.starts_with('@')
        {
            continue;
        }
        let Some((head, name, signature)) = parse_line(line) else {
            continue;
        };
        let tokens: Vec<&str> = head.split_whitespace().collect();
        if tokens.iter().any(|t| DEFINITION_KEYWORDS.contains(t)) {
            return Some((name, signature));
        }
        // A bare call only counts when nothing but the callee precedes it.
        if bare.is_none() && tokens.len() == 1 && !head.contains('=') {
            bare = Some((name, signature));
        }
    }
    bare
}

/// Parse free-standing signature text: `(a: int) -> T` or a declaration.
pub fn parse_signature(text: &str) -> Option<Signature> {
    let text = strip_fence(text).trim();
    if text.starts_with('(') {
        let close = matching_paren(text, 0)?;
        let params = parse_params(&text[1..close]);
        return Some(Signature::new(params, parse_returns(&text[close + 1..])));
    }
    parse_declaration(text).map(|(_, signature)| signature)
}

/// Split one line into (text before the name, name, signature).
fn parse_line(line: &str) -> Option<(&str, String, Signature)> {
    let open = line.find('(')?;
    let close = matching_paren(line, open)?;
    let head = line[..open].trim_end();
    let name = head.split_whitespace().last()?;
    let name = name.trim_start_matches(['*', '&']);
    if !is_identifier(name) {
        return None;
    }

    let params = parse_params(&line[open + 1..close]);
    let returns = parse_returns(&line[close + 1..]);
    Some((head, name.to_string(), Signature::new(params, returns)))
}

fn matching_paren(line: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in line[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Return annotation after the closing paren: `-> T:` or TS-style `: T {`.
fn parse_returns(rest: &str) -> Option<String> {
    let rest = rest.trim();
    let annotation = if let Some(r) = rest.strip_prefix("->") {
        r
    } else if let Some(r) = rest.strip_prefix(':') {
        r
    } else {
        return None;
    };
    let end = annotation
        .find(['{', ';'])
        .or_else(|| annotation.find("=>"))
        .unwrap_or(annotation.len());
    let ty = annotation[..end].trim().trim_end_matches(':').trim();
    (!ty.is_empty()).then(|| ty.to_string())
}

/// Split a parameter list on top-level commas.
pub fn parse_params(list: &str) -> Vec<Param> {
    let list = list.trim();
    let list = list
        .strip_prefix('(')
        .and_then(|l| l.strip_suffix(')'))
        .unwrap_or(list);

    split_top_level(list, ',')
        .into_iter()
        .filter_map(parse_param)
        .collect()
}

/// Parse a single parameter: `name: T = d`, `name=d`, `name?: T`, `T name`.
pub fn parse_param(raw: &str) -> Option<Param> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "*" || raw == "/" || RECEIVERS.contains(&raw) {
        return None;
    }

    let (decl, default) = match split_top_level(raw, '=').as_slice() {
        [decl, default, ..] => ((*decl).trim(), Some(default.trim().to_string())),
        _ => (raw, None),
    };

    let (name, type_hint, ts_optional) = match split_top_level(decl, ':').as_slice() {
        [name, ty, ..] => {
            let name = name.trim();
            let (name, optional) = match name.strip_suffix('?') {
                Some(n) => (n, true),
                None => (name, false),
            };
            (name.to_string(), Some(ty.trim().to_string()), optional)
        }
        _ => {
            // C-family `Type name` or just `name`.
            let mut tokens: Vec<&str> = decl.split_whitespace().collect();
            let name = tokens.pop()?.to_string();
            let ty = (!tokens.is_empty()).then(|| tokens.join(" "));
            (name, ty, false)
        }
    };

    let name = name
        .trim_start_matches("mut ")
        .trim_start_matches("...")
        .trim_start_matches('*')
        .trim()
        .to_string();
    if name.is_empty() || RECEIVERS.contains(&name.as_str()) {
        return None;
    }

    let optional = default.is_some() || ts_optional;
    Some(Param {
        name,
        type_hint: type_hint.filter(|t| !t.is_empty()),
        default,
        optional,
    })
}

/// Parameter as delivered by a repository extractor: either a declaration
/// string or an object with loosely named fields.
pub fn param_from_value(value: &Value) -> Option<Param> {
    match value {
        Value::String(s) => parse_param(s),
        Value::Object(obj) => param_from_record(obj),
        _ => None,
    }
}

fn param_from_record(record: &RawRecord) -> Option<Param> {
    let name = field_str(record, &["name", "param", "arg"])?;
    let name = name.trim_start_matches('*').to_string();
    if RECEIVERS.contains(&name.as_str()) {
        return None;
    }
    let default = field_str(record, &["default", "default_value"]);
    let explicit_optional = record
        .get("optional")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some(Param {
        name,
        type_hint: field_str(record, &["type", "type_hint", "annotation"]),
        optional: default.is_some() || explicit_optional,
        default,
    })
}

fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '`') => quote = Some(c),
            (None, '(' | '[' | '{' | '<') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            // `->` inside a type is not a closing angle bracket.
            (None, '>') if !input[..i].ends_with('-') => depth -= 1,
            // `::` path separators and `==`/`=>` are not parameter separators.
            (None, c) if c == sep && depth <= 0 => {
                let doubled = chars.peek().is_some_and(|(_, n)| *n == sep || *n == '>');
                let after_double = sep != ',' && input[..i].ends_with(sep);
                if doubled {
                    chars.next();
                } else if !after_double {
                    parts.push(&input[start..i]);
                    start = i + c.len_utf8();
                }
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_shapes() {
        assert!(is_identifier("rotate"));
        assert!(is_identifier("pkg.Node2D.rotate"));
        assert!(is_identifier("std::fs::read"));
        assert!(is_identifier("move-local-x"));
        assert!(!is_identifier("Getting Started"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1password"));
    }

    #[test]
    fn clean_heading_strips_markup() {
        assert_eq!(clean_heading("## `rotate(angle)`").as_deref(), Some("rotate"));
        assert_eq!(clean_heading("Node2D.rotate:").as_deref(), Some("Node2D.rotate"));
        assert_eq!(clean_heading("Getting started"), None);
    }

    #[test]
    fn python_declaration() {
        let (name, sig) =
            parse_declaration("```python\ndef rotate(self, angle: float, snap: bool = False) -> None:\n    ...\n```")
                .expect("declaration");
        assert_eq!(name, "rotate");
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0].name, "angle");
        assert_eq!(sig.params[0].type_hint.as_deref(), Some("float"));
        assert!(sig.params[1].optional);
        assert_eq!(sig.params[1].default.as_deref(), Some("False"));
        assert_eq!(sig.returns.as_deref(), Some("None"));
    }

    #[test]
    fn rust_declaration_with_generics() {
        let (name, sig) =
            parse_declaration("pub fn insert(&mut self, key: HashMap<String, u32>, flag: bool) -> Option<u32> {")
                .expect("declaration");
        assert_eq!(name, "insert");
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0].type_hint.as_deref(), Some("HashMap<String, u32>"));
        assert_eq!(sig.returns.as_deref(), Some("Option<u32>"));
    }

    #[test]
    fn typescript_optional_and_return() {
        let (name, sig) =
            parse_declaration("function fetchUser(id: string, opts?: Options): Promise<User> {")
                .expect("declaration");
        assert_eq!(name, "fetchUser");
        assert!(sig.params[1].optional);
        assert_eq!(sig.params[1].name, "opts");
        assert_eq!(sig.returns.as_deref(), Some("Promise<User>"));
    }

    #[test]
    fn definition_beats_usage_example() {
        let code = "rotate(PI)\ndef rotate(angle: float):";
        let (_, sig) = parse_declaration(code).expect("declaration");
        assert_eq!(sig.params[0].type_hint.as_deref(), Some("float"));
    }

    #[test]
    fn assignment_call_is_not_a_declaration() {
        assert!(parse_declaration("x = node.rotate(PI)").is_none());
    }

    #[test]
    fn free_standing_signature_text() {
        let sig = parse_signature("(angle: float, snap: bool = false) -> None").expect("signature");
        assert_eq!(sig.to_string(), "(angle: float, snap: bool = false) -> None");
        assert!(parse_signature("def rotate(angle)").is_some());
        assert!(parse_signature("no parens here").is_none());
    }

    #[test]
    fn c_style_params() {
        let params = parse_params("(int count, const char* name)");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "count");
        assert_eq!(params[0].type_hint.as_deref(), Some("int"));
    }

    #[test]
    fn param_objects_from_extractor() {
        let value = serde_json::json!({"name": "snap", "annotation": "bool", "default": "false"});
        let p = param_from_value(&value).expect("param");
        assert_eq!(p.type_hint.as_deref(), Some("bool"));
        assert!(p.optional);
        assert!(param_from_value(&serde_json::json!({"name": "self"})).is_none());
    }
}
