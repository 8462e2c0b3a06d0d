//! The `{{ … }}` template dialect.
//!
//! A small expression language applied to strings that still contain `{{`
//! after variable substitution: conditionals, `.path` access into JSON data,
//! and a fixed library of string helpers. Rendering is pure; the same
//! template and data always yield the same output.
//!
//! Supported forms:
//! - `{{ if <expr> }} … {{ else }} … {{ end }}` (nesting allowed)
//! - `{{ <expr> }}` value output
//! - expressions: `"literal"`, numbers, `true`/`false`, `.field.sub`
//!   (`.` alone is the whole data value; a dotted key like `_user.name`
//!   is tried as a literal key before segment-wise descent), and helper
//!   calls written either `(eq a b)` or `eq a b`
//!
//! Helpers: `eq ne and or not lower upper title trim replace contains
//! hasPrefix hasSuffix default len`.

use serde_json::Value;

use crate::error::TemplateError;

/// Whether a string should go through template rendering at all.
pub fn is_template(s: &str) -> bool {
    s.contains("{{")
}

/// Wrap a bare JSON path like `.field` in `{{ … }}` so it can be rendered;
/// strings already containing `{{` pass through unchanged.
pub fn wrap_bare_path(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.starts_with('.') && !is_template(trimmed) {
        format!("{{{{ {trimmed} }}}}")
    } else {
        expr.to_string()
    }
}

/// Render `template` against `data`.
pub fn render(template: &str, data: &Value) -> Result<String, TemplateError> {
    let segments = lex(template)?;
    let (nodes, rest) = parse_nodes(&segments, 0, false)?;
    if rest != segments.len() {
        return Err(TemplateError::Parse("unexpected '{{ end }}'".into()));
    }
    let mut out = String::new();
    eval_nodes(&nodes, data, &mut out)?;
    Ok(out)
}

// ── lexing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Tag(String),
}

fn lex(input: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_string()));
        }
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| TemplateError::Parse("unterminated '{{'".into()))?;
        segments.push(Segment::Tag(after[..close].trim().to_string()));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

// ── parsing ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Output(Expr),
    If {
        cond: Expr,
        then: Vec<Node>,
        els: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Path(Vec<String>),
    Call(String, Vec<Expr>),
}

/// Parse segments into nodes until `{{ end }}`/`{{ else }}` (when inside an
/// if-block) or end of input. Returns the nodes and the next segment index.
fn parse_nodes(
    segments: &[Segment],
    mut i: usize,
    inside_if: bool,
) -> Result<(Vec<Node>, usize), TemplateError> {
    let mut nodes = Vec::new();
    while i < segments.len() {
        match &segments[i] {
            Segment::Text(t) => {
                nodes.push(Node::Text(t.clone()));
                i += 1;
            }
            Segment::Tag(tag) => {
                if tag == "end" || tag == "else" {
                    if !inside_if {
                        return Err(TemplateError::Parse(format!(
                            "'{{{{ {tag} }}}}' outside of an if-block"
                        )));
                    }
                    return Ok((nodes, i));
                }
                if let Some(cond_src) = tag.strip_prefix("if ") {
                    let cond = parse_expr_str(cond_src)?;
                    let (then, mut j) = parse_nodes(segments, i + 1, true)?;
                    let mut els = Vec::new();
                    if matches!(&segments[j], Segment::Tag(t) if t == "else") {
                        let (parsed, k) = parse_nodes(segments, j + 1, true)?;
                        els = parsed;
                        j = k;
                    }
                    if !matches!(&segments[j], Segment::Tag(t) if t == "end") {
                        return Err(TemplateError::Parse("missing '{{ end }}'".into()));
                    }
                    nodes.push(Node::If { cond, then, els });
                    i = j + 1;
                } else {
                    nodes.push(Node::Output(parse_expr_str(tag)?));
                    i += 1;
                }
            }
        }
    }
    if inside_if {
        return Err(TemplateError::Parse("missing '{{ end }}'".into()));
    }
    Ok((nodes, i))
}

fn parse_expr_str(src: &str) -> Result<Expr, TemplateError> {
    let tokens = tokenize_expr(src)?;
    let mut pos = 0;
    let expr = parse_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(TemplateError::Parse(format!("trailing tokens in '{src}'")));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Open,
    Close,
    Str(String),
    Atom(String),
}

fn tokenize_expr(src: &str) -> Result<Vec<ExprToken>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(ExprToken::Open);
            }
            ')' => {
                chars.next();
                tokens.push(ExprToken::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(esc) = chars.next() {
                                s.push(esc);
                            }
                        }
                        Some(ch) => s.push(ch),
                        None => {
                            return Err(TemplateError::Parse(
                                "unterminated string literal".into(),
                            ));
                        }
                    }
                }
                tokens.push(ExprToken::Str(s));
            }
            _ => {
                let mut atom = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == '(' || ch == ')' {
                        break;
                    }
                    atom.push(ch);
                    chars.next();
                }
                tokens.push(ExprToken::Atom(atom));
            }
        }
    }
    Ok(tokens)
}

/// Parse one expression: a sequence of terms. A multi-term sequence is a
/// helper call with the first term naming the helper.
fn parse_expr(tokens: &[ExprToken], pos: &mut usize) -> Result<Expr, TemplateError> {
    let mut terms = Vec::new();
    while *pos < tokens.len() && tokens[*pos] != ExprToken::Close {
        terms.push(parse_term(tokens, pos)?);
    }
    match terms.len() {
        0 => Err(TemplateError::Parse("empty expression".into())),
        1 => Ok(terms.into_iter().next().unwrap()),
        _ => {
            let mut iter = terms.into_iter();
            match iter.next().unwrap() {
                Expr::Call(name, args) if args.is_empty() => {
                    Ok(Expr::Call(name, iter.collect()))
                }
                other => Err(TemplateError::Parse(format!(
                    "expected a helper name, found {other:?}"
                ))),
            }
        }
    }
}

fn parse_term(tokens: &[ExprToken], pos: &mut usize) -> Result<Expr, TemplateError> {
    match &tokens[*pos] {
        ExprToken::Open => {
            *pos += 1;
            let inner = parse_expr(tokens, pos)?;
            if *pos >= tokens.len() || tokens[*pos] != ExprToken::Close {
                return Err(TemplateError::Parse("missing ')'".into()));
            }
            *pos += 1;
            Ok(inner)
        }
        ExprToken::Close => Err(TemplateError::Parse("unexpected ')'".into())),
        ExprToken::Str(s) => {
            *pos += 1;
            Ok(Expr::Lit(Value::String(s.clone())))
        }
        ExprToken::Atom(a) => {
            *pos += 1;
            if a == "true" {
                return Ok(Expr::Lit(Value::Bool(true)));
            }
            if a == "false" {
                return Ok(Expr::Lit(Value::Bool(false)));
            }
            if let Ok(n) = a.parse::<i64>() {
                return Ok(Expr::Lit(Value::from(n)));
            }
            if let Ok(f) = a.parse::<f64>() {
                return Ok(Expr::Lit(Value::from(f)));
            }
            if let Some(path) = a.strip_prefix('.') {
                let parts = if path.is_empty() {
                    Vec::new()
                } else {
                    path.split('.').map(str::to_string).collect()
                };
                return Ok(Expr::Path(parts));
            }
            // Bare identifier: a helper name; args attach in parse_expr.
            Ok(Expr::Call(a.clone(), Vec::new()))
        }
    }
}

// ── evaluation ──────────────────────────────────────────────────────────

fn eval_nodes(nodes: &[Node], data: &Value, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Output(expr) => out.push_str(&to_display(&eval_expr(expr, data)?)),
            Node::If { cond, then, els } => {
                if truthy(&eval_expr(cond, data)?) {
                    eval_nodes(then, data, out)?;
                } else {
                    eval_nodes(els, data, out)?;
                }
            }
        }
    }
    Ok(())
}

fn eval_expr(expr: &Expr, data: &Value) -> Result<Value, TemplateError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Path(parts) => {
            // Dotted variable names (`_user.name`) are stored as single
            // keys, so try the whole path as a literal key first.
            if let Value::Object(map) = data {
                if !parts.is_empty() {
                    if let Some(v) = map.get(&parts.join(".")) {
                        return Ok(v.clone());
                    }
                }
            }
            let mut cur = data;
            for part in parts {
                cur = match cur {
                    Value::Object(map) => map.get(part).unwrap_or(&Value::Null),
                    _ => &Value::Null,
                };
            }
            Ok(cur.clone())
        }
        Expr::Call(name, args) => eval_call(name, args, data),
    }
}

fn eval_call(name: &str, args: &[Expr], data: &Value) -> Result<Value, TemplateError> {
    let vals: Vec<Value> = args
        .iter()
        .map(|a| eval_expr(a, data))
        .collect::<Result<_, _>>()?;
    let arity = |n: usize| -> Result<(), TemplateError> {
        if vals.len() != n {
            Err(TemplateError::Render(format!(
                "helper '{name}' expects {n} argument(s), got {}",
                vals.len()
            )))
        } else {
            Ok(())
        }
    };

    match name {
        "eq" => {
            arity(2)?;
            Ok(Value::Bool(values_equal(&vals[0], &vals[1])))
        }
        "ne" => {
            arity(2)?;
            Ok(Value::Bool(!values_equal(&vals[0], &vals[1])))
        }
        "and" => Ok(Value::Bool(vals.iter().all(truthy))),
        "or" => Ok(Value::Bool(vals.iter().any(truthy))),
        "not" => {
            arity(1)?;
            Ok(Value::Bool(!truthy(&vals[0])))
        }
        "lower" => {
            arity(1)?;
            Ok(Value::String(to_display(&vals[0]).to_lowercase()))
        }
        "upper" => {
            arity(1)?;
            Ok(Value::String(to_display(&vals[0]).to_uppercase()))
        }
        "title" => {
            arity(1)?;
            Ok(Value::String(titlecase(&to_display(&vals[0]))))
        }
        "trim" => {
            arity(1)?;
            Ok(Value::String(to_display(&vals[0]).trim().to_string()))
        }
        // replace <old> <new> <s>
        "replace" => {
            arity(3)?;
            let (old, new, s) = (
                to_display(&vals[0]),
                to_display(&vals[1]),
                to_display(&vals[2]),
            );
            Ok(Value::String(s.replace(&old, &new)))
        }
        "contains" => {
            arity(2)?;
            Ok(Value::Bool(
                to_display(&vals[1]).contains(&to_display(&vals[0])),
            ))
        }
        "hasPrefix" => {
            arity(2)?;
            Ok(Value::Bool(
                to_display(&vals[1]).starts_with(&to_display(&vals[0])),
            ))
        }
        "hasSuffix" => {
            arity(2)?;
            Ok(Value::Bool(
                to_display(&vals[1]).ends_with(&to_display(&vals[0])),
            ))
        }
        // default <fallback> <value>
        "default" => {
            arity(2)?;
            if truthy(&vals[1]) {
                Ok(vals[1].clone())
            } else {
                Ok(vals[0].clone())
            }
        }
        "len" => {
            arity(1)?;
            let n = match &vals[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                _ => 0,
            };
            Ok(Value::from(n))
        }
        _ => Err(TemplateError::Render(format!("unknown helper '{name}'"))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        _ => a == b || to_display(a) == to_display(b),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn to_display(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn titlecase(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render("no tags here", &Value::Null).unwrap(), "no tags here");
    }

    #[test]
    fn conditional_with_eq() {
        let tpl = r#"{{ if (eq "ok" "ok") }}hello{{ else }}hi{{ end }}"#;
        assert_eq!(render(tpl, &Value::Null).unwrap(), "hello");

        let tpl = r#"{{ if (eq "bad" "ok") }}hello{{ else }}hi{{ end }}"#;
        assert_eq!(render(tpl, &Value::Null).unwrap(), "hi");
    }

    #[test]
    fn conditional_without_else() {
        let tpl = r#"{{ if (eq 1 1) }}yes{{ end }}"#;
        assert_eq!(render(tpl, &Value::Null).unwrap(), "yes");
        let tpl = r#"{{ if (eq 1 2) }}yes{{ end }}"#;
        assert_eq!(render(tpl, &Value::Null).unwrap(), "");
    }

    #[test]
    fn nested_conditionals() {
        let tpl = r#"{{ if true }}{{ if false }}a{{ else }}b{{ end }}{{ else }}c{{ end }}"#;
        assert_eq!(render(tpl, &Value::Null).unwrap(), "b");
    }

    #[test]
    fn path_access() {
        let data = json!({"main": {"temp": 21.5}, "city": "Oslo"});
        assert_eq!(render("{{ .city }}", &data).unwrap(), "Oslo");
        assert_eq!(render("{{ .main.temp }}", &data).unwrap(), "21.5");
    }

    #[test]
    fn dotted_key_is_tried_as_a_literal_first() {
        let data = json!({"_user.name": "alice", "_channel.id": "C1"});
        assert_eq!(render("{{ ._user.name }}", &data).unwrap(), "alice");
        assert_eq!(
            render(r#"{{ if (eq ._channel.id "C1") }}here{{ end }}"#, &data).unwrap(),
            "here"
        );
        // Nested objects still resolve segment-wise.
        let nested = json!({"main": {"temp": 7}});
        assert_eq!(render("{{ .main.temp }}", &nested).unwrap(), "7");
    }

    #[test]
    fn missing_path_renders_empty() {
        let data = json!({"a": 1});
        assert_eq!(render("[{{ .b.c }}]", &data).unwrap(), "[]");
    }

    #[test]
    fn dot_is_the_whole_value() {
        assert_eq!(render("{{ . }}", &json!("scalar")).unwrap(), "scalar");
    }

    #[test]
    fn string_helpers() {
        let d = Value::Null;
        assert_eq!(render(r#"{{ lower "ABC" }}"#, &d).unwrap(), "abc");
        assert_eq!(render(r#"{{ upper "abc" }}"#, &d).unwrap(), "ABC");
        assert_eq!(render(r#"{{ trim "  x  " }}"#, &d).unwrap(), "x");
        assert_eq!(render(r#"{{ title "hello world" }}"#, &d).unwrap(), "Hello World");
        assert_eq!(
            render(r#"{{ replace "a" "o" "banana" }}"#, &d).unwrap(),
            "bonono"
        );
        assert_eq!(render(r#"{{ default "fb" "" }}"#, &d).unwrap(), "fb");
        assert_eq!(render(r#"{{ default "fb" "set" }}"#, &d).unwrap(), "set");
        assert_eq!(render(r#"{{ len "abcd" }}"#, &d).unwrap(), "4");
    }

    #[test]
    fn boolean_helpers() {
        let d = Value::Null;
        assert_eq!(
            render(r#"{{ if (and true (eq 1 1)) }}t{{ end }}"#, &d).unwrap(),
            "t"
        );
        assert_eq!(
            render(r#"{{ if (or false (hasPrefix "ab" "abc")) }}t{{ end }}"#, &d).unwrap(),
            "t"
        );
        assert_eq!(render(r#"{{ if (not "") }}t{{ end }}"#, &d).unwrap(), "t");
    }

    #[test]
    fn bare_call_without_parens() {
        assert_eq!(render(r#"{{ lower "HI" }}"#, &Value::Null).unwrap(), "hi");
        assert_eq!(
            render(r#"{{ if eq "a" "a" }}y{{ end }}"#, &Value::Null).unwrap(),
            "y"
        );
    }

    #[test]
    fn parse_errors_surface() {
        assert!(render("{{ if true }}never closed", &Value::Null).is_err());
        assert!(render("{{ unclosed", &Value::Null).is_err());
        assert!(render("{{ bogusHelper 1 2 }}", &Value::Null).is_err());
        assert!(render("{{ end }}", &Value::Null).is_err());
    }

    #[test]
    fn rendering_is_idempotent() {
        let tpl = r#"{{ if (eq .status "ok") }}hello{{ else }}hi{{ end }}"#;
        let data = json!({"status": "ok"});
        let once = render(tpl, &data).unwrap();
        let twice = render(tpl, &data).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "hello");
    }

    #[test]
    fn wrap_bare_path_wraps_only_paths() {
        assert_eq!(wrap_bare_path(".field"), "{{ .field }}");
        assert_eq!(wrap_bare_path("{{ .field }}"), "{{ .field }}");
        assert_eq!(wrap_bare_path("literal"), "literal");
    }
}
