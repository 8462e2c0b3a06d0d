//! Trigger pattern matching: plain prefixes and `/…/` regexes.

use regex::Regex;
use tracing::error;

/// Match `input` against a rule pattern.
///
/// Plain patterns match case-insensitively when the input equals the pattern
/// or begins with it followed by a non-word character. Patterns wrapped in
/// `/…/` are compiled as case-insensitive regexes searched over the whole
/// input.
///
/// On a hit, returns the input with the matched portion removed and trimmed
/// when `trim` is set (respond rules), or the input unchanged otherwise
/// (hear rules). Uncompilable regexes fail closed with a logged error.
pub fn matches(pattern: &str, input: &str, trim: bool) -> Option<String> {
    if pattern.is_empty() {
        return None;
    }

    if let Some(expr) = regex_body(pattern) {
        return match_regex(expr, input, trim);
    }
    match_plain(pattern, input, trim)
}

/// The body of a `/…/` pattern, if the pattern is one.
fn regex_body(pattern: &str) -> Option<&str> {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        Some(&pattern[1..pattern.len() - 1])
    } else {
        None
    }
}

fn match_regex(expr: &str, input: &str, trim: bool) -> Option<String> {
    let re = match Regex::new(&format!("(?i){expr}")) {
        Ok(re) => re,
        Err(e) => {
            error!(pattern = expr, "unsupported pattern, treating as no match: {e}");
            return None;
        }
    };
    let found = re.find(input)?;
    if trim {
        let matched = found.as_str();
        Some(input.replacen(matched, "", 1).trim().to_string())
    } else {
        Some(input.to_string())
    }
}

fn match_plain(pattern: &str, input: &str, trim: bool) -> Option<String> {
    let prefix_len = case_insensitive_prefix_len(pattern, input)?;

    let rest = &input[prefix_len..];
    match rest.chars().next() {
        // Exact match.
        None => Some(String::new()),
        // Prefix match requires a non-word boundary character.
        Some(c) if !c.is_alphanumeric() && c != '_' => {
            if trim {
                Some(rest.trim().to_string())
            } else {
                Some(input.to_string())
            }
        }
        Some(_) => None,
    }
}

/// Byte length of `input`'s prefix that equals `pattern` case-insensitively,
/// or None when `input` does not start with `pattern`.
fn case_insensitive_prefix_len(pattern: &str, input: &str) -> Option<usize> {
    let mut len = 0;
    let mut input_chars = input.chars();
    for p in pattern.chars() {
        let i = input_chars.next()?;
        if !p.to_lowercase().eq(i.to_lowercase()) {
            return None;
        }
        len += i.len_utf8();
    }
    Some(len)
}
