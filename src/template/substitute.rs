//! `${var}` variable substitution.
//!
//! Resolution order per placeholder: supplied mapping, then process
//! environment, else the placeholder stays literal and an error accumulates.
//! `$${NAME}` escapes a placeholder (emitted as `${NAME}` with no lookup).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Placeholder syntax: `${NAME}`, with an optional leading `$` escape.
static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$?\$\{([A-Za-z0-9:*_|\-.?]+)\}").unwrap());

/// Substitute all `${name}` placeholders in `input`.
///
/// Returns the (possibly partially) substituted string, plus a joined error
/// message when one or more names resolved nowhere.
pub fn substitute(input: &str, vars: &HashMap<String, String>) -> (String, Option<String>) {
    let mut missing: Vec<String> = Vec::new();

    let out = VAR_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        let name = &caps[1];

        // `$${NAME}` → literal `${NAME}`, no lookup.
        if whole.starts_with("$$") {
            return format!("${{{name}}}");
        }

        if let Some(value) = vars.get(name) {
            if std::env::var(name).is_ok() {
                warn!(
                    var = name,
                    "variable is set both in the message and the environment, using the message value"
                );
            }
            return value.clone();
        }

        if let Ok(value) = std::env::var(name) {
            return value;
        }

        missing.push(name.to_string());
        whole.to_string()
    });

    let err = if missing.is_empty() {
        None
    } else {
        Some(format!(
            "could not find variable(s): {}",
            missing.join(", ")
        ))
    };
    (out.into_owned(), err)
}
