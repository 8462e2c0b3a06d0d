//! Argument tokenizers.
//!
//! The rule tokenizer splits matched input into rule arguments; the exec
//! tokenizer splits a substituted `cmd` into an argv. Both honor double
//! quotes, including the "smart" variants chat clients substitute in.

/// Split rule-argument input on whitespace, honoring straight (`"…"`) and
/// smart (`“…”`) double-quoted groups as single tokens. Empty tokens are
/// dropped.
pub fn rule_args(input: &str) -> Vec<String> {
    split(input, &[('"', '"'), ('“', '”')], false)
}

/// Split an exec command line into argv tokens. Same as [`rule_args`] with
/// single quotes added and empty quoted groups preserved.
pub fn exec_args(input: &str) -> Vec<String> {
    split(input, &[('"', '"'), ('“', '”'), ('\'', '\'')], true)
}

fn split(input: &str, quotes: &[(char, char)], keep_empty_quoted: bool) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut was_quoted = false;
    let mut closing: Option<char> = None;

    let mut flush = |current: &mut String, was_quoted: &mut bool| {
        if !current.is_empty() || (keep_empty_quoted && *was_quoted) {
            tokens.push(std::mem::take(current));
        }
        current.clear();
        *was_quoted = false;
    };

    for c in input.chars() {
        match closing {
            Some(close) if c == close => {
                closing = None;
            }
            Some(_) => current.push(c),
            None => {
                if let Some(&(_, close)) = quotes.iter().find(|(open, _)| *open == c) {
                    closing = Some(close);
                    was_quoted = true;
                } else if c.is_whitespace() {
                    flush(&mut current, &mut was_quoted);
                } else {
                    current.push(c);
                }
            }
        }
    }
    flush(&mut current, &mut was_quoted);
    tokens
}
