//! Rule loading: one YAML file per rule under `config/rules/`, walked
//! recursively. Structural problems (unreadable file, bad YAML, duplicate
//! name) are fatal at startup; semantic oddities are logged and the rule
//! is kept.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, RuleError};
use crate::models::Rule;
use crate::template::substitute;

/// Load every rule file under `<config_dir>/rules/` into a map keyed by
/// rule name.
pub fn load(config_dir: &Path) -> Result<Arc<HashMap<String, Rule>>> {
    let dir = config_dir.join("rules");
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "no rules directory, starting with zero rules");
        return Ok(Arc::new(HashMap::new()));
    }

    let mut rules: HashMap<String, Rule> = HashMap::new();
    for entry in WalkDir::new(&dir).follow_links(true) {
        let entry = entry.map_err(|e| RuleError::Unreadable {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => {}
            _ => continue,
        }

        let raw = std::fs::read_to_string(path).map_err(|e| RuleError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut rule: Rule = serde_yaml::from_str(&raw).map_err(|e| RuleError::ParseError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if rule.name.is_empty() {
            return Err(RuleError::ParseError {
                path: path.display().to_string(),
                reason: "rule has no 'name'".to_string(),
            }
            .into());
        }

        if !rule.schedule.is_empty() && (!rule.respond.is_empty() || !rule.hear.is_empty()) {
            return Err(RuleError::ScheduleConflict { name: rule.name }.into());
        }
        lint(&rule);
        resolve_env(&mut rule);

        if rules.contains_key(&rule.name) {
            return Err(RuleError::DuplicateName {
                name: rule.name,
                path: path.display().to_string(),
            }
            .into());
        }
        debug!(rule = %rule.name, file = %path.display(), "loaded rule");
        rules.insert(rule.name.clone(), rule);
    }

    if rules.is_empty() {
        warn!(dir = %dir.display(), "rules directory contained no rules");
    }
    Ok(Arc::new(rules))
}

/// Warn about rule shapes that load fine but behave surprisingly.
fn lint(rule: &Rule) {
    if !rule.respond.is_empty() && !rule.hear.is_empty() {
        warn!(
            rule = %rule.name,
            "rule sets both 'respond' and 'hear'; 'respond' takes precedence"
        );
    }
    if rule.respond.is_empty() && !rule.hear.is_empty() && !rule.args.is_empty() {
        warn!(rule = %rule.name, "'args' are ignored for 'hear' rules");
    }
    if rule.respond.is_empty() && rule.hear.is_empty() && rule.schedule.is_empty() {
        warn!(rule = %rule.name, "rule has no 'respond', 'hear', or 'schedule' and can never fire");
    }
    for arg in &rule.args {
        if arg.starts_with('_') {
            warn!(rule = %rule.name, arg = %arg, "arg shadows a reserved variable name");
        }
    }
}

/// Resolve `${VAR}` environment references in rule fields at load time.
/// Names with no matching environment variable stay literal so runtime
/// variables survive untouched.
fn resolve_env(rule: &mut Rule) {
    let empty = HashMap::new();
    let name = rule.name.clone();
    let sub = |value: &mut String| {
        let (resolved, err) = substitute(value, &empty);
        if let Some(err) = err {
            debug!(rule = %name, "load-time substitution left literals: {err}");
        }
        *value = resolved;
    };

    sub(&mut rule.format_output);
    for room in &mut rule.output_to_rooms {
        sub(room);
    }
    for action in &mut rule.actions {
        sub(&mut action.url);
        sub(&mut action.cmd);
        sub(&mut action.message);
    }
}
