//! Rule and action types, deserialized from the YAML rule files.

use std::collections::HashMap;

use serde::Deserialize;

/// A declarative unit mapping a trigger (pattern or schedule) to an ordered
/// sequence of actions and an output template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub name: String,
    /// Addressed pattern: fires only when the bot is mentioned or in a DM.
    pub respond: String,
    /// Passive pattern: fires on any matching message. Takes no args.
    pub hear: String,
    /// Cron expression (5- or 6-field, or `@every <dur>`). Mutually
    /// exclusive with `respond`/`hear`.
    pub schedule: String,
    /// Ordered parameter names; a trailing `?` marks an arg optional.
    pub args: Vec<String>,
    pub active: bool,
    pub include_in_help: bool,
    pub direct_message_only: bool,
    pub start_message_thread: bool,
    pub ignore_threads: bool,
    pub allow_users: Vec<String>,
    pub allow_user_ids: Vec<String>,
    pub allow_usergroups: Vec<String>,
    pub ignore_users: Vec<String>,
    pub ignore_usergroups: Vec<String>,
    /// Room names (resolved to ids at send time).
    pub output_to_rooms: Vec<String>,
    pub output_to_users: Vec<String>,
    /// Response template; supports `${var}` substitution and templating.
    pub format_output: String,
    pub help_text: String,
    /// Emoji name (or templated expression) set on the triggering message.
    pub reaction: String,
    pub actions: Vec<Action>,
    /// Reaction to remove when an action updated `reaction`. Runtime-only.
    #[serde(skip)]
    pub remove_reaction: String,
}

impl Rule {
    /// Number of non-optional args (names without a trailing `?`).
    pub fn required_args(&self) -> usize {
        self.args.iter().filter(|a| !a.ends_with('?')).count()
    }

    /// Whether the rule carries any allow or ignore list.
    pub fn has_auth_lists(&self) -> bool {
        !self.allow_users.is_empty()
            || !self.allow_user_ids.is_empty()
            || !self.allow_usergroups.is_empty()
            || !self.ignore_users.is_empty()
            || !self.ignore_usergroups.is_empty()
    }
}

/// A single unit of work executed as part of a matched rule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Action {
    pub name: String,
    /// One of `get`, `post`, `put`, `exec`, `message`, `log`.
    #[serde(rename = "type")]
    pub action_type: String,
    pub url: String,
    pub cmd: String,
    /// Seconds; 0 means the per-type default (HTTP 10s, exec 20s).
    pub timeout: u64,
    pub query_data: HashMap<String, serde_json::Value>,
    pub custom_headers: HashMap<String, String>,
    /// name → JSON-path-or-template expression evaluated against the parsed
    /// HTTP response body.
    pub expose_json_fields: HashMap<String, String>,
    /// Room names this message/log action is limited to.
    pub limit_to_rooms: Vec<String>,
    pub message: String,
    pub update_reaction: String,
}
