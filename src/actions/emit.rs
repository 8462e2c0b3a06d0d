//! `message` and `log` action handler.
//!
//! Emits an intermediate message to egress mid-rule (paired with no rule,
//! since the rule has not completed) and leaves the rendered content on the
//! worker's message for later actions to read.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::Bot;
use crate::models::{Action, Message, Rule};
use crate::pipeline::OutputSender;
use crate::template;
use crate::template::substitute;

/// Run a message/log action. Returns the rendered content (assigned to the
/// worker's `message.output` by the caller) or None when routing failed.
pub async fn handle(
    action: &Action,
    rule: &Rule,
    msg: &Message,
    bot: &Bot,
    output_tx: &OutputSender,
) -> Option<String> {
    if action.message.is_empty() {
        error!(action = %action.name, "message action has no 'message'");
        return None;
    }

    let (content, err) = substitute(&action.message, &msg.vars);
    if let Some(err) = err {
        warn!(action = %action.name, "substitution in 'message': {err}");
    }
    let content = if template::is_template(&content) {
        let data: Value = serde_json::to_value(&msg.vars).unwrap_or(Value::Null);
        match template::render(&content, &data) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(action = %action.name, "message template failed: {e}");
                e.to_string()
            }
        }
    } else {
        content
    };

    // Log actions are never routed as direct messages.
    let direct = rule.direct_message_only && action.action_type != "log";

    // The emitted copy keeps the pre-action vars for subsequent actions.
    let mut out = msg.clone();
    out.output = content.clone();
    out.direct_message_only = direct;

    match (direct, action.limit_to_rooms.is_empty()) {
        (true, false) => {
            info!(
                action = %action.name,
                "'limit_to_rooms' is ignored for direct-message-only output"
            );
            out.output_to_rooms = Vec::new();
        }
        (false, false) => {
            let resolved = bot.resolve_rooms(&action.limit_to_rooms).await;
            if resolved.is_empty() {
                error!(
                    action = %action.name,
                    "could not resolve any of the rooms in 'limit_to_rooms'"
                );
                return Some(content);
            }
            out.output_to_rooms = resolved;
        }
        (false, true) => {
            // Target the originating channel.
            out.output_to_rooms = if msg.channel_id.is_empty() {
                Vec::new()
            } else {
                vec![msg.channel_id.clone()]
            };
        }
        (true, true) => {
            out.output_to_rooms = Vec::new();
        }
    }

    if output_tx.send((out, None)).await.is_err() {
        warn!(action = %action.name, "egress channel closed, dropping emitted message");
    }
    Some(content)
}
