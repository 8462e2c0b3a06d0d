//! Per-rule action executor.
//!
//! One worker runs per matched message, concurrently with further matcher
//! iterations. Actions run sequentially so later actions can read the vars
//! earlier ones set; the final response is composed from `format_output`.

pub mod emit;
pub mod exec;
pub mod http;

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::config::Bot;
use crate::models::{Action, Message, Rule};
use crate::pipeline::OutputSender;
use crate::template;
use crate::template::substitute;

/// Output used when a rule has no `format_output`.
const EMPTY_FORMAT_OUTPUT: &str = "Hmm, the 'format_output' field in your configuration is empty";

/// Executes a matched rule's actions against a (deep-copied) message.
pub struct Executor {
    bot: Arc<Bot>,
    client: reqwest::Client,
    output_tx: OutputSender,
}

impl Executor {
    pub fn new(bot: Arc<Bot>, output_tx: OutputSender) -> Self {
        Self {
            bot,
            client: reqwest::Client::new(),
            output_tx,
        }
    }

    /// Run all of a rule's actions, then compose and emit the final response
    /// paired with the completed rule.
    pub async fn run_rule(&self, mut rule: Rule, mut msg: Message) {
        let actions = std::mem::take(&mut rule.actions);
        for action in &actions {
            match action.action_type.to_lowercase().as_str() {
                "get" | "post" | "put" => http::handle(action, &mut msg, &self.client).await,
                "exec" => exec::handle(action, &mut msg).await,
                "message" | "log" => {
                    if let Some(content) =
                        emit::handle(action, &rule, &msg, &self.bot, &self.output_tx).await
                    {
                        msg.output = content;
                    }
                }
                "" => {
                    warn!(rule = %rule.name, action = %action.name, "action has no type, skipping");
                }
                other => {
                    warn!(
                        rule = %rule.name,
                        action = %action.name,
                        "unknown action type '{other}', skipping"
                    );
                }
            }
            update_reaction(&mut rule, action, &msg);
        }
        rule.actions = actions;

        self.respond(rule, msg).await;
    }

    /// Compose the final response from `format_output` and hand it to egress.
    async fn respond(&self, rule: Rule, mut msg: Message) {
        if rule.format_output.is_empty() {
            msg.output = EMPTY_FORMAT_OUTPUT.to_string();
        } else {
            if !rule.direct_message_only && !rule.output_to_rooms.is_empty() {
                let resolved = self.bot.resolve_rooms(&rule.output_to_rooms).await;
                if resolved.is_empty() {
                    if rule.output_to_users.is_empty() {
                        msg.error = format!(
                            "Could not find any of the rooms specified for the '{}' rule.",
                            rule.name
                        );
                    } else {
                        warn!(
                            rule = %rule.name,
                            "no rooms in 'output_to_rooms' resolved, proceeding with 'output_to_users' only"
                        );
                    }
                }
                msg.output_to_rooms = resolved;
            }
            for user in &rule.output_to_users {
                if !msg.output_to_users.contains(user) {
                    msg.output_to_users.push(user.clone());
                }
            }

            let (out, err) = substitute(&rule.format_output, &msg.vars);
            if let Some(err) = err {
                warn!(rule = %rule.name, "substitution in 'format_output': {err}");
            }
            msg.output = if template::is_template(&out) {
                let data: Value = serde_json::to_value(&msg.vars).unwrap_or(Value::Null);
                match template::render(&out, &data) {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        error!(rule = %rule.name, "'format_output' template failed: {e}");
                        e.to_string()
                    }
                }
            } else {
                out
            };

            // Action errors take precedence over the rendered output.
            if !msg.error.is_empty() {
                msg.output = msg.error.clone();
            }
        }

        if rule.direct_message_only {
            msg.direct_message_only = true;
        }
        if rule.start_message_thread && msg.thread_timestamp.is_empty() {
            msg.thread_timestamp = msg.timestamp.clone();
        }

        if self.output_tx.send((msg, Some(rule))).await.is_err() {
            warn!("egress channel closed, dropping final response");
        }
    }
}

/// Apply an action's `update_reaction` to the in-flight rule copy so egress
/// can swap the emoji on the triggering message.
fn update_reaction(rule: &mut Rule, action: &Action, msg: &Message) {
    if rule.reaction.is_empty() || action.update_reaction.is_empty() {
        return;
    }
    let (value, err) = substitute(&action.update_reaction, &msg.vars);
    if let Some(err) = err {
        warn!(action = %action.name, "substitution in 'update_reaction': {err}");
    }
    let value = if template::is_template(&value) {
        let data: Value = serde_json::to_value(&msg.vars).unwrap_or(Value::Null);
        match template::render(&value, &data) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(action = %action.name, "'update_reaction' template failed: {e}");
                return;
            }
        }
    } else {
        value
    };
    if value.is_empty() {
        return;
    }
    rule.remove_reaction = std::mem::replace(&mut rule.reaction, value);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::BotConfig;
    use crate::models::Service;

    fn bot_with_rooms(rooms: &[(&str, &str)]) -> Arc<Bot> {
        Arc::new(Bot::new(BotConfig {
            rooms: rooms
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }))
    }

    fn channel() -> (OutputSender, tokio::sync::mpsc::Receiver<(Message, Option<Rule>)>) {
        tokio::sync::mpsc::channel(8)
    }

    #[tokio::test]
    async fn empty_format_output_is_an_error_response() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[]), tx);
        executor
            .run_rule(Rule::default(), Message::new(Service::Cli))
            .await;
        let (msg, rule) = rx.recv().await.unwrap();
        assert!(rule.is_some());
        assert_eq!(msg.output, EMPTY_FORMAT_OUTPUT);
    }

    #[tokio::test]
    async fn exec_action_feeds_format_output() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[]), tx);
        let rule = Rule {
            name: "echoer".into(),
            format_output: "said: ${_exec_output}".into(),
            actions: vec![Action {
                name: "run".into(),
                action_type: "exec".into(),
                cmd: r#"echo "hi there""#.into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        executor.run_rule(rule, Message::new(Service::Cli)).await;
        let (msg, _) = rx.recv().await.unwrap();
        assert_eq!(msg.output, "said: hi there");
        assert_eq!(msg.var("_exec_status"), "0");
    }

    #[tokio::test]
    async fn template_conditional_in_format_output() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[]), tx);
        let rule = Rule {
            name: "cond".into(),
            format_output:
                r#"{{ if (eq "${_test_status}" "ok") }}hello{{ else }}hi{{ end }}"#.into(),
            ..Default::default()
        };
        let mut msg = Message::new(Service::Cli);
        msg.set_var("_test_status", "ok");
        executor.run_rule(rule, msg).await;
        let (msg, _) = rx.recv().await.unwrap();
        assert_eq!(msg.output, "hello");
    }

    #[tokio::test]
    async fn rooms_resolve_to_ids_in_final_message() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[("ops", "R1")]), tx);
        let rule = Rule {
            name: "hourly".into(),
            format_output: "tick".into(),
            output_to_rooms: vec!["ops".into()],
            ..Default::default()
        };
        executor.run_rule(rule, Message::new(Service::Scheduler)).await;
        let (msg, _) = rx.recv().await.unwrap();
        assert_eq!(msg.output, "tick");
        assert_eq!(msg.output_to_rooms, vec!["R1"]);
    }

    #[tokio::test]
    async fn unresolvable_rooms_without_users_is_an_error() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[]), tx);
        let rule = Rule {
            name: "lost".into(),
            format_output: "tick".into(),
            output_to_rooms: vec!["ghost-room".into()],
            ..Default::default()
        };
        executor.run_rule(rule, Message::new(Service::Scheduler)).await;
        let (msg, _) = rx.recv().await.unwrap();
        assert!(msg.output.contains("Could not find any of the rooms"));
    }

    #[tokio::test]
    async fn unresolvable_rooms_with_users_proceeds() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[]), tx);
        let rule = Rule {
            name: "dm-fallback".into(),
            format_output: "tick".into(),
            output_to_rooms: vec!["ghost-room".into()],
            output_to_users: vec!["alice".into()],
            ..Default::default()
        };
        executor.run_rule(rule, Message::new(Service::Scheduler)).await;
        let (msg, _) = rx.recv().await.unwrap();
        assert_eq!(msg.output, "tick");
        assert_eq!(msg.output_to_users, vec!["alice"]);
    }

    #[tokio::test]
    async fn message_error_overrides_output() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[]), tx);
        let rule = Rule {
            name: "failing".into(),
            format_output: "never shown".into(),
            actions: vec![Action {
                name: "boom".into(),
                action_type: "exec".into(),
                cmd: "sh -c 'echo broken >&2; exit 1'".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        executor.run_rule(rule, Message::new(Service::Cli)).await;
        let (msg, _) = rx.recv().await.unwrap();
        assert_eq!(msg.output, "broken");
    }

    #[tokio::test]
    async fn start_message_thread_sets_thread_timestamp() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[]), tx);
        let rule = Rule {
            name: "thready".into(),
            format_output: "ok".into(),
            start_message_thread: true,
            ..Default::default()
        };
        let msg = Message::new(Service::Chat);
        let ts = msg.timestamp.clone();
        executor.run_rule(rule, msg).await;
        let (msg, _) = rx.recv().await.unwrap();
        assert_eq!(msg.thread_timestamp, ts);
    }

    #[test]
    fn reaction_update_swaps_reactions() {
        let mut rule = Rule {
            reaction: "hourglass".into(),
            ..Default::default()
        };
        let action = Action {
            update_reaction: "white_check_mark".into(),
            ..Default::default()
        };
        let msg = Message::new(Service::Chat);
        update_reaction(&mut rule, &action, &msg);
        assert_eq!(rule.reaction, "white_check_mark");
        assert_eq!(rule.remove_reaction, "hourglass");
    }

    #[test]
    fn reaction_update_with_template() {
        let mut rule = Rule {
            reaction: "hourglass".into(),
            ..Default::default()
        };
        let action = Action {
            update_reaction:
                r#"{{ if (eq "${_exec_status}" "0") }}white_check_mark{{ else }}x{{ end }}"#.into(),
            ..Default::default()
        };
        let mut msg = Message::new(Service::Chat);
        msg.set_var("_exec_status", "1");
        update_reaction(&mut rule, &action, &msg);
        assert_eq!(rule.reaction, "x");
    }

    #[test]
    fn no_reaction_update_without_base_reaction() {
        let mut rule = Rule::default();
        let action = Action {
            update_reaction: "thumbsup".into(),
            ..Default::default()
        };
        update_reaction(&mut rule, &action, &Message::new(Service::Chat));
        assert!(rule.reaction.is_empty());
        assert!(rule.remove_reaction.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_type_is_skipped() {
        let (tx, mut rx) = channel();
        let executor = Executor::new(bot_with_rooms(&[]), tx);
        let rule = Rule {
            name: "odd".into(),
            format_output: "done".into(),
            actions: vec![Action {
                name: "mystery".into(),
                action_type: "teleport".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        executor.run_rule(rule, Message::new(Service::Cli)).await;
        let (msg, _) = rx.recv().await.unwrap();
        assert_eq!(msg.output, "done");
    }
}
