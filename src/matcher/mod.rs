//! The matcher task: pattern recognition, authorization, argument binding,
//! and help synthesis.
//!
//! Consumes one message at a time from ingress. A hit spawns a per-message
//! worker (the matcher never waits on action execution); a miss on an
//! addressed message synthesizes the help response.

pub mod auth;
pub mod pattern;
pub mod tokenize;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::actions::Executor;
use crate::config::Bot;
use crate::metrics::RuleCounter;
use crate::models::{Message, MessageType, Rule, Service};
use crate::pipeline::OutputSender;
use crate::remotes::Remote;

/// Help preamble when no `custom_help_text` is configured.
const HELP_PREAMBLE: &str = "I understand these commands:";

/// Fallback remote for services with no registered adapter. Its usergroup
/// lookups fail, which keeps authorization fail-closed.
struct NullRemote;

#[async_trait::async_trait]
impl Remote for NullRemote {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn read(
        &self,
        _input_tx: mpsc::Sender<Message>,
        _rules: Arc<HashMap<String, Rule>>,
        _bot: Arc<Bot>,
    ) {
    }

    async fn send(
        &self,
        _message: Message,
        _bot: Arc<Bot>,
    ) -> Result<(), crate::error::RemoteError> {
        Ok(())
    }
}

/// Scans the rule table for each inbound message.
pub struct Matcher {
    rules: Arc<HashMap<String, Rule>>,
    /// Rule names in scan order (sorted for determinism).
    order: Vec<String>,
    bot: Arc<Bot>,
    remotes: HashMap<Service, Arc<dyn Remote>>,
    output_tx: OutputSender,
    metrics: Arc<RuleCounter>,
    executor: Arc<Executor>,
    /// Names of scheduled rules with a worker still running; ticks for these
    /// are dropped rather than queued.
    scheduled_in_flight: Arc<Mutex<HashSet<String>>>,
    null_remote: NullRemote,
}

impl Matcher {
    pub fn new(
        rules: Arc<HashMap<String, Rule>>,
        bot: Arc<Bot>,
        remotes: HashMap<Service, Arc<dyn Remote>>,
        output_tx: OutputSender,
        metrics: Arc<RuleCounter>,
    ) -> Self {
        let mut order: Vec<String> = rules.keys().cloned().collect();
        order.sort();
        let executor = Arc::new(Executor::new(Arc::clone(&bot), output_tx.clone()));
        Self {
            rules,
            order,
            bot,
            remotes,
            output_tx,
            metrics,
            executor,
            scheduled_in_flight: Arc::new(Mutex::new(HashSet::new())),
            null_remote: NullRemote,
        }
    }

    /// Consume the ingress channel until all producers hang up.
    pub async fn run(self, mut input_rx: mpsc::Receiver<Message>) {
        while let Some(msg) = input_rx.recv().await {
            self.handle(msg).await;
        }
        debug!("ingress channel closed, matcher exiting");
    }

    async fn handle(&self, msg: Message) {
        for name in &self.order {
            let rule = &self.rules[name];
            if !rule.active {
                continue;
            }

            if msg.service == Service::Scheduler {
                if !rule.schedule.is_empty()
                    && msg.attributes.get("from_schedule") == Some(&rule.name)
                {
                    // At most one execution per scheduled rule at a time.
                    if !self
                        .scheduled_in_flight
                        .lock()
                        .await
                        .insert(rule.name.clone())
                    {
                        debug!(rule = %rule.name, "previous scheduled run still in flight, skipping tick");
                        return;
                    }
                    self.metrics.increment(&rule.name).await;
                    self.spawn_scheduled_worker(rule.clone(), msg.clone());
                    return;
                }
                continue;
            }

            let is_respond = !rule.respond.is_empty();
            let pattern = if is_respond { &rule.respond } else { &rule.hear };
            let Some(processed) = pattern::matches(pattern, &msg.input, is_respond) else {
                continue;
            };

            // Respond rules only fire when addressed.
            if is_respond && !msg.bot_mentioned && msg.message_type != MessageType::Direct {
                continue;
            }

            if rule.ignore_threads && !msg.thread_timestamp.is_empty() {
                debug!(rule = %rule.name, "message is threaded and the rule ignores threads");
                return;
            }

            self.metrics.increment(&rule.name).await;
            self.execute_hit(rule, msg, processed, is_respond).await;
            return;
        }

        // No rule matched.
        self.metrics.increment("").await;
        if msg.bot_mentioned || msg.message_type == MessageType::Direct {
            if self.bot.config.disable_no_match_help {
                debug!("no rule matched and help is disabled, dropping");
                return;
            }
            let mut msg = msg;
            msg.output = self.synthesize_help();
            let _ = self.output_tx.send((msg, None)).await;
        }
    }

    /// Authorization and argument checks, then the worker hand-off.
    async fn execute_hit(&self, rule: &Rule, mut msg: Message, processed: String, is_respond: bool) {
        let input = msg.input.clone();
        msg.set_var("_raw_user_input", input);

        let remote: &dyn Remote = match self.remotes.get(&msg.service) {
            Some(r) => r.as_ref(),
            None => &self.null_remote,
        };
        let user_name = msg.var("_user.name").to_string();
        let user_id = msg.var("_user.id").to_string();
        if !auth::can_trigger(rule, &user_name, &user_id, remote, &self.bot).await {
            info!(rule = %rule.name, user = %user_name, "not authorized");
            msg.output = format!("You are not allowed to run the '{}' rule.", rule.name);
            msg.direct_message_only = true;
            let _ = self.output_tx.send((msg, Some(rule.clone()))).await;
            return;
        }

        if is_respond && !rule.args.is_empty() {
            let tokens = tokenize::rule_args(&processed);
            if rule.required_args() > tokens.len() {
                msg.output = format!(
                    "You might be missing an argument or two. This is what I'm looking for\n```{}```",
                    rule.help_text
                );
                let _ = self.output_tx.send((msg, Some(rule.clone()))).await;
                return;
            }
            for (i, arg) in rule.args.iter().enumerate() {
                let name = arg.trim_end_matches('?');
                let value = tokens.get(i).cloned().unwrap_or_default();
                msg.set_var(name.to_string(), value);
            }
        }

        self.spawn_worker(rule.clone(), msg);
    }

    /// Run the rule's actions concurrently with further matcher iterations.
    fn spawn_worker(&self, rule: Rule, msg: Message) {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            executor.run_rule(rule, msg).await;
        });
    }

    /// Like [`spawn_worker`](Self::spawn_worker), but releases the rule's
    /// in-flight slot when the run completes.
    fn spawn_scheduled_worker(&self, rule: Rule, msg: Message) {
        let executor = Arc::clone(&self.executor);
        let in_flight = Arc::clone(&self.scheduled_in_flight);
        tokio::spawn(async move {
            let name = rule.name.clone();
            executor.run_rule(rule, msg).await;
            in_flight.lock().await.remove(&name);
        });
    }

    /// Build the help response: one bullet per active, addressed,
    /// help-enabled rule with help text.
    fn synthesize_help(&self) -> String {
        if !self.bot.config.custom_help_text.is_empty() {
            return self.bot.config.custom_help_text.clone();
        }
        let mut help = HELP_PREAMBLE.to_string();
        for name in &self.order {
            let rule = &self.rules[name];
            if rule.active
                && rule.hear.is_empty()
                && rule.include_in_help
                && !rule.help_text.is_empty()
            {
                help.push_str("\n\n• ");
                help.push_str(&rule.help_text);
            }
        }
        help
    }
}
