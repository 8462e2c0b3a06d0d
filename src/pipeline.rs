//! Pipeline topology: ingress fan-in → matcher → egress.
//!
//! Three long-lived tasks joined by bounded channels. The egress channel
//! carries `(Message, Option<Rule>)` pairs, so a response and the rule that
//! produced it (or `None` for help and intra-rule emissions) travel as one
//! value and can never fall out of step.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Bot;
use crate::matcher::Matcher;
use crate::metrics::RuleCounter;
use crate::models::{Message, Rule, Service};
use crate::remotes::Remote;
use crate::scheduler;

/// Egress producer handle: a final or intermediate response paired with the
/// rule that completed (None when no rule applies).
pub type OutputSender = mpsc::Sender<(Message, Option<Rule>)>;
pub type OutputReceiver = mpsc::Receiver<(Message, Option<Rule>)>;

/// Channel capacity. Kept minimal: backpressure, not buffering, is the
/// contract between pipeline stages.
const CHANNEL_CAPACITY: usize = 1;

/// The assembled engine: remotes, rules, bot state, metrics.
pub struct Pipeline {
    bot: Arc<Bot>,
    rules: Arc<HashMap<String, Rule>>,
    remotes: HashMap<Service, Arc<dyn Remote>>,
    metrics: Arc<RuleCounter>,
}

impl Pipeline {
    pub fn new(
        bot: Arc<Bot>,
        rules: Arc<HashMap<String, Rule>>,
        metrics: Arc<RuleCounter>,
    ) -> Self {
        Self {
            bot,
            rules,
            remotes: HashMap::new(),
            metrics,
        }
    }

    /// Register a remote as the adapter for a service.
    pub fn register(&mut self, service: Service, remote: Arc<dyn Remote>) {
        info!(service = %service, remote = remote.name(), "registered remote");
        self.remotes.insert(service, remote);
    }

    /// Run the pipeline until every ingress producer has hung up.
    pub async fn run(self) {
        let (input_tx, input_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel::<(Message, Option<Rule>)>(CHANNEL_CAPACITY);

        for remote in self.remotes.values() {
            let remote = Arc::clone(remote);
            let tx = input_tx.clone();
            let rules = Arc::clone(&self.rules);
            let bot = Arc::clone(&self.bot);
            tokio::spawn(async move {
                remote.read(tx, rules, bot).await;
                debug!(remote = remote.name(), "ingress reader finished");
            });
        }

        if self.bot.config.scheduler {
            tokio::spawn(scheduler::start(
                Arc::clone(&self.rules),
                Arc::clone(&self.bot),
                input_tx.clone(),
            ));
        }
        // The matcher exits once all ingress producers are gone.
        drop(input_tx);

        let matcher = Matcher::new(
            Arc::clone(&self.rules),
            Arc::clone(&self.bot),
            self.remotes.clone(),
            output_tx,
            Arc::clone(&self.metrics),
        );
        let matcher_handle = tokio::spawn(matcher.run(input_rx));

        Self::egress(output_rx, self.remotes, self.bot).await;
        let _ = matcher_handle.await;
    }

    /// Single consumer of the output channel: route each response to its
    /// destination remote.
    async fn egress(
        mut output_rx: OutputReceiver,
        remotes: HashMap<Service, Arc<dyn Remote>>,
        bot: Arc<Bot>,
    ) {
        while let Some((msg, rule)) = output_rx.recv().await {
            let remote = match msg.service {
                Service::Cli => remotes.get(&Service::Cli),
                // Scheduler output is delivered like chat output.
                Service::Chat | Service::Scheduler => remotes
                    .get(&Service::Chat)
                    .or_else(|| remotes.get(&Service::Cli)),
                Service::Unknown => None,
            };
            let Some(remote) = remote else {
                warn!(service = %msg.service, "no remote registered for service, dropping message");
                continue;
            };

            if let Some(rule) = &rule {
                if !rule.reaction.is_empty() || !rule.remove_reaction.is_empty() {
                    if let Err(e) = remote.reaction(&msg, rule, &bot).await {
                        warn!(remote = remote.name(), "reaction update failed: {e}");
                    }
                }
            }

            if let Err(e) = remote.send(msg, Arc::clone(&bot)).await {
                error!(remote = remote.name(), "send failed: {e}");
            }
        }
        debug!("output channel closed, egress exiting");
    }
}
