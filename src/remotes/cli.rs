//! Interactive terminal remote — stdin/stdout REPL for local use.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::error;

use crate::config::Bot;
use crate::error::RemoteError;
use crate::models::{Message, MessageType, Rule, Service};
use crate::remotes::Remote;

/// Reads lines from stdin and prints responses to stdout. Terminal input is
/// always treated as an addressed direct message.
pub struct CliRemote;

impl CliRemote {
    pub fn new() -> Self {
        Self
    }

    fn local_user() -> String {
        std::env::var("USER").unwrap_or_else(|_| "local".to_string())
    }
}

impl Default for CliRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Remote for CliRemote {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn read(
        &self,
        input_tx: mpsc::Sender<Message>,
        _rules: Arc<HashMap<String, Rule>>,
        _bot: Arc<Bot>,
    ) {
        let stdin = tokio::io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();
        let user = Self::local_user();

        eprint!("> ");
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        eprint!("> ");
                        continue;
                    }
                    let mut msg = Message::new(Service::Cli);
                    msg.message_type = MessageType::Direct;
                    msg.bot_mentioned = true;
                    msg.input = line.to_string();
                    msg.set_var("_user.name", user.clone());
                    msg.set_var("_user.id", user.clone());
                    if input_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    error!("error reading stdin: {e}");
                    break;
                }
            }
        }
    }

    async fn send(&self, message: Message, _bot: Arc<Bot>) -> Result<(), RemoteError> {
        if !message.output.is_empty() {
            println!("\n{}\n", message.output);
        }
        eprint!("> ");
        Ok(())
    }
}
