//! Remote adapter boundary.
//!
//! A `Remote` is an event source plus delivery surface: a chat platform, the
//! interactive terminal, or anything else that can publish `Message` values
//! and post responses. The engine only ever talks to this trait.

pub mod cli;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Bot;
use crate::error::RemoteError;
use crate::models::{Message, Rule};

pub use cli::CliRemote;

#[async_trait]
pub trait Remote: Send + Sync {
    /// Identifier string, used in logs.
    fn name(&self) -> &'static str;

    /// Block, decoding platform events into `Message` values published on
    /// the ingress channel. Returns only when the source is exhausted.
    async fn read(
        &self,
        input_tx: mpsc::Sender<Message>,
        rules: Arc<HashMap<String, Rule>>,
        bot: Arc<Bot>,
    );

    /// Render and post a message to its selected destinations.
    async fn send(&self, message: Message, bot: Arc<Bot>) -> Result<(), RemoteError>;

    /// Add/remove/update an emoji reaction on the triggering message.
    /// Optional; the default does nothing.
    async fn reaction(
        &self,
        _message: &Message,
        _rule: &Rule,
        _bot: &Bot,
    ) -> Result<(), RemoteError> {
        Ok(())
    }

    /// Resolve a usergroup id to its member user ids. Authorization treats
    /// any error as a denial, so remotes that cannot answer must return one.
    async fn usergroup_members(
        &self,
        group_id: &str,
        _bot: &Bot,
    ) -> Result<Vec<String>, RemoteError> {
        Err(RemoteError::Unsupported {
            name: self.name().to_string(),
            operation: format!("usergroup lookup for '{group_id}'"),
        })
    }
}
