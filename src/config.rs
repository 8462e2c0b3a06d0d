//! Process-wide bot configuration and shared lookup indexes.
//!
//! `BotConfig` is the `config/bot.yml` shape. `Bot` wraps it with the two
//! indexes chat adapters publish asynchronously (room name→id, usergroup
//! name→id) and a readiness signal the scheduler waits on instead of
//! busy-polling.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tokio::sync::{RwLock, watch};
use tracing::warn;

use crate::error::{ConfigError, Result};
use crate::template::substitute;

/// Static configuration parsed from `config/bot.yml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot identity as shown to users and in metric labels.
    pub name: String,
    /// Platform user id of the bot (used for the scheduler's self-mention).
    pub id: String,
    /// Enabled event sources.
    pub chat: bool,
    pub cli: bool,
    pub scheduler: bool,
    /// Chat platform credential; `${VAR}` values resolve from the environment.
    pub chat_token: String,
    pub debug: bool,
    pub metrics: bool,
    pub metrics_port: u16,
    pub interactive_components: bool,
    pub respond_to_bots: bool,
    pub disable_no_match_help: bool,
    pub custom_help_text: String,
    /// Static room name → room id mapping, merged into the live index.
    pub rooms: HashMap<String, String>,
    /// Static usergroup name → usergroup id mapping.
    pub usergroups: HashMap<String, String>,
}

impl BotConfig {
    /// Load and env-substitute `bot.yml` from the config directory.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join("bot.yml");
        let raw = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
        let mut config: BotConfig =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let (token, err) = substitute(&config.chat_token, &HashMap::new());
        if let Some(err) = err {
            warn!("chat_token: {err}");
        }
        config.chat_token = token;

        if config.metrics_port == 0 {
            config.metrics_port = 8080;
        }
        Ok(config)
    }
}

/// Live bot state shared across pipeline tasks.
pub struct Bot {
    pub config: BotConfig,
    rooms: RwLock<HashMap<String, String>>,
    usergroups: RwLock<HashMap<String, String>>,
    rooms_ready_tx: watch::Sender<bool>,
    rooms_ready_rx: watch::Receiver<bool>,
}

impl Bot {
    pub fn new(config: BotConfig) -> Self {
        let static_rooms = config.rooms.clone();
        let static_groups = config.usergroups.clone();
        // With no chat adapter there is nothing to wait for: the static
        // index is all the bot will ever know.
        let ready = !config.chat || !static_rooms.is_empty();
        let (rooms_ready_tx, rooms_ready_rx) = watch::channel(ready);
        Self {
            config,
            rooms: RwLock::new(static_rooms),
            usergroups: RwLock::new(static_groups),
            rooms_ready_tx,
            rooms_ready_rx,
        }
    }

    /// Publish the room index (called by chat adapters once they have
    /// enumerated channels). Flips the readiness signal.
    pub async fn publish_rooms(&self, rooms: HashMap<String, String>) {
        self.rooms.write().await.extend(rooms);
        let _ = self.rooms_ready_tx.send(true);
    }

    /// Block until the room index has been populated.
    pub async fn wait_rooms_populated(&self) {
        let mut rx = self.rooms_ready_rx.clone();
        // wait_for returns immediately when already true.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Resolve a room name to its id.
    pub async fn resolve_room(&self, name: &str) -> Option<String> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Resolve room names to ids, silently skipping unknown names.
    pub async fn resolve_rooms(&self, names: &[String]) -> Vec<String> {
        let rooms = self.rooms.read().await;
        names.iter().filter_map(|n| rooms.get(n).cloned()).collect()
    }

    /// Resolve a usergroup name to its id.
    pub async fn usergroup_id(&self, name: &str) -> Option<String> {
        self.usergroups.read().await.get(name).cloned()
    }
}
