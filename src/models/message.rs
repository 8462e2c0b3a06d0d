//! The message value that flows through the pipeline.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation context a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Unknown,
    Direct,
    Channel,
    PrivateChannel,
}

/// Which source produced a message (and which remote delivers its output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    #[default]
    Unknown,
    Chat,
    Cli,
    Scheduler,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Service::Unknown => "unknown",
            Service::Chat => "chat",
            Service::Cli => "cli",
            Service::Scheduler => "scheduler",
        };
        f.write_str(s)
    }
}

/// A single inbound or outbound message.
///
/// Messages are short-lived values. `Clone` is the deep copy: every map owns
/// its strings, so a cloned message can be mutated by a worker without
/// touching the original.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub service: Service,
    pub channel_id: String,
    pub channel_name: String,
    pub input: String,
    pub output: String,
    pub error: String,
    pub timestamp: String,
    pub thread_timestamp: String,
    pub bot_mentioned: bool,
    pub direct_message_only: bool,
    /// Free-form metadata; `from_schedule` marks scheduler-originated events.
    pub attributes: HashMap<String, String>,
    /// Substitution variables, both reserved (`_user.name`, `_exec_status`, …)
    /// and rule-arg bindings.
    pub vars: HashMap<String, String>,
    /// Resolved room ids to deliver the output to.
    pub output_to_rooms: Vec<String>,
    /// User names/ids to deliver the output to.
    pub output_to_users: Vec<String>,
    /// Optional per-remote attachment payload, passed through opaquely.
    pub remote_attachment: Option<serde_json::Value>,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp.
    pub fn new(service: Service) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            service,
            timestamp: Utc::now().timestamp().to_string(),
            ..Default::default()
        }
    }

    /// Fetch a variable, empty string if unset.
    pub fn var(&self, name: &str) -> &str {
        self.vars.get(name).map(String::as_str).unwrap_or("")
    }

    /// Set a variable.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}
