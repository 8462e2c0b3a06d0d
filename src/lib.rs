//! A declarative chat-automation engine: YAML rules describe what the bot
//! listens for and what it does, the pipeline wires event sources through
//! the matcher to response delivery.

pub mod actions;
pub mod config;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod remotes;
pub mod rules;
pub mod scheduler;
pub mod template;
