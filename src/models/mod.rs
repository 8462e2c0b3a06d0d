//! Core data model: rules, actions, and messages.

pub mod message;
pub mod rule;

pub use message::{Message, MessageType, Service};
pub use rule::{Action, Rule};
