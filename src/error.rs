//! Error types for the bot engine.
//!
//! Startup failures (configuration, rule loading) are typed and fatal.
//! Runtime action failures are deliberately not errors at this level: they
//! are recorded on the in-flight message (`message.error`, `_*_status`
//! vars) so the rule keeps running and the user sees a rendered response.

/// Top-level error type for the engine's fallible startup paths.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),
}

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rule loading and validation errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Failed to read rule file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Failed to parse rule file {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("Duplicate rule name '{name}' (in {path})")]
    DuplicateName { name: String, path: String },

    #[error("Rule '{name}' combines 'schedule' with 'respond'/'hear'")]
    ScheduleConflict { name: String },
}

/// Template parsing and rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template parse error: {0}")]
    Parse(String),

    #[error("template render error: {0}")]
    Render(String),
}

/// Remote adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Usergroup lookup failed on remote {name}: {reason}")]
    UsergroupLookup { name: String, reason: String },

    #[error("Remote {name} does not support {operation}")]
    Unsupported { name: String, operation: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
