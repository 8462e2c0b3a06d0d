//! Variable substitution and templating.

pub mod engine;
pub mod substitute;

pub use engine::{is_template, render, wrap_bare_path};
pub use substitute::substitute;
