//! Context size accounting
//!
//! Token estimates used to keep the history sent to the model inside its
//! context window.

pub mod tokens;

pub use tokens::{context_limit, TokenCounter};
