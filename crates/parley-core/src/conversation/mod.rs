//! Conversation model and storage
//!
//! - `types`: messages, content blocks and tool invocations
//! - `store`: the append-only log with snapshot/restore
//! - `window`: selecting the part of the history that fits the model budget

mod store;
mod types;
pub mod window;

pub use store::{ConversationSnapshot, ConversationStore};
pub use types::{
    ContentBlock, ConversationMetadata, InvocationStatus, Message, Role, ToolInvocation, ToolResult,
};
