//! Parley Core - conversation and tool-use orchestration for LLM chat
//!
//! This crate provides the core functionality for the Parley client:
//! - Conversation model and an append-only store that keeps tool calls paired
//! - Tool system with a registry that dispatches each call at most once
//! - Model gateway abstraction and an Anthropic Messages API adapter
//! - The orchestration engine that runs the request/dispatch loop of a turn
//! - Sessions, persistence and configuration

pub mod config;
pub mod context;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod session;
pub mod tools;

pub use config::{Config, ConfigManager, SessionConfig};
pub use conversation::{
    ContentBlock, ConversationMetadata, ConversationSnapshot, ConversationStore, InvocationStatus, Message, Role,
    ToolInvocation, ToolResult,
};
pub use engine::{EngineEvent, EngineOptions, EngineState, OrchestrationEngine, TurnOutcome};
pub use error::{Error, GatewayError, Result, ToolError};
pub use gateway::{AnthropicGateway, ModelGateway, ModelRequest, ModelResponse, StopReason, Usage};
pub use session::{ChatSession, SessionStatus};
pub use tools::{FnTool, Tool, ToolDefinition, ToolOutput, ToolRegistry, ToolRegistryBuilder};

// Re-exported so callers can cancel turns without naming tokio-util
pub use tokio_util::sync::CancellationToken;
