//! Model gateway abstraction
//!
//! The engine talks to the model API only through [`ModelGateway`]. A
//! gateway turns the conversation history plus tool specs into one
//! assistant response, or a typed [`GatewayError`].

mod anthropic;
pub mod logging;

pub use anthropic::{AnthropicGateway, ANTHROPIC_API_VERSION, DEFAULT_BASE_URL, EXTENDED_OUTPUT_BETA};
pub(crate) use anthropic::sanitize_api_error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::conversation::{ContentBlock, Message, ToolInvocation};
use crate::error::GatewayError;
use crate::tools::ToolDefinition;

/// One request to the model
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    /// Empty when tool use is disabled
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Reasoning budget, when thinking applies to this request
    pub thinking_budget: Option<u32>,
    pub extended_output: bool,
}

impl ModelRequest {
    /// Build a request from the settings a turn runs with
    pub fn new(config: &SessionConfig, messages: Vec<Message>) -> Self {
        Self {
            model: config.model.clone(),
            system: None,
            messages,
            tools: Vec::new(),
            temperature: config.effective_temperature(),
            max_tokens: config.max_tokens,
            thinking_budget: config.effective_thinking_budget(),
            extended_output: config.extended_output,
        }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Token usage reported for a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One assistant response
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    /// Blocks in the order the model produced them. Thinking blocks carry
    /// their signature untouched.
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
}

impl ModelResponse {
    /// Tool requests, in the order the model made them
    pub fn tool_uses(&self) -> Vec<ToolInvocation> {
        self.content.iter().filter_map(ToolInvocation::from_block).collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

/// Sends a conversation to the model API
///
/// Implementations must not retry on their own; the engine owns the retry
/// policy.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Gateway name for logs
    fn name(&self) -> &str;

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError>;
}
