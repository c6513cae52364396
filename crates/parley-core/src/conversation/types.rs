//! Conversation data model
//!
//! A conversation is an ordered log of [`Message`]s. Each message carries a
//! sequence of [`ContentBlock`]s, which is where text, thinking, tool
//! requests and tool results live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One block of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Model reasoning. `signature` is an opaque continuation value owned by
    /// the gateway and is stored exactly as received.
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Reasoning the API returned in encrypted form; opaque to us.
    RedactedThinking {
        data: String,
    },
    ToolUse {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        ContentBlock::ToolUse {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. })
    }
}

/// Outcome of a single tool dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
            is_error: true,
        }
    }
}

impl From<ToolResult> for ContentBlock {
    fn from(result: ToolResult) -> Self {
        ContentBlock::ToolResult {
            call_id: result.call_id,
            output: result.output,
            is_error: result.is_error,
        }
    }
}

/// Status of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Pending,
    Success,
    Error,
}

/// A tool call requested by the model, tracked until its result is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub status: InvocationStatus,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            status: InvocationStatus::Pending,
        }
    }

    /// Build a pending invocation from a `tool_use` block
    pub fn from_block(block: &ContentBlock) -> Option<Self> {
        match block {
            ContentBlock::ToolUse { call_id, tool_name, arguments } => {
                Some(Self::new(call_id.clone(), tool_name.clone(), arguments.clone()))
            }
            _ => None,
        }
    }

    /// Record the result of this invocation
    pub fn resolve(&mut self, result: &ToolResult) {
        self.status = if result.is_error {
            InvocationStatus::Error
        } else {
            InvocationStatus::Success
        };
    }

    pub fn is_pending(&self) -> bool {
        self.status == InvocationStatus::Pending
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Position in the conversation, assigned by the store on append
    #[serde(default)]
    pub turn_index: u64,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            turn_index: 0,
            timestamp: Utc::now(),
        }
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// Create an assistant message from the blocks the model returned
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool message aggregating one round of results
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::new(Role::Tool, results.into_iter().map(ContentBlock::from).collect())
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Thinking text, in order
    pub fn thinking(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Thinking { thinking, .. } => Some(thinking.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Pending invocations for every `tool_use` block, in request order
    pub fn tool_uses(&self) -> Vec<ToolInvocation> {
        self.content.iter().filter_map(ToolInvocation::from_block).collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }

    /// Results carried by this message
    pub fn tool_results_iter(&self) -> impl Iterator<Item = ToolResult> + '_ {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult { call_id, output, is_error } => Some(ToolResult {
                call_id: call_id.clone(),
                output: output.clone(),
                is_error: *is_error,
            }),
            _ => None,
        })
    }
}

/// Settings recorded alongside a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub model_name: String,
    pub thinking_enabled: bool,
    pub thinking_budget: u32,
    pub tool_use_enabled: bool,
}

impl Default for ConversationMetadata {
    fn default() -> Self {
        Self {
            model_name: crate::config::DEFAULT_MODEL.to_string(),
            thinking_enabled: true,
            thinking_budget: crate::config::DEFAULT_THINKING_BUDGET,
            tool_use_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_block_tags() {
        let block = ContentBlock::tool_use("call_1", "search_web", json!({"query": "rust"}));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["tool_name"], "search_web");

        let result: ContentBlock = ToolResult::error("call_1", "boom").into();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["is_error"], true);
    }

    #[test]
    fn test_message_accessors() {
        let msg = Message::assistant(vec![
            ContentBlock::Thinking { thinking: "hmm".into(), signature: Some("sig".into()) },
            ContentBlock::text("Let me look."),
            ContentBlock::tool_use("a", "search_web", json!({"query": "x"})),
            ContentBlock::tool_use("b", "search_emails", json!({"query": "y"})),
        ]);

        assert_eq!(msg.text(), "Let me look.");
        assert_eq!(msg.thinking(), vec!["hmm"]);
        assert!(msg.has_tool_use());

        let uses = msg.tool_uses();
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].call_id, "a");
        assert_eq!(uses[1].tool_name, "search_emails");
        assert!(uses.iter().all(|u| u.is_pending()));
    }

    #[test]
    fn test_invocation_resolve() {
        let mut inv = ToolInvocation::new("a", "send_email", json!({}));
        inv.resolve(&ToolResult::error("a", "SMTP timeout"));
        assert_eq!(inv.status, InvocationStatus::Error);

        let mut inv = ToolInvocation::new("b", "send_email", json!({}));
        inv.resolve(&ToolResult::success("b", "sent"));
        assert_eq!(inv.status, InvocationStatus::Success);
    }
}
