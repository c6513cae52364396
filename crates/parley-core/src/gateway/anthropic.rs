//! Anthropic Messages API gateway

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::logging::{log_llm_interaction, LogConfig};
use super::{ModelGateway, ModelRequest, ModelResponse, StopReason, Usage};
use crate::config::ModelConfig;
use crate::conversation::{ContentBlock, Message, Role};
use crate::error::{Error, GatewayError, Result};

pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// Beta flag that raises the output ceiling to 128k tokens
pub const EXTENDED_OUTPUT_BETA: &str = "output-128k-2025-02-19";

/// Longest API error message passed through verbatim
const MAX_ERROR_LEN: usize = 300;

/// Gateway for Claude models over the Messages API
pub struct AnthropicGateway {
    client: Client,
    api_key: String,
    base_url: String,
}

// Keep the key out of debug output
impl fmt::Debug for AnthropicGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicGateway")
            .field("api_key", &mask_api_key(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicGateway {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Create a gateway from the `[model]` configuration
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = config.get_api_key().ok_or_else(|| {
            Error::Config(format!(
                "No API key configured. Set {} or run `setup`.",
                config.api_key_env
            ))
        })?;
        Self::new(api_key, config.base_url.as_deref(), config.timeout())
    }

    async fn send(&self, request: &ModelRequest) -> std::result::Result<ModelResponse, GatewayError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = WireRequest::from_request(request);

        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header("content-type", "application/json");
        if request.extended_output {
            builder = builder.header("anthropic-beta", EXTENDED_OUTPUT_BETA);
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<WireError>(&text) {
                Ok(error) => format!("{}: {}", error.error.kind, error.error.message),
                Err(_) => format!("HTTP {}: {}", status, text),
            };
            return Err(GatewayError::from_status(
                status.as_u16(),
                sanitize_api_error(&message),
                retry_after,
            ));
        }

        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::InvalidRequest(format!("Unreadable model response: {}", e)))?;
        Ok(parsed.into_response())
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, GatewayError> {
        debug!(tools = request.tools.len(), thinking = ?request.thinking_budget, "Sending request to Anthropic");
        let result = self.send(&request).await;

        let error = result.as_ref().err().map(|e| e.to_string());
        log_llm_interaction(LogConfig {
            model: &request.model,
            provider: Some(self.name()),
            system_prompt: request.system.as_deref(),
            messages: &request.messages,
            tools: &request.tools,
            thinking_budget: request.thinking_budget,
            response: result.as_ref().ok(),
            error: error.as_deref(),
        });

        result
    }
}

// ---- wire format ----

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<WireThinking>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a ModelRequest) -> Self {
        Self {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref().filter(|s| !s.is_empty()),
            messages: wire_messages(&request.messages, !request.tools.is_empty()),
            temperature: request.temperature,
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
            thinking: request.thinking_budget.map(|budget_tokens| WireThinking {
                kind: "enabled",
                budget_tokens,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireThinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Convert stored history into API messages
///
/// Thinking blocks are echoed back only for the turn in progress (after the
/// last user message), where the API needs them to continue a tool loop.
/// Tool messages travel as user messages and consecutive messages with the
/// same wire role are merged. Without tool definitions the API rejects tool
/// blocks, so earlier calls are replayed as plain text.
fn wire_messages(messages: &[Message], tools_defined: bool) -> Vec<WireMessage> {
    let current_turn = messages.iter().rposition(|m| m.role == Role::User).unwrap_or(0);
    let mut wire: Vec<WireMessage> = Vec::with_capacity(messages.len());

    for (index, message) in messages.iter().enumerate() {
        let keep_thinking = index >= current_turn;
        let content: Vec<WireBlock> = message
            .content
            .iter()
            .filter_map(|block| wire_block(block, keep_thinking, tools_defined))
            .collect();
        if content.is_empty() {
            continue;
        }

        let role = match message.role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };
        match wire.last_mut() {
            Some(last) if last.role == role => last.content.extend(content),
            _ => wire.push(WireMessage { role, content }),
        }
    }

    wire
}

fn wire_block(block: &ContentBlock, keep_thinking: bool, tools_defined: bool) -> Option<WireBlock> {
    Some(match block {
        ContentBlock::ToolUse { tool_name, arguments, .. } if !tools_defined => WireBlock::Text {
            text: format!("[called {} with {}]", tool_name, arguments),
        },
        ContentBlock::ToolResult { output, is_error, .. } if !tools_defined => WireBlock::Text {
            text: if *is_error {
                format!("[tool error: {}]", output)
            } else {
                format!("[tool result: {}]", output)
            },
        },
        ContentBlock::Text { text } if text.trim().is_empty() => return None,
        ContentBlock::Text { text } => WireBlock::Text { text: text.clone() },
        ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } if !keep_thinking => return None,
        ContentBlock::Thinking { thinking, signature } => WireBlock::Thinking {
            thinking: thinking.clone(),
            signature: signature.clone(),
        },
        ContentBlock::RedactedThinking { data } => WireBlock::RedactedThinking { data: data.clone() },
        ContentBlock::ToolUse {
            call_id,
            tool_name,
            arguments,
        } => WireBlock::ToolUse {
            id: call_id.clone(),
            name: tool_name.clone(),
            input: arguments.clone(),
        },
        ContentBlock::ToolResult {
            call_id,
            output,
            is_error,
        } => WireBlock::ToolResult {
            tool_use_id: call_id.clone(),
            content: output.clone(),
            is_error: *is_error,
        },
    })
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

impl WireResponse {
    fn into_response(self) -> ModelResponse {
        let content = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
                ResponseBlock::Thinking { thinking, signature } => Some(ContentBlock::Thinking { thinking, signature }),
                ResponseBlock::RedactedThinking { data } => Some(ContentBlock::RedactedThinking { data }),
                ResponseBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                    call_id: id,
                    tool_name: name,
                    arguments: input,
                }),
                ResponseBlock::Unknown => None,
            })
            .collect();

        ModelResponse {
            content,
            stop_reason: self.stop_reason.as_deref().map(StopReason::parse),
            usage: Usage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Strip anything key-like from an API error and bound its length
pub(crate) fn sanitize_api_error(message: &str) -> String {
    let cleaned: Vec<String> = message
        .split_whitespace()
        .map(|word| {
            if word.starts_with("sk-ant-") {
                mask_api_key(word)
            } else {
                word.to_string()
            }
        })
        .collect();
    let cleaned = cleaned.join(" ");

    if cleaned.chars().count() <= MAX_ERROR_LEN {
        cleaned
    } else {
        let head: String = cleaned.chars().take(MAX_ERROR_LEN).collect();
        format!("{}...", head)
    }
}

fn mask_api_key(key: &str) -> String {
    if key.len() <= 8 {
        return "*".repeat(key.len());
    }
    match (key.get(..4), key.get(key.len() - 4..)) {
        (Some(head), Some(tail)) => format!("{}...{}", head, tail),
        _ => "****".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::conversation::ToolResult;
    use crate::tools::ToolDefinition;
    use serde_json::json;

    fn thinking_block(text: &str) -> ContentBlock {
        ContentBlock::Thinking {
            thinking: text.into(),
            signature: Some(format!("sig-{}", text)),
        }
    }

    #[test]
    fn test_request_body() {
        let config = SessionConfig {
            max_tokens: 8000,
            thinking_budget: 4000,
            extended_output: true,
            ..SessionConfig::default()
        };
        let request = ModelRequest::new(&config, vec![Message::user("hello")])
            .with_system(Some("Be brief".into()))
            .with_tools(vec![ToolDefinition {
                name: "search_web".into(),
                description: "Search".into(),
                parameters: json!({"type": "object"}),
            }]);

        let body = serde_json::to_value(WireRequest::from_request(&request)).unwrap();
        assert_eq!(body["system"], "Be brief");
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 4000);
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hello");
    }

    #[test]
    fn test_no_tools_no_thinking_omitted() {
        let config = SessionConfig {
            thinking_enabled: false,
            ..SessionConfig::default()
        };
        let request = ModelRequest::new(&config, vec![Message::user("hi")]);
        let body = serde_json::to_value(WireRequest::from_request(&request)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("thinking").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_thinking_echoed_only_for_current_turn() {
        let messages = vec![
            Message::user("old question"),
            Message::assistant(vec![thinking_block("old"), ContentBlock::text("old answer")]),
            Message::user("new question"),
            Message::assistant(vec![
                thinking_block("new"),
                ContentBlock::tool_use("t1", "search_web", json!({"query": "x"})),
            ]),
            Message::tool_results(vec![ToolResult::success("t1", "found")]),
        ];

        let wire = serde_json::to_value(wire_messages(&messages, true)).unwrap();
        let wire = wire.as_array().unwrap();
        assert_eq!(wire.len(), 5);

        let old = &wire[1]["content"];
        assert_eq!(old.as_array().unwrap().len(), 1);
        assert_eq!(old[0]["type"], "text");

        let current = &wire[3]["content"];
        assert_eq!(current[0]["type"], "thinking");
        assert_eq!(current[0]["signature"], "sig-new");
        assert_eq!(current[1]["type"], "tool_use");
        assert_eq!(current[1]["id"], "t1");

        assert_eq!(wire[4]["role"], "user");
        assert_eq!(wire[4]["content"][0]["type"], "tool_result");
        assert_eq!(wire[4]["content"][0]["tool_use_id"], "t1");
        assert!(wire[4]["content"][0].get("is_error").is_none());
    }

    #[test]
    fn test_consecutive_roles_merged() {
        let messages = vec![
            Message::user("first attempt"),
            Message::user("second attempt"),
            Message::assistant(vec![ContentBlock::text(""), ContentBlock::text("answer")]),
        ];

        let wire = wire_messages(&messages, true);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].content.len(), 2);
        assert_eq!(wire[1].content.len(), 1);
    }

    #[test]
    fn test_tool_blocks_flattened_without_tools() {
        let messages = vec![
            Message::user("find it"),
            Message::assistant(vec![
                ContentBlock::Thinking {
                    thinking: "hmm".into(),
                    signature: None,
                },
                ContentBlock::tool_use("t1", "search_web", json!({"query": "x"})),
            ]),
            Message::tool_results(vec![ToolResult::error("t1", "no key")]),
            Message::user("ok, from memory then"),
        ];

        let wire = serde_json::to_value(wire_messages(&messages, false)).unwrap();
        let text = wire.to_string();
        assert!(!text.contains("tool_use"));
        assert!(!text.contains("tool_result"));
        assert!(text.contains("[tool error: no key]"));
        // tool results merge into the following user message
        assert_eq!(wire.as_array().unwrap().len(), 3);
        assert_eq!(wire[1]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "opaque=="},
                {"type": "text", "text": "Searching"},
                {"type": "tool_use", "id": "toolu_1", "name": "search_web", "input": {"query": "rust"}},
                {"type": "server_tool_use", "id": "x"}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 20}
        });

        let parsed: WireResponse = serde_json::from_value(body).unwrap();
        let response = parsed.into_response();
        assert_eq!(response.content.len(), 3);
        assert_eq!(
            response.content[0],
            ContentBlock::Thinking {
                thinking: "hmm".into(),
                signature: Some("opaque==".into())
            }
        );
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.total(), 30);
        assert_eq!(response.tool_uses()[0].tool_name, "search_web");
    }

    #[test]
    fn test_sanitize_api_error() {
        let sanitized = sanitize_api_error("invalid key sk-ant-REDACTED");
        assert!(!sanitized.contains("1234567890"));

        let long = "x".repeat(1000);
        assert!(sanitize_api_error(&long).len() < 400);
    }

    #[test]
    fn test_debug_masks_key() {
        let gateway = AnthropicGateway::new("sk-ant-REDACTED", None, Duration::from_secs(5)).unwrap();
        let debug = format!("{:?}", gateway);
        assert!(!debug.contains("1234567890"));
        assert!(debug.contains(DEFAULT_BASE_URL));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = ModelConfig {
            api_key: None,
            api_key_env: "PARLEY_TEST_UNSET_ANTHROPIC_KEY".into(),
            ..ModelConfig::default()
        };
        assert!(matches!(AnthropicGateway::from_config(&config), Err(Error::Config(_))));
    }
}
