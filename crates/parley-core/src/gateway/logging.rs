//! Model request/response logging
//!
//! Set the `LLM_LOG_FILE` environment variable to append one JSON line per
//! gateway call to that file.
//!
//! Example: `LLM_LOG_FILE=/tmp/llm.log parley`

use std::io::Write;
use std::path::Path;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::ModelResponse;
use crate::conversation::Message;
use crate::tools::ToolDefinition;

pub const LOG_FILE_ENV: &str = "LLM_LOG_FILE";

/// What to include in a log entry
#[derive(Default)]
pub struct LogConfig<'a> {
    pub model: &'a str,
    /// Gateway name (e.g. "anthropic")
    pub provider: Option<&'a str>,
    pub system_prompt: Option<&'a str>,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
    pub thinking_budget: Option<u32>,
    pub response: Option<&'a ModelResponse>,
    pub error: Option<&'a str>,
}

impl LogConfig<'_> {
    fn to_json(&self) -> Value {
        json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "model": self.model,
            "provider": self.provider,
            "request": {
                "system_prompt": self.system_prompt,
                "message_count": self.messages.len(),
                "last_role": self.messages.last().map(|m| m.role.as_str()),
                "tools": self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                "thinking_budget": self.thinking_budget,
            },
            "response": self.response.map(|r| json!({
                "stop_reason": r.stop_reason,
                "usage": r.usage,
                "tool_calls": r.tool_uses().iter().map(|c| json!({
                    "name": c.tool_name,
                    "call_id": c.call_id,
                })).collect::<Vec<_>>(),
                "block_count": r.content.len(),
            })),
            "error": self.error,
        })
    }
}

/// Log a gateway interaction if `LLM_LOG_FILE` is set
pub fn log_llm_interaction(config: LogConfig<'_>) {
    let Ok(log_file) = std::env::var(LOG_FILE_ENV) else {
        return;
    };
    write_entry(Path::new(&log_file), &config);
}

/// Append one entry to `path`
pub fn write_entry(path: &Path, config: &LogConfig<'_>) {
    let line = match serde_json::to_string(&config.to_json()) {
        Ok(line) => line,
        Err(e) => {
            warn!("Failed to serialize LLM log entry: {}", e);
            return;
        }
    };

    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to write to LLM log file: {}", e);
            }
        }
        Err(e) => {
            warn!("Failed to open LLM log file {}: {}", path.display(), e);
        }
    }

    debug!("Logged LLM interaction to {}", path.display());
}
