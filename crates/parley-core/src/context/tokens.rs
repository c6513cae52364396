//! Token counting utilities for context management
//!
//! Uses tiktoken when available, falls back to heuristics otherwise.

use crate::conversation::{ContentBlock, Message};

#[cfg(feature = "tiktoken")]
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Per-message overhead for role and separators
const MESSAGE_OVERHEAD: usize = 4;

/// Context window for a model, in tokens
pub fn context_limit(model: &str) -> usize {
    if model.contains("claude") {
        200_000
    } else {
        128_000
    }
}

/// Token counter for estimating context usage
pub struct TokenCounter {
    #[cfg(feature = "tiktoken")]
    encoder: Option<CoreBPE>,
}

impl TokenCounter {
    pub fn new() -> Self {
        #[cfg(feature = "tiktoken")]
        {
            // cl100k_base is close enough for Claude's tokenizer for budgeting
            Self { encoder: cl100k_base().ok() }
        }

        #[cfg(not(feature = "tiktoken"))]
        {
            Self {}
        }
    }

    /// Count tokens for a string
    ///
    /// Without tiktoken:
    /// - For English text: ~4 characters per token
    /// - For code: ~3 characters per token (more symbols)
    pub fn count(&self, text: &str) -> usize {
        #[cfg(feature = "tiktoken")]
        {
            if let Some(ref encoder) = self.encoder {
                return encoder.encode_with_special_tokens(text).len();
            }
        }

        self.count_heuristic(text)
    }

    fn count_heuristic(&self, text: &str) -> usize {
        let code_chars = text
            .chars()
            .filter(|c| {
                matches!(
                    c,
                    '{' | '}' | '[' | ']' | '(' | ')' | ';' | ':' | ',' | '=' | '+' | '-' | '*' | '/'
                )
            })
            .count();

        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }

        // More than 5% code characters: use the code ratio
        let ratio = if code_chars as f64 / chars as f64 > 0.05 {
            3.0
        } else {
            4.0
        };

        (chars as f64 / ratio).ceil() as usize
    }

    /// Estimate the tokens a message occupies on the wire
    pub fn count_message(&self, message: &Message) -> usize {
        let content: usize = message
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => self.count(text),
                ContentBlock::Thinking { thinking, .. } => self.count(thinking),
                ContentBlock::RedactedThinking { data } => self.count(data),
                ContentBlock::ToolUse { tool_name, arguments, .. } => {
                    self.count(tool_name) + self.count(&arguments.to_string())
                }
                ContentBlock::ToolResult { output, .. } => self.count(output),
            })
            .sum();
        content + MESSAGE_OVERHEAD
    }

    /// Count tokens in a list of messages
    pub fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }

    pub fn is_using_tiktoken(&self) -> bool {
        #[cfg(feature = "tiktoken")]
        {
            self.encoder.is_some()
        }

        #[cfg(not(feature = "tiktoken"))]
        {
            false
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}
