//! Append-only conversation log
//!
//! The store enforces the tool pairing rule: every `tool_use` block is
//! answered by exactly one `tool_result` with the same call id before the
//! next user message. Appends that would break the rule are rejected, and
//! a snapshot that breaks it cannot be restored.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::types::{ContentBlock, ConversationMetadata, Message, Role};
use crate::error::{Error, Result};

/// Immutable copy of a conversation, suitable for serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub metadata: ConversationMetadata,
    pub messages: Vec<Message>,
}

/// Tracks open tool calls while walking a message sequence
#[derive(Debug, Clone, Default)]
struct PairingTracker {
    /// Call ids awaiting a result, in request order
    open: Vec<String>,
    /// Every call id ever requested in this conversation
    seen: HashSet<String>,
    /// Highest turn index accepted so far
    last_index: Option<u64>,
}

impl PairingTracker {
    /// Check `message` against the pairing rule, given the calls still `open`
    fn check(&self, message: &Message, open: &[String]) -> std::result::Result<(), String> {
        if let Some(last) = self.last_index {
            if message.turn_index <= last {
                return Err(format!(
                    "turn index {} does not follow {}",
                    message.turn_index, last
                ));
            }
        }

        match message.role {
            Role::User => {
                if let Some(open) = open.first() {
                    return Err(format!(
                        "tool call {} has no result before the next user message",
                        open
                    ));
                }
                if message
                    .content
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. }))
                {
                    return Err("user messages cannot carry tool blocks".to_string());
                }
            }
            Role::Assistant => {
                if let Some(open) = open.first() {
                    return Err(format!(
                        "tool call {} is still unanswered when the assistant speaks again",
                        open
                    ));
                }
                let mut requested = HashSet::new();
                for block in &message.content {
                    match block {
                        ContentBlock::ToolUse { call_id, .. } => {
                            if self.seen.contains(call_id) || !requested.insert(call_id.as_str()) {
                                return Err(format!("duplicate tool call id {}", call_id));
                            }
                        }
                        ContentBlock::ToolResult { .. } => {
                            return Err("assistant messages cannot carry tool results".to_string());
                        }
                        _ => {}
                    }
                }
            }
            Role::Tool => {
                let mut waiting: Vec<&str> = open.iter().map(String::as_str).collect();
                for block in &message.content {
                    match block {
                        ContentBlock::ToolResult { call_id, .. } => {
                            match waiting.iter().position(|id| id == call_id) {
                                Some(pos) => {
                                    waiting.remove(pos);
                                }
                                None => {
                                    return Err(format!(
                                        "tool result {} does not answer an open tool call",
                                        call_id
                                    ));
                                }
                            }
                        }
                        ContentBlock::Text { .. } => {}
                        _ => return Err("tool messages may only carry tool results".to_string()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Record the effect of a message that passed `check`
    fn record(&mut self, message: &Message) {
        for block in &message.content {
            match block {
                ContentBlock::ToolUse { call_id, .. } => {
                    self.seen.insert(call_id.clone());
                    self.open.push(call_id.clone());
                }
                ContentBlock::ToolResult { call_id, .. } => {
                    self.open.retain(|id| id != call_id);
                }
                _ => {}
            }
        }
        self.last_index = Some(message.turn_index);
    }

    fn accept(&mut self, message: &Message) -> std::result::Result<(), String> {
        self.check(message, &self.open)?;
        self.record(message);
        Ok(())
    }

    /// Fail if any tool call is still waiting for its result
    fn finish(&self) -> std::result::Result<(), String> {
        match self.open.first() {
            Some(open) => Err(format!("tool call {} has no result", open)),
            None => Ok(()),
        }
    }
}

/// Ordered, append-only log of conversation turns
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    metadata: ConversationMetadata,
    messages: Vec<Message>,
    next_index: u64,
    tracker: PairingTracker,
}

impl ConversationStore {
    pub fn new(metadata: ConversationMetadata) -> Self {
        Self {
            metadata,
            ..Default::default()
        }
    }

    /// Append a single message, assigning its turn index
    pub fn append(&mut self, mut message: Message) -> Result<&Message> {
        message.turn_index = self.next_index;
        self.tracker.accept(&message).map_err(Error::InvalidHistory)?;

        self.next_index += 1;
        self.messages.push(message);
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// Append a tool round: the assistant message that requested the tools
    /// and the tool message answering every request. Either both land or
    /// neither does.
    pub fn append_round(&mut self, mut assistant: Message, mut results: Message) -> Result<()> {
        if assistant.role != Role::Assistant || results.role != Role::Tool {
            return Err(Error::InvalidHistory(
                "a round is an assistant message followed by a tool message".to_string(),
            ));
        }

        assistant.turn_index = self.next_index;
        results.turn_index = self.next_index + 1;

        self.tracker
            .check(&assistant, &self.tracker.open)
            .map_err(Error::InvalidHistory)?;
        let requested: Vec<String> = assistant.tool_uses().into_iter().map(|t| t.call_id).collect();
        self.tracker.check(&results, &requested).map_err(Error::InvalidHistory)?;
        let answered = results.tool_results_iter().count();
        if answered != requested.len() {
            return Err(Error::InvalidHistory(format!(
                "{} tool calls but {} results",
                requested.len(),
                answered
            )));
        }

        self.tracker.record(&assistant);
        self.tracker.record(&results);
        self.next_index += 2;
        self.messages.push(assistant);
        self.messages.push(results);
        Ok(())
    }

    /// Immutable copy of the whole conversation
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            metadata: self.metadata.clone(),
            messages: self.messages.clone(),
        }
    }

    /// Replace the in-memory state with `snapshot`
    ///
    /// The current state is left untouched when the snapshot is rejected.
    pub fn restore(&mut self, snapshot: ConversationSnapshot) -> Result<()> {
        let mut tracker = PairingTracker::default();
        for message in &snapshot.messages {
            tracker.accept(message).map_err(Error::CorruptSession)?;
        }
        tracker.finish().map_err(Error::CorruptSession)?;

        self.next_index = tracker.last_index.map(|i| i + 1).unwrap_or(0);
        self.tracker = tracker;
        self.metadata = snapshot.metadata;
        self.messages = snapshot.messages;
        Ok(())
    }

    /// Drop all messages, keeping the metadata
    pub fn clear(&mut self) {
        self.messages.clear();
        self.next_index = 0;
        self.tracker = PairingTracker::default();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn metadata(&self) -> &ConversationMetadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: ConversationMetadata) {
        self.metadata = metadata;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user turns
    pub fn user_turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// Every tool call id requested so far
    pub fn call_ids(&self) -> impl Iterator<Item = &str> {
        self.tracker.seen.iter().map(|s| s.as_str())
    }

    /// Whether `call_id` has already been used in this conversation
    pub fn has_call_id(&self, call_id: &str) -> bool {
        self.tracker.seen.contains(call_id)
    }
}
