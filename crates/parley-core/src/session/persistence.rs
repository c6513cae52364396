//! Conversation persistence - save and load conversations
//!
//! Conversations are stored as pretty JSON, one file per name, under
//! `<data dir>/parley/conversations`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::conversation::ConversationSnapshot;
use crate::error::{Error, Result};

/// Saved conversation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedConversation {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub snapshot: ConversationSnapshot,
}

/// One line of `list`
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub name: String,
    pub model: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Get the conversations directory path
pub fn conversations_dir() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .map(|p| p.join("parley"))
        .unwrap_or_else(|| PathBuf::from(".parley"));
    Ok(base.join("conversations"))
}

/// File-system safe form of a conversation name
pub fn sanitize_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() {
        return Err(Error::Config(format!("Invalid conversation name: {:?}", name)));
    }
    Ok(cleaned)
}

fn path_for(dir: &Path, name: &str) -> Result<PathBuf> {
    Ok(dir.join(format!("{}.json", sanitize_name(name)?)))
}

/// Write `saved` into `dir`, replacing any file with the same name
pub fn save_in(dir: &Path, saved: &SavedConversation) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = path_for(dir, &saved.name)?;
    let json = serde_json::to_string_pretty(saved)?;
    std::fs::write(&path, json)?;
    debug!(path = %path.display(), messages = saved.snapshot.messages.len(), "Saved conversation");
    Ok(path)
}

/// Read the conversation called `name` from `dir`
///
/// The file is parsed only; pairing checks happen when the snapshot is
/// restored into a store.
pub fn load_from(dir: &Path, name: &str) -> Result<SavedConversation> {
    let path = path_for(dir, name)?;
    if !path.exists() {
        return Err(Error::SessionNotFound(name.to_string()));
    }

    let json = std::fs::read_to_string(&path)?;
    serde_json::from_str(&json).map_err(|e| Error::CorruptSession(format!("{}: {}", path.display(), e)))
}

/// List saved conversations in `dir`, most recent first
pub fn list_in(dir: &Path) -> Result<Vec<ConversationSummary>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut conversations = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.extension().is_some_and(|ext| ext == "json") {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<SavedConversation>(&json) {
                Ok(saved) => conversations.push(ConversationSummary {
                    name: saved.name,
                    model: saved.snapshot.metadata.model_name,
                    message_count: saved.snapshot.messages.len(),
                    updated_at: saved.updated_at,
                    path,
                }),
                Err(e) => warn!("Failed to parse conversation {:?}: {}", path, e),
            },
            Err(e) => warn!("Failed to read conversation {:?}: {}", path, e),
        }
    }

    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(conversations)
}

pub fn save(saved: &SavedConversation) -> Result<PathBuf> {
    save_in(&conversations_dir()?, saved)
}

pub fn load(name: &str) -> Result<SavedConversation> {
    load_from(&conversations_dir()?, name)
}

pub fn list() -> Result<Vec<ConversationSummary>> {
    list_in(&conversations_dir()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my chat").unwrap(), "my_chat");
        assert_eq!(sanitize_name("../etc/passwd").unwrap(), "etc_passwd");
        assert_eq!(sanitize_name("trip-2024_v2").unwrap(), "trip-2024_v2");
        assert!(sanitize_name("  ").is_err());
        assert!(sanitize_name("///").is_err());
    }
}
