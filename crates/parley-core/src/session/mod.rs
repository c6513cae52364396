//! Chat session
//!
//! A [`ChatSession`] owns one conversation and everything needed to drive
//! it: the session settings, the store and the engine. The CLI holds one
//! session at a time and calls into it for every command.
//!
//! Persistence and `send` both take `&mut self`, so a save or load can
//! never overlap a running turn.

pub mod persistence;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, SessionConfig, MIN_THINKING_BUDGET};
use crate::context::{context_limit, TokenCounter};
use crate::conversation::{ConversationSnapshot, ConversationStore};
use crate::engine::{EngineOptions, OrchestrationEngine, TurnOutcome};
use crate::error::Result;
use crate::gateway::{AnthropicGateway, ModelGateway, Usage};
use crate::tools::{ToolRegistry, ToolRegistryBuilder};

pub use persistence::{ConversationSummary, SavedConversation};

/// Point-in-time view of a session for `status`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub id: String,
    pub name: Option<String>,
    pub config: SessionConfig,
    pub messages: usize,
    pub user_turns: usize,
    pub tools: Vec<String>,
    /// Tokens used by the whole session
    pub usage: Usage,
    /// Estimated size of the stored history
    pub history_tokens: usize,
    pub context_limit: usize,
}

/// One conversation and the machinery that drives it
pub struct ChatSession {
    id: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    config: SessionConfig,
    store: ConversationStore,
    engine: OrchestrationEngine,
    usage: Usage,
}

impl ChatSession {
    pub fn new(config: SessionConfig, engine: OrchestrationEngine) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: None,
            created_at: Utc::now(),
            store: ConversationStore::new(config.metadata()),
            config,
            engine,
            usage: Usage::default(),
        }
    }

    /// Build a session against the Anthropic API from application config
    pub fn from_config(config: &Config) -> Result<Self> {
        let gateway: Arc<dyn ModelGateway> = Arc::new(AnthropicGateway::from_config(&config.model)?);
        let registry = ToolRegistryBuilder::new(config.clone()).build()?;
        Ok(Self::with_gateway(config, gateway, registry))
    }

    /// Build a session around an existing gateway and registry
    pub fn with_gateway(config: &Config, gateway: Arc<dyn ModelGateway>, registry: ToolRegistry) -> Self {
        let engine =
            OrchestrationEngine::new(gateway, Arc::new(registry)).with_options(EngineOptions::from_config(config));
        Self::new(config.session_config(), engine)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn engine(&self) -> &OrchestrationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut OrchestrationEngine {
        &mut self.engine
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Run one user turn
    ///
    /// Usage counts every response received, also when the turn fails.
    pub async fn send(&mut self, input: &str, cancel: &CancellationToken) -> Result<TurnOutcome> {
        let result = self.engine.run_turn(&mut self.store, &self.config, input, cancel).await;
        self.usage.add(self.engine.take_usage());
        result
    }

    fn sync_metadata(&mut self) {
        self.store.set_metadata(self.config.metadata());
    }

    pub fn set_tools_enabled(&mut self, enabled: bool) {
        self.config.tools_enabled = enabled;
        self.sync_metadata();
    }

    pub fn set_thinking_enabled(&mut self, enabled: bool) {
        self.config.thinking_enabled = enabled;
        self.sync_metadata();
    }

    /// Set the reasoning budget; values below the API minimum are raised to it
    pub fn set_thinking_budget(&mut self, budget: u32) -> u32 {
        self.config.thinking_budget = budget.max(MIN_THINKING_BUDGET);
        self.sync_metadata();
        self.config.thinking_budget
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
        self.sync_metadata();
    }

    pub fn set_extended_output(&mut self, enabled: bool) {
        self.config.extended_output = enabled;
    }

    /// Rebuild the gateway and tools from `config`, keeping the conversation
    ///
    /// Used after API keys change. Call ids already in the history stay
    /// marked as dispatched in the new registry.
    pub fn reconfigure(&mut self, config: &Config) -> Result<()> {
        let gateway: Arc<dyn ModelGateway> = Arc::new(AnthropicGateway::from_config(&config.model)?);
        let registry = ToolRegistryBuilder::new(config.clone()).build()?;
        registry.mark_dispatched(self.store.call_ids());
        self.engine.replace_backends(gateway, Arc::new(registry));
        self.engine.options_mut().system_prompt = config.system_prompt.clone();
        info!(session = %self.id, "Session reconfigured");
        Ok(())
    }

    /// Start over, keeping the settings
    pub fn clear(&mut self) {
        self.store.clear();
        self.engine.registry().reset_dispatched();
        info!(session = %self.id, "Conversation cleared");
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.store.snapshot()
    }

    /// Replace the conversation with `snapshot` and adopt its settings
    pub fn restore(&mut self, snapshot: ConversationSnapshot) -> Result<()> {
        self.store.restore(snapshot)?;
        self.config.apply_metadata(self.store.metadata());

        let registry = self.engine.registry();
        registry.reset_dispatched();
        registry.mark_dispatched(self.store.call_ids());
        Ok(())
    }

    /// Save under `name` (or the current name, or a timestamp) in `dir`
    pub fn save_in(&mut self, dir: &Path, name: Option<&str>) -> Result<PathBuf> {
        let name = name
            .map(String::from)
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("conversation_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        let name = persistence::sanitize_name(&name)?;

        let saved = SavedConversation {
            id: self.id.clone(),
            name: name.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            snapshot: self.snapshot(),
        };
        let path = persistence::save_in(dir, &saved)?;
        self.name = Some(name);
        Ok(path)
    }

    pub fn save(&mut self, name: Option<&str>) -> Result<PathBuf> {
        self.save_in(&persistence::conversations_dir()?, name)
    }

    /// Load the conversation called `name` from `dir`
    ///
    /// On failure the current conversation is kept.
    pub fn load_from(&mut self, dir: &Path, name: &str) -> Result<()> {
        let saved = persistence::load_from(dir, name)?;
        self.restore(saved.snapshot)?;
        self.id = saved.id;
        self.name = Some(saved.name);
        self.created_at = saved.created_at;
        info!(session = %self.id, messages = self.store.len(), "Conversation loaded");
        Ok(())
    }

    pub fn load(&mut self, name: &str) -> Result<()> {
        self.load_from(&persistence::conversations_dir()?, name)
    }

    pub fn status(&self) -> SessionStatus {
        let counter = TokenCounter::new();
        SessionStatus {
            id: self.id.clone(),
            name: self.name.clone(),
            config: self.config.clone(),
            messages: self.store.len(),
            user_turns: self.store.user_turns(),
            tools: self.engine.registry().names().into_iter().map(String::from).collect(),
            usage: self.usage,
            history_tokens: counter.count_messages(self.store.messages()),
            context_limit: context_limit(&self.config.model),
        }
    }
}
