//! Configuration management for Parley
//!
//! Handles loading, saving, and managing application configuration
//! including API keys and model settings. The file lives at
//! `<config dir>/parley/config.toml`; every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationMetadata;
use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_THINKING_BUDGET: u32 = 16_000;
/// Smallest thinking budget the API accepts
pub const MIN_THINKING_BUDGET: u32 = 1024;
/// Tokens kept free for the visible answer when thinking is on
const THINKING_HEADROOM: u32 = 100;

/// Models offered by `model` in the CLI
pub const MODELS: &[&str] = &[
    "claude-3-7-sonnet-20250219",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
];

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model API settings
    #[serde(default)]
    pub model: ModelConfig,
    /// Extended thinking settings
    #[serde(default)]
    pub thinking: ThinkingConfig,
    /// Tool use settings
    #[serde(default)]
    pub tools: ToolsConfig,
    /// History windowing settings
    #[serde(default)]
    pub history: HistoryConfig,
    /// Brave Search settings
    #[serde(default)]
    pub web_search: WebSearchConfig,
    /// System prompt sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Config {
    /// Build the per-session settings from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.model.name.clone(),
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            thinking_enabled: self.thinking.enabled,
            thinking_budget: self.thinking.budget.max(MIN_THINKING_BUDGET),
            tools_enabled: self.tools.enabled,
            extended_output: self.model.extended_output,
        }
    }
}

/// Model API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model to use
    pub name: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens in a response
    pub max_tokens: u32,
    /// API key (can be loaded from env)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable name for API key
    pub api_key_env: String,
    /// Base URL for the API (optional, for proxies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Request the 128k output beta
    pub extended_output: bool,
    /// Timeout for a single model request (seconds)
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            api_key: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            extended_output: false,
            timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    /// Get the API key, checking the environment variable if not set directly
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Extended thinking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkingConfig {
    pub enabled: bool,
    /// Token budget for reasoning
    pub budget: u32,
    /// Show the model's reasoning in the terminal
    pub show: bool,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget: DEFAULT_THINKING_BUDGET,
            show: true,
        }
    }
}

/// Tool use configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: bool,
    /// Tool rounds allowed per user turn
    pub max_iterations: usize,
    /// Timeout for a single tool call (seconds)
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 10,
            timeout_secs: 60,
        }
    }
}

/// History windowing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Token budget for the history sent with each request
    pub token_budget: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { token_budget: 150_000 }
    }
}

/// Brave Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_env: String,
    /// Results returned when the model does not ask for a count
    pub max_results: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "BRAVE_API_KEY".to_string(),
            max_results: 5,
        }
    }
}

impl WebSearchConfig {
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Settings a turn runs with
///
/// Read once when a turn starts; changes made between turns apply to the
/// next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub thinking_enabled: bool,
    pub thinking_budget: u32,
    pub tools_enabled: bool,
    pub extended_output: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session_config()
    }
}

impl SessionConfig {
    /// Thinking budget to put on the wire, if thinking applies to this request
    ///
    /// The budget must stay below `max_tokens`; when `max_tokens` leaves no
    /// room for the minimum budget, thinking is skipped.
    pub fn effective_thinking_budget(&self) -> Option<u32> {
        if !self.thinking_enabled {
            return None;
        }
        let ceiling = self.max_tokens.saturating_sub(THINKING_HEADROOM);
        let budget = self.thinking_budget.max(MIN_THINKING_BUDGET).min(ceiling);
        (budget >= MIN_THINKING_BUDGET).then_some(budget)
    }

    /// Temperature to put on the wire; thinking requires 1.0
    pub fn effective_temperature(&self) -> f32 {
        if self.effective_thinking_budget().is_some() {
            1.0
        } else {
            self.temperature
        }
    }

    /// Metadata recorded with the conversation
    pub fn metadata(&self) -> ConversationMetadata {
        ConversationMetadata {
            model_name: self.model.clone(),
            thinking_enabled: self.thinking_enabled,
            thinking_budget: self.thinking_budget,
            tool_use_enabled: self.tools_enabled,
        }
    }

    /// Adopt the settings recorded with a restored conversation
    pub fn apply_metadata(&mut self, metadata: &ConversationMetadata) {
        self.model = metadata.model_name.clone();
        self.thinking_enabled = metadata.thinking_enabled;
        self.thinking_budget = metadata.thinking_budget.max(MIN_THINKING_BUDGET);
        self.tools_enabled = metadata.tool_use_enabled;
    }
}

/// Configuration manager for loading and saving config
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Config::default()
        };

        Ok(Self { config_path, config })
    }

    /// Get the default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("parley").join("config.toml"))
    }

    fn load_from_path(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Copy the session toggles back into the persisted configuration
    pub fn update_from_session(&mut self, session: &SessionConfig) {
        let config = &mut self.config;
        config.model.name = session.model.clone();
        config.model.extended_output = session.extended_output;
        config.thinking.enabled = session.thinking_enabled;
        config.thinking.budget = session.thinking_budget;
        config.tools.enabled = session.tools_enabled;
    }

    pub fn has_api_key(&self) -> bool {
        self.config.model.get_api_key().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, DEFAULT_MODEL);
        assert_eq!(config.model.max_tokens, 4000);
        assert!(config.thinking.enabled);
        assert_eq!(config.thinking.budget, 16_000);
        assert_eq!(config.tools.max_iterations, 10);
        assert_eq!(config.web_search.api_key_env, "BRAVE_API_KEY");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [model]
            name = "claude-3-5-haiku-20241022"

            [tools]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(parsed.model.name, "claude-3-5-haiku-20241022");
        assert_eq!(parsed.model.temperature, 0.7);
        assert!(!parsed.tools.enabled);
        assert_eq!(parsed.tools.max_iterations, 10);
        assert!(parsed.thinking.enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[thinking]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.name, config.model.name);
        assert_eq!(parsed.history.token_budget, config.history.token_budget);
    }

    #[test]
    fn test_thinking_budget_clamped_below_max_tokens() {
        let session = SessionConfig {
            max_tokens: 4000,
            thinking_budget: 16_000,
            ..SessionConfig::default()
        };
        assert_eq!(session.effective_thinking_budget(), Some(3900));
        assert_eq!(session.effective_temperature(), 1.0);
    }

    #[test]
    fn test_thinking_skipped_when_no_room() {
        let session = SessionConfig {
            max_tokens: 1000,
            ..SessionConfig::default()
        };
        assert_eq!(session.effective_thinking_budget(), None);
        assert_eq!(session.effective_temperature(), 0.7);
    }

    #[test]
    fn test_thinking_disabled_uses_temperature() {
        let session = SessionConfig {
            thinking_enabled: false,
            temperature: 0.2,
            ..SessionConfig::default()
        };
        assert_eq!(session.effective_thinking_budget(), None);
        assert_eq!(session.effective_temperature(), 0.2);
    }

    #[test]
    fn test_session_config_minimum_budget() {
        let mut config = Config::default();
        config.thinking.budget = 10;
        assert_eq!(config.session_config().thinking_budget, MIN_THINKING_BUDGET);
    }

    #[test]
    fn test_manager_save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut manager = ConfigManager::with_path(path.clone()).unwrap();
        let mut session = manager.config().session_config();
        session.tools_enabled = false;
        session.model = "claude-3-5-haiku-20241022".into();
        manager.update_from_session(&session);
        manager.save().unwrap();

        let reloaded = ConfigManager::with_path(path).unwrap();
        assert!(!reloaded.config().tools.enabled);
        assert_eq!(reloaded.config().model.name, "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_api_key_from_env() {
        let config = ModelConfig {
            api_key_env: "PARLEY_TEST_API_KEY_12345".to_string(),
            ..ModelConfig::default()
        };

        // SAFETY: test-local variable name, not read by other tests
        unsafe { std::env::set_var("PARLEY_TEST_API_KEY_12345", "test-key") };
        assert_eq!(config.get_api_key(), Some("test-key".to_string()));
        unsafe { std::env::remove_var("PARLEY_TEST_API_KEY_12345") };
    }
}
