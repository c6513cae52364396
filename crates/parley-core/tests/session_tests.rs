//! Session and persistence integration tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::config::Config;
use parley_core::error::{Error, GatewayError};
use parley_core::gateway::{ModelGateway, ModelRequest, ModelResponse, StopReason, Usage};
use parley_core::session::persistence;
use parley_core::tools::{FnTool, ToolOutput, ToolRegistry};
use parley_core::{CancellationToken, ChatSession, ContentBlock};
use serde_json::json;
use tempfile::TempDir;

struct ScriptedGateway {
    script: Mutex<VecDeque<ModelResponse>>,
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse, GatewayError> {
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| GatewayError::Server {
                status: 500,
                message: "script exhausted".into(),
            })
    }
}

fn reply(content: Vec<ContentBlock>) -> ModelResponse {
    let stop_reason = if content.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })) {
        StopReason::ToolUse
    } else {
        StopReason::EndTurn
    };
    ModelResponse {
        content,
        stop_reason: Some(stop_reason),
        usage: Usage {
            input_tokens: 100,
            output_tokens: 20,
        },
    }
}

fn session(script: Vec<ModelResponse>) -> ChatSession {
    session_with(&Config::default(), script)
}

fn session_with(config: &Config, script: Vec<ModelResponse>) -> ChatSession {
    let gateway = Arc::new(ScriptedGateway {
        script: Mutex::new(script.into()),
    });
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(FnTool::new("search_web", "Search", json!({}), |_| async {
            Ok(ToolOutput::success("result"))
        })))
        .unwrap();
    ChatSession::with_gateway(config, gateway, registry)
}

/// A session that has completed one tool-using turn
async fn used_session() -> ChatSession {
    let mut session = session(vec![
        reply(vec![ContentBlock::tool_use("t1", "search_web", json!({"query": "rust"}))]),
        reply(vec![ContentBlock::text("Rust is a language.")]),
    ]);
    session.send("what is rust", &CancellationToken::new()).await.unwrap();
    session
}

mod chat_session_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_accumulates_usage() {
        let session = used_session().await;
        assert_eq!(session.usage().input_tokens, 200);
        assert_eq!(session.usage().output_tokens, 40);

        let status = session.status();
        assert_eq!(status.messages, 4);
        assert_eq!(status.user_turns, 1);
        assert_eq!(status.tools, vec!["search_web"]);
        assert_eq!(status.context_limit, 200_000);
        assert!(status.history_tokens > 0);
    }

    #[tokio::test]
    async fn test_toggles_update_metadata() {
        let mut session = session(Vec::new());
        session.set_tools_enabled(false);
        session.set_thinking_enabled(false);
        assert_eq!(session.set_thinking_budget(10), 1024);
        session.set_model("claude-3-5-haiku-20241022");

        let metadata = session.snapshot().metadata;
        assert!(!metadata.tool_use_enabled);
        assert!(!metadata.thinking_enabled);
        assert_eq!(metadata.thinking_budget, 1024);
        assert_eq!(metadata.model_name, "claude-3-5-haiku-20241022");
    }

    #[tokio::test]
    async fn test_clear_keeps_settings() {
        let mut session = used_session().await;
        session.set_tools_enabled(false);
        session.clear();

        assert!(session.store().is_empty());
        assert!(!session.config().tools_enabled);
        // call ids may be reused after a clear
        assert!(session.engine().registry().dispatch("t1", "search_web", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_history() {
        let mut session = used_session().await;
        let mut config = Config::default();
        config.model.api_key = Some("sk-ant-test".into());
        session.reconfigure(&config).unwrap();

        assert_eq!(session.store().len(), 4);
        assert!(session.engine().registry().contains("search_web"));
        let err = session
            .engine()
            .registry()
            .dispatch("t1", "search_web", json!({"query": "rust"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyDispatched(_)));
    }

    #[tokio::test]
    async fn test_failed_turn_still_counts_usage() {
        let mut config = Config::default();
        config.tools.max_iterations = 1;
        let mut session = session_with(
            &config,
            vec![
                reply(vec![ContentBlock::tool_use("t1", "search_web", json!({"query": "a"}))]),
                reply(vec![ContentBlock::tool_use("t2", "search_web", json!({"query": "b"}))]),
            ],
        );

        let err = session.send("dig deeper", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::ToolLoopExceeded { limit: 1 }));
        assert_eq!(
            session.usage(),
            Usage {
                input_tokens: 200,
                output_tokens: 40,
            }
        );
        assert_eq!(session.status().usage, session.usage());

        // the next turn adds to the same total
        let err = session.send("again", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));
        assert_eq!(session.usage().input_tokens, 200);
    }

    #[tokio::test]
    async fn test_failed_turn_is_resumable() {
        let mut session = session(vec![]);
        let err = session.send("hello", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Gateway(GatewayError::Server { .. })));
        assert!(err.is_turn_fatal());
        assert_eq!(session.store().len(), 1);
    }
}

mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut original = used_session().await;
        original.set_thinking_budget(4096);
        let path = original.save_in(dir.path(), Some("rust chat")).unwrap();
        assert!(path.ends_with("rust_chat.json"));
        assert_eq!(original.name(), Some("rust_chat"));

        let mut loaded = session(Vec::new());
        loaded.set_thinking_budget(2048);
        loaded.load_from(dir.path(), "rust chat").unwrap();

        assert_eq!(loaded.id(), original.id());
        assert_eq!(loaded.store().messages(), original.store().messages());
        assert_eq!(loaded.config().thinking_budget, 4096);

        // restored call ids are never dispatched again
        let err = loaded
            .engine()
            .registry()
            .dispatch("t1", "search_web", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyDispatched(_)));
    }

    #[tokio::test]
    async fn test_save_reuses_name() {
        let dir = TempDir::new().unwrap();
        let mut session = used_session().await;
        session.save_in(dir.path(), Some("notes")).unwrap();
        session.save_in(dir.path(), None).unwrap();

        let listed = persistence::list_in(dir.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "notes");
        assert_eq!(listed[0].message_count, 4);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let mut first = used_session().await;
        first.save_in(dir.path(), Some("older")).unwrap();
        let mut second = used_session().await;
        second.save_in(dir.path(), Some("newer")).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let listed = persistence::list_in(dir.path()).unwrap();
        let names: Vec<&str> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["newer", "older"]);
        assert_eq!(listed[0].model, Config::default().model.name);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let listed = persistence::list_in(&dir.path().join("nope")).unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        let mut session = session(Vec::new());
        let err = session.load_from(dir.path(), "ghost").unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_corrupt_file_keeps_current_conversation() {
        let dir = TempDir::new().unwrap();
        let mut saved = used_session().await;
        let path = saved.save_in(dir.path(), Some("broken")).unwrap();

        // drop the tool results so the pairing check fails on restore
        let mut value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["messages"].as_array_mut().unwrap().remove(2);
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let mut current = used_session().await;
        let before = current.snapshot();
        let err = current.load_from(dir.path(), "broken").unwrap_err();

        assert!(matches!(err, Error::CorruptSession(_)));
        assert_eq!(current.snapshot(), before);
    }

    #[tokio::test]
    async fn test_unparseable_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("junk.json"), "[1, 2, 3]").unwrap();

        let mut session = session(Vec::new());
        let err = session.load_from(dir.path(), "junk").unwrap_err();
        assert!(matches!(err, Error::CorruptSession(_)));
    }
}
