//! Tool registry and dispatch
//!
//! The registry owns the tool specs and is the only place a tool handler is
//! invoked. Handler failures of any kind (errors, timeouts, panics) come back
//! as an error [`ToolResult`] rather than an `Err`, so a misbehaving provider
//! cannot take the conversation down.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::web::WebSearch;
use super::{Tool, ToolDefinition};
use crate::config::Config;
use crate::conversation::ToolResult;
use crate::error::{Error, Result, ToolError};

/// Maximum size for a single tool result in characters
/// ~30k chars ≈ ~10k tokens, leaving room for conversation history
pub const MAX_TOOL_RESULT_SIZE: usize = 30_000;

struct RegisteredTool {
    /// Captured at registration; never changes afterwards
    definition: ToolDefinition,
    tool: Arc<dyn Tool>,
}

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    /// Call ids already handed to a handler
    dispatched: Mutex<HashSet<String>>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every handler invocation by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a tool; names must be unique
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let definition = tool.to_definition();
        if self.index.contains_key(&definition.name) {
            return Err(Error::DuplicateTool(definition.name));
        }

        debug!(tool = %definition.name, "Registered tool");
        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { definition, tool });
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].tool.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All specs, in registration order
    pub fn list_specs(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.definition.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether `name` exists and allows concurrent calls
    pub fn is_concurrency_safe(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.concurrency_safe())
    }

    /// Record call ids that were dispatched before (e.g. in a restored session)
    pub fn mark_dispatched<'a>(&self, call_ids: impl IntoIterator<Item = &'a str>) {
        let mut dispatched = self.dispatched.lock();
        dispatched.extend(call_ids.into_iter().map(String::from));
    }

    /// Forget the dispatch history (when the conversation is cleared)
    pub fn reset_dispatched(&self) {
        self.dispatched.lock().clear();
    }

    /// Invoke the handler for `tool_name`
    ///
    /// Fails only when the tool does not exist or `call_id` was already
    /// dispatched; each call id reaches a handler at most once.
    pub async fn dispatch(&self, call_id: &str, tool_name: &str, arguments: Value) -> Result<ToolResult> {
        let tool = self
            .get(tool_name)
            .ok_or_else(|| Error::UnknownTool(tool_name.to_string()))?;

        if !self.dispatched.lock().insert(call_id.to_string()) {
            return Err(Error::AlreadyDispatched(call_id.to_string()));
        }

        debug!(call_id, tool = tool_name, "Dispatching tool call");
        let started = Instant::now();

        let execution = AssertUnwindSafe(tool.execute(arguments)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(ToolError::ExecutionFailed(format!(
                    "{} timed out after {} seconds",
                    tool_name,
                    limit.as_secs()
                )))),
            },
            None => execution.await,
        };

        let result = match outcome {
            Ok(Ok(output)) if output.success => {
                ToolResult::success(call_id, truncate_tool_result(output.render()))
            }
            Ok(Ok(output)) => ToolResult::error(call_id, output.render()),
            Ok(Err(e)) => ToolResult::error(call_id, e.to_string()),
            Err(_) => ToolResult::error(call_id, format!("{} panicked", tool_name)),
        };

        if result.is_error {
            warn!(call_id, tool = tool_name, error = %result.output, "Tool call failed");
        } else {
            debug!(
                call_id,
                tool = tool_name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tool call completed"
            );
        }

        Ok(result)
    }
}

/// Cut oversized output on a char boundary and say so
fn truncate_tool_result(output: String) -> String {
    if output.len() <= MAX_TOOL_RESULT_SIZE {
        return output;
    }
    let mut end = MAX_TOOL_RESULT_SIZE;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n\n[Output truncated: {} of {} characters shown]",
        &output[..end],
        end,
        output.len()
    )
}

/// Builder for the standard tool registry
pub struct ToolRegistryBuilder {
    config: Config,
    include_web: bool,
    extra: Vec<Arc<dyn Tool>>,
}

impl ToolRegistryBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            include_web: true,
            extra: Vec::new(),
        }
    }

    /// Enable/disable the web search provider
    pub fn with_web(mut self, enabled: bool) -> Self {
        self.include_web = enabled;
        self
    }

    /// Register an additional provider (mail, storage, ...)
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra.push(tool);
        self
    }

    pub fn build(self) -> Result<ToolRegistry> {
        let timeout = Duration::from_secs(self.config.tools.timeout_secs);
        let mut registry = ToolRegistry::new().with_timeout(timeout);

        if self.include_web {
            registry.register(Arc::new(WebSearch::with_config(self.config.web_search.clone())))?;
        }
        for tool in self.extra {
            registry.register(tool)?;
        }

        Ok(registry)
    }
}
