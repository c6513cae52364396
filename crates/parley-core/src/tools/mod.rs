//! Tool system
//!
//! Tools are the capabilities the model can invoke. Each tool has:
//! - A name and description for the model
//! - A JSON schema for parameters
//! - An execute method
//!
//! Providers (mail, storage, search) implement [`Tool`] and are registered
//! into a [`ToolRegistry`] at startup.

mod registry;
pub mod web;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ToolError;

pub use registry::{ToolRegistry, ToolRegistryBuilder, MAX_TOOL_RESULT_SIZE};

/// Boxed future type for object-safe async trait methods
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Output from a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool succeeded
    pub success: bool,
    /// The output content (can be text, JSON, etc.)
    pub content: Value,
    /// Optional error message
    pub error: Option<String>,
    /// Metadata about the execution
    pub metadata: HashMap<String, Value>,
}

impl ToolOutput {
    pub fn success(content: impl Into<Value>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: Value::Null,
            error: Some(message.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Text handed back to the model
    pub fn render(&self) -> String {
        if !self.success {
            return self.error.clone().unwrap_or_else(|| "Tool failed".to_string());
        }
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Tool definition for model consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Core trait for all tools
pub trait Tool: Send + Sync {
    /// Tool name (used by the model to invoke)
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with given parameters
    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>>;

    /// Whether calls to this tool may run alongside other calls in the same
    /// round. Only tools without side effects other calls could observe
    /// should say yes.
    fn concurrency_safe(&self) -> bool {
        false
    }

    /// Convert to tool definition for the model
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type Handler = dyn Fn(Value) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync;

/// A tool backed by a closure
///
/// Handy for registering small providers without a dedicated type.
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    concurrency_safe: bool,
    handler: Arc<Handler>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, schema: Value, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let handler: Arc<Handler> = Arc::new(
            move |params| -> BoxFuture<'static, Result<ToolOutput, ToolError>> { Box::pin(handler(params)) },
        );
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            concurrency_safe: false,
            handler,
        }
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrency_safe = true;
        self
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        (self.handler)(params)
    }

    fn concurrency_safe(&self) -> bool {
        self.concurrency_safe
    }
}

/// Helper macro for creating tool parameter schemas
#[macro_export]
macro_rules! tool_params {
    ($($field:ident : $type:expr => $desc:expr),* $(,)?) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $( stringify!($field): { "type": $type, "description": $desc } ),*
            },
            "required": [ $( stringify!($field) ),* ]
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_string_and_json() {
        assert_eq!(ToolOutput::success("plain").render(), "plain");
        let rendered = ToolOutput::success(json!({"count": 2})).render();
        assert!(rendered.contains("\"count\": 2"));
        assert_eq!(ToolOutput::error("nope").render(), "nope");
    }

    #[test]
    fn test_tool_params_macro() {
        let schema = tool_params!(query: "string" => "The search query");
        assert_eq!(schema["required"][0], "query");
        assert_eq!(schema["properties"]["query"]["type"], "string");
    }

    #[tokio::test]
    async fn test_fn_tool() {
        let tool = FnTool::new("echo", "Echo input", json!({"type": "object"}), |params| async move {
            Ok(ToolOutput::success(params["text"].clone()))
        });

        assert_eq!(tool.to_definition().name, "echo");
        assert!(!tool.concurrency_safe());
        let out = tool.execute(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out.render(), "hi");
    }
}
