//! WebSearch tool - Search the web using the Brave Search API

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::WebSearchConfig;
use crate::error::ToolError;
use crate::gateway::sanitize_api_error;
use crate::tools::{BoxFuture, Tool, ToolOutput};

const BRAVE_WEB_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
/// Brave caps `count` at 20
const MAX_COUNT: u64 = 20;
/// Brave pages past 9 are rejected
const MAX_OFFSET: u64 = 9;

/// Search result from web search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

/// Tool for searching the web using Brave Search
pub struct WebSearch {
    config: WebSearchConfig,
}

impl WebSearch {
    pub fn new() -> Self {
        Self {
            config: WebSearchConfig::default(),
        }
    }

    pub fn with_config(config: WebSearchConfig) -> Self {
        Self { config }
    }

    /// Default number of results when the caller does not ask for a count
    pub fn default_count(&self) -> u64 {
        self.config.max_results as u64
    }

    /// Run a query; `count` is clamped to 1..=20 and `offset` (in pages) to 0..=9
    pub async fn search(&self, query: &str, count: u64, offset: u64) -> Result<Vec<SearchResult>, ToolError> {
        let count = count.clamp(1, MAX_COUNT);
        let offset = offset.min(MAX_OFFSET);

        let api_key = self.config.get_api_key().ok_or_else(|| {
            ToolError::NotConfigured(format!(
                "Brave Search API key missing. Set {} or api_key in [web_search] config.",
                self.config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to create HTTP client: {}", e)))?;

        let response = client
            .get(BRAVE_WEB_SEARCH_URL)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", &count.to_string()), ("offset", &offset.to_string())])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Brave search failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed(error_message(status.as_u16(), &body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to parse Brave response: {}", e)))?;

        Ok(parse_results(&body, count as usize))
    }
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Describe a failed Brave response, keeping the reason the API gave
fn error_message(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["/error/detail", "/error/message", "/message"]
                .iter()
                .find_map(|p| v.pointer(p).and_then(|d| d.as_str()).map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string());

    if detail.is_empty() {
        format!("Brave Search error ({})", status)
    } else {
        format!("Brave Search error ({}): {}", status, sanitize_api_error(&detail))
    }
}

/// Pull `web.results` out of a Brave response
fn parse_results(body: &Value, limit: usize) -> Vec<SearchResult> {
    let field = |item: &Value, key: &str| item.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string();

    body.pointer("/web/results")
        .and_then(|r| r.as_array())
        .map(|items| {
            items
                .iter()
                .take(limit)
                .map(|item| SearchResult {
                    title: field(item, "title"),
                    url: field(item, "url"),
                    description: field(item, "description"),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl Tool for WebSearch {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web for information"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results to return (max 20)",
                    "default": 5
                },
                "offset": {
                    "type": "integer",
                    "description": "Page of results to skip to, for pagination (max 9)",
                    "default": 0
                }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let query = params["query"]
                .as_str()
                .filter(|q| !q.trim().is_empty())
                .ok_or_else(|| ToolError::InvalidParams("query is required".into()))?;

            let count = params
                .get("count")
                .and_then(|v| v.as_u64())
                .unwrap_or_else(|| self.default_count());
            let offset = params.get("offset").and_then(|v| v.as_u64()).unwrap_or(0);

            let results = self.search(query, count, offset).await?;
            let found = results.len();
            Ok(ToolOutput::success(json!({
                "query": query,
                "results": results,
                "count": found,
            })))
        })
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results() {
        let body = json!({
            "query": {"q": "rust"},
            "web": {
                "results": [
                    {"title": "Rust", "url": "https://rust-lang.org", "description": "A language"},
                    {"title": "Crates", "url": "https://crates.io"},
                    {"title": "Docs", "url": "https://docs.rs", "description": "Docs"}
                ]
            }
        });

        let results = parse_results(&body, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://rust-lang.org");
        assert_eq!(results[1].description, "");
    }

    #[test]
    fn test_parse_results_empty() {
        assert!(parse_results(&json!({}), 5).is_empty());
    }

    #[test]
    fn test_error_message_keeps_reason() {
        let body = r#"{"type":"ErrorResponse","error":{"code":"RATE_LIMITED","detail":"Request rate limit exceeded for plan.","status":429}}"#;
        assert_eq!(
            error_message(429, body),
            "Brave Search error (429): Request rate limit exceeded for plan."
        );
        assert_eq!(error_message(400, "bad query\n"), "Brave Search error (400): bad query");
        assert_eq!(error_message(502, ""), "Brave Search error (502)");

        let long = "x".repeat(1000);
        assert!(error_message(500, &long).chars().count() < 400);
    }

    #[test]
    fn test_schema_has_offset() {
        let schema = WebSearch::new().parameters_schema();
        assert_eq!(schema["properties"]["offset"]["type"], "integer");
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[tokio::test]
    async fn test_missing_query() {
        let tool = WebSearch::new();
        let err = tool.execute(json!({"count": 3})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let tool = WebSearch::with_config(WebSearchConfig {
            api_key: None,
            api_key_env: "PARLEY_TEST_UNSET_BRAVE_KEY".into(),
            max_results: 5,
        });
        let err = tool.execute(json!({"query": "rust"})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotConfigured(_)));
    }
}
