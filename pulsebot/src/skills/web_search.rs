//! Web search skill with interchangeable backends.
//!
//! `web_search(query, count)` returns `[{title, url, description}]` whatever
//! the backend: Brave's hosted API or a self-hosted SearXNG instance.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{Skill, ToolDefinition, ToolResult};

pub const TOOL_WEB_SEARCH: &str = "web_search";

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

pub enum SearchBackend {
    Brave { api_key: String },
    Searxng { url: String },
}

pub struct WebSearchSkill {
    http: reqwest::Client,
    backend: SearchBackend,
}

impl WebSearchSkill {
    pub fn new(backend: SearchBackend) -> Self {
        Self {
            http: reqwest::Client::new(),
            backend,
        }
    }

    async fn search(&self, query: &str, count: usize) -> ToolResult {
        let count = count.clamp(1, 10);
        debug!(query, count, "web search");
        match &self.backend {
            SearchBackend::Brave { api_key } => self.search_brave(query, count, api_key).await,
            SearchBackend::Searxng { url } => self.search_searxng(query, count, url).await,
        }
    }

    async fn search_brave(&self, query: &str, count: usize, api_key: &str) -> ToolResult {
        let response = self
            .http
            .get(BRAVE_ENDPOINT)
            .query(&[("q", query), ("count", &count.to_string())])
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .send()
            .await;
        let body: Value = match response {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(body) => body,
                Err(e) => return ToolResult::fail(format!("brave response: {e}")),
            },
            Ok(resp) => return ToolResult::fail(format!("brave search: HTTP {}", resp.status())),
            Err(e) => return ToolResult::fail(format!("brave search: {e}")),
        };

        let results = body["web"]["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(count)
                    .map(|r| {
                        json!({
                            "title": r["title"].as_str().unwrap_or(""),
                            "url": r["url"].as_str().unwrap_or(""),
                            "description": r["description"].as_str().unwrap_or(""),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        ToolResult::ok(json!({"query": query, "results": results}))
    }

    async fn search_searxng(&self, query: &str, count: usize, base_url: &str) -> ToolResult {
        let url = format!("{}/search", base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await;
        let body: Value = match response {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(body) => body,
                Err(e) => return ToolResult::fail(format!("searxng response: {e}")),
            },
            Ok(resp) => return ToolResult::fail(format!("searxng: HTTP {}", resp.status())),
            Err(e) => return ToolResult::fail(format!("searxng: {e}")),
        };

        let results = body["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(count)
                    .map(|r| {
                        json!({
                            "title": r["title"].as_str().unwrap_or(""),
                            "url": r["url"].as_str().unwrap_or(""),
                            "description": r["content"].as_str().unwrap_or(""),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        ToolResult::ok(json!({"query": query, "results": results}))
    }
}

#[async_trait]
impl Skill for WebSearchSkill {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web"
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: TOOL_WEB_SEARCH.to_string(),
            description: "Search the web and return result titles, URLs, and descriptions."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "count": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 10,
                        "default": 5
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }]
    }

    async fn execute(&self, _tool_name: &str, arguments: &Value) -> ToolResult {
        let Some(query) = arguments.get("query").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'query' argument");
        };
        let count = arguments
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(5) as usize;
        self.search(query, count).await
    }
}
