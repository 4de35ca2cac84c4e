use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::tools::Capability;

pub const WEB_SEARCH_TOOL: &str = "web_search";
const DEFAULT_WEB_RESULTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// General web search backend.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
}

/// Exposes a [`WebSearch`] backend as the `web_search` tool.
pub struct WebSearchCapability {
    backend: Arc<dyn WebSearch>,
}

impl WebSearchCapability {
    pub fn new(backend: Arc<dyn WebSearch>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Capability for WebSearchCapability {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search the web. Returns a JSON list of {title, snippet, url}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: WebSearchArgs =
            serde_json::from_value(arguments).context("invalid web_search arguments")?;
        let mut hits = self.backend.search(&args.query, DEFAULT_WEB_RESULTS).await?;
        hits.truncate(DEFAULT_WEB_RESULTS);
        debug!(query = %args.query, hits = hits.len(), "web search complete");
        Ok(serde_json::to_string(&hits)?)
    }
}
