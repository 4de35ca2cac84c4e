use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::tools::Capability;

pub const PAPER_SEARCH_TOOL: &str = "arxiv_search_papers";
const DEFAULT_PAPER_RESULTS: usize = 5;
const SUMMARY_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Relevance,
    Submitted,
    LastUpdated,
}

impl SortOrder {
    /// Lenient parse; anything unrecognised sorts by relevance.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => SortOrder::Submitted,
            "last_updated" => SortOrder::LastUpdated,
            _ => SortOrder::Relevance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub title: String,
    pub authors: Vec<String>,
    pub published_date: Option<NaiveDate>,
    pub link: String,
    #[serde(default)]
    pub summary: String,
}

/// Literature (arXiv-style) search backend.
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    async fn search_papers(
        &self,
        query: &str,
        max_results: usize,
        sort: SortOrder,
    ) -> Result<Vec<Paper>>;
}

#[derive(Debug, Deserialize)]
struct PaperSearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    sort: Option<String>,
}

pub struct PaperSearchCapability {
    backend: Arc<dyn LiteratureSearch>,
}

impl PaperSearchCapability {
    pub fn new(backend: Arc<dyn LiteratureSearch>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Capability for PaperSearchCapability {
    fn name(&self) -> &str {
        PAPER_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search arXiv. Returns a JSON list of papers with title, authors, published_date, link and summary."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "default": DEFAULT_PAPER_RESULTS},
                "sort": {
                    "type": "string",
                    "enum": ["relevance", "submitted", "last_updated"],
                    "default": "relevance"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: PaperSearchArgs =
            serde_json::from_value(arguments).context("invalid arxiv_search_papers arguments")?;
        let max_results = args.max_results.unwrap_or(DEFAULT_PAPER_RESULTS).max(1);
        let sort = args
            .sort
            .as_deref()
            .map(SortOrder::parse)
            .unwrap_or_default();

        let mut papers = self
            .backend
            .search_papers(&args.query, max_results, sort)
            .await?;
        papers.truncate(max_results);
        for paper in papers.iter_mut() {
            paper.summary = truncate_chars(&paper.summary, SUMMARY_CHARS);
        }

        debug!(query = %args.query, papers = papers.len(), ?sort, "paper search complete");
        Ok(serde_json::to_string(&papers)?)
    }
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
