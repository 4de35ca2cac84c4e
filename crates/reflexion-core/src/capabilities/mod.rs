pub mod papers;
pub mod persist;
pub mod read;
pub mod search;

pub use papers::{LiteratureSearch, PAPER_SEARCH_TOOL, Paper, PaperSearchCapability, SortOrder};
pub use persist::{
    ArtifactStore, DynArtifactStore, FileArtifactStore, MemoryArtifactStore, SAVE_TOOL,
    SaveCapability,
};
pub use read::{READ_TOOL, ReadCapability};
pub use search::{SearchHit, WEB_SEARCH_TOOL, WebSearch, WebSearchCapability};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::prompts::is_paper_query;
use crate::tools::ToolRegistry;
use crate::transcript::Origin;

/// Researcher tools: one search capability (literature search for paper
/// discovery queries, web search otherwise) plus raw file reads.
pub fn researcher_tools(
    query: &str,
    web: Arc<dyn WebSearch>,
    papers: Arc<dyn LiteratureSearch>,
) -> ToolRegistry {
    let registry = ToolRegistry::new(Origin::Researcher);
    let registry = if is_paper_query(query) {
        registry.with(Arc::new(PaperSearchCapability::new(papers)))
    } else {
        registry.with(Arc::new(WebSearchCapability::new(web)))
    };
    registry.with(Arc::new(ReadCapability))
}

/// Generator tools: save only.
pub fn generator_tools(store: DynArtifactStore) -> ToolRegistry {
    ToolRegistry::new(Origin::Generator).with(Arc::new(SaveCapability::new(store)))
}

/// Fixture-backed search for tests and offline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSearch {
    #[serde(default)]
    pub web: Vec<SearchHit>,
    #[serde(default)]
    pub papers: Vec<Paper>,
}

impl StaticSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, hits: Vec<SearchHit>) -> Self {
        self.web = hits;
        self
    }

    pub fn with_papers(mut self, papers: Vec<Paper>) -> Self {
        self.papers = papers;
        self
    }

    /// Load `{"web": [...], "papers": [...]}` fixtures.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read search fixture {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid search fixture {}", path.display()))
    }
}

#[async_trait]
impl WebSearch for StaticSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        Ok(self.web.iter().take(max_results).cloned().collect())
    }
}

#[async_trait]
impl LiteratureSearch for StaticSearch {
    async fn search_papers(
        &self,
        _query: &str,
        max_results: usize,
        sort: SortOrder,
    ) -> Result<Vec<Paper>> {
        let mut papers = self.papers.clone();
        if sort != SortOrder::Relevance {
            papers.sort_by(|a, b| b.published_date.cmp(&a.published_date));
        }
        papers.truncate(max_results);
        Ok(papers)
    }
}
