//! Reasoning-engine boundary.
//!
//! The concrete LLM provider lives outside this crate. Everything the control
//! loop needs from it is captured by [`ReasoningEngine::complete`]: a prompt
//! (role instructions, transcript, bound tools) in, content and optional tool
//! calls out.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::transcript::{ToolCall, Turn};

/// Schema of a tool bound to a reasoning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Input of one reasoning call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolSpec>,
}

impl Prompt {
    pub fn new(system: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            system: system.into(),
            turns,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// A typed piece of a structured response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fragment {
    Text { text: String },
    /// Reasoning traces, images, citations... anything without text.
    Other(Value),
}

/// Response content: either a plain string or an ordered list of fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Fragments(Vec<Fragment>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl Content {
    /// Flatten to plain text, keeping only text fragments in order.
    pub fn flatten(&self) -> String {
        match self {
            Content::Text(text) => text.trim().to_string(),
            Content::Fragments(fragments) => fragments
                .iter()
                .filter_map(|fragment| match fragment {
                    Fragment::Text { text } => Some(text.as_str()),
                    Fragment::Other(_) => None,
                })
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineReply {
    /// `null` (common alongside tool calls) reads as empty text.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: Content,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tool_calls: Vec<ToolCall>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl EngineReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Content::Text(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn fragments(fragments: Vec<Fragment>) -> Self {
        Self {
            content: Content::Fragments(fragments),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: Content::default(),
            tool_calls,
        }
    }
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<EngineReply>;
}

pub type DynEngine = Arc<dyn ReasoningEngine>;

/// Replays canned replies in order. Used by tests and offline CLI runs.
#[derive(Default)]
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<EngineReply>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedEngine {
    pub fn new(replies: impl IntoIterator<Item = EngineReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Load a JSON array of replies.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine script {}", path.display()))?;
        let replies: Vec<EngineReply> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid engine script {}", path.display()))?;
        Ok(Self::new(replies))
    }

    /// Number of `complete` calls received so far.
    pub fn calls(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        lock(&self.prompts).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn complete(&self, prompt: &Prompt) -> Result<EngineReply> {
        lock(&self.prompts).push(prompt.clone());
        lock(&self.replies)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted engine exhausted"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_keeps_only_text_fragments() {
        let reply: EngineReply = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "hidden"},
                {"type": "text", "text": "First"},
                {"type": "image", "url": "https://example.com/x.png"},
                {"type": "text", "text": "second "}
            ]
        }))
        .unwrap();

        assert_eq!(reply.content.flatten(), "First second");
    }

    #[test]
    fn null_content_beside_tool_calls_reads_as_empty() {
        let replies: Vec<EngineReply> = serde_json::from_value(json!([
            {
                "content": null,
                "tool_calls": [{"id": "c1", "name": "web_search", "args": {"query": "x"}}]
            },
            {"content": "done", "tool_calls": null}
        ]))
        .unwrap();

        assert_eq!(replies[0].content, Content::default());
        assert_eq!(replies[0].tool_calls[0].name, "web_search");
        assert_eq!(replies[1].content.flatten(), "done");
        assert!(replies[1].tool_calls.is_empty());
    }

    #[test]
    fn plain_string_content_is_trimmed() {
        let reply: EngineReply = serde_json::from_value(json!({"content": "  hi  "})).unwrap();
        assert_eq!(reply.content.flatten(), "hi");
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn tool_calls_accept_args_alias() {
        let reply: EngineReply = serde_json::from_value(json!({
            "tool_calls": [{"name": "web_search", "args": {"query": "rust"}}]
        }))
        .unwrap();

        assert_eq!(reply.content.flatten(), "");
        assert_eq!(reply.tool_calls[0].arguments, json!({"query": "rust"}));
        assert!(reply.tool_calls[0].id.is_empty());
    }

    #[tokio::test]
    async fn scripted_engine_replays_then_errors() {
        let engine = ScriptedEngine::new(vec![EngineReply::text("one")]);
        let prompt = Prompt::new("system", vec![Turn::query("q")]);

        let first = engine.complete(&prompt).await.unwrap();
        assert_eq!(first.content.flatten(), "one");
        assert!(engine.complete(&prompt).await.is_err());
        assert_eq!(engine.calls(), 2);
        assert_eq!(engine.remaining(), 0);
    }
}
