use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::tools::Capability;

pub const SAVE_TOOL: &str = "save_markdown_file";

/// Destination for finished and checkpointed reports.
///
/// `save` overwrites: saving the same name twice leaves exactly one artifact
/// holding the latest content.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, name: &str, content: &str) -> Result<String>;
}

pub type DynArtifactStore = Arc<dyn ArtifactStore>;

fn confirmation(name: &str) -> String {
    format!("File '{name}' saved successfully.")
}

/// Writes UTF-8 artifacts below a root directory.
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name.trim());
        if name.trim().is_empty() {
            bail!("artifact name must not be empty");
        }
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            bail!("artifact name {name:?} must be a relative path without '..'");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save(&self, name: &str, content: &str) -> Result<String> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        tokio::fs::write(&path, content.as_bytes())
            .await
            .with_context(|| format!("failed to write artifact {}", path.display()))?;
        info!(path = %path.display(), bytes = content.len(), "artifact saved");
        Ok(confirmation(name))
    }
}

/// Keeps artifacts in memory; for tests and dry runs.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: DashMap<String, String>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            artifacts: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.artifacts.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn save(&self, name: &str, content: &str) -> Result<String> {
        if name.trim().is_empty() {
            bail!("artifact name must not be empty");
        }
        self.artifacts.insert(name.to_string(), content.to_string());
        Ok(confirmation(name))
    }
}

#[derive(Debug, Deserialize)]
struct SaveArgs {
    content: String,
    #[serde(alias = "name")]
    filename: String,
}

/// The generator's only tool.
pub struct SaveCapability {
    store: DynArtifactStore,
}

impl SaveCapability {
    pub fn new(store: DynArtifactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for SaveCapability {
    fn name(&self) -> &str {
        SAVE_TOOL
    }

    fn description(&self) -> &str {
        "Write Markdown content to filename, replacing any previous content."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "filename": {"type": "string"}
            },
            "required": ["content", "filename"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: SaveArgs =
            serde_json::from_value(arguments).context("invalid save_markdown_file arguments")?;
        self.store.save(&args.filename, &args.content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_store_overwrites_instead_of_duplicating() -> Result<()> {
        let temp = TempDir::new()?;
        let store = FileArtifactStore::new(temp.path());

        store.save("report.md", "# Draft").await?;
        store.save("report.md", "# Draft").await?;

        let entries: Vec<_> = std::fs::read_dir(temp.path())?.collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("report.md"))?,
            "# Draft"
        );

        store.save("report.md", "# Final").await?;
        assert_eq!(
            std::fs::read_to_string(temp.path().join("report.md"))?,
            "# Final"
        );
        Ok(())
    }

    #[tokio::test]
    async fn file_store_rejects_escaping_names() {
        let temp = TempDir::new().expect("temp dir");
        let store = FileArtifactStore::new(temp.path());

        assert!(store.save("../outside.md", "x").await.is_err());
        assert!(store.save("/etc/passwd", "x").await.is_err());
        assert!(store.save("  ", "x").await.is_err());
    }

    #[tokio::test]
    async fn save_capability_accepts_filename_argument() -> Result<()> {
        let store = Arc::new(MemoryArtifactStore::new());
        let capability = SaveCapability::new(store.clone());

        let reply = capability
            .call(json!({"content": "hello", "filename": "notes.md"}))
            .await?;

        assert_eq!(reply, "File 'notes.md' saved successfully.");
        assert_eq!(store.get("notes.md").as_deref(), Some("hello"));
        assert!(capability.call(json!({"content": "x"})).await.is_err());
        Ok(())
    }
}
