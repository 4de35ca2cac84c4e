use std::io::ErrorKind;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::Capability;

pub const READ_TOOL: &str = "local_read_text_file";

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
}

/// Reads a local UTF-8 file. A missing path is an answer, not an error.
#[derive(Debug, Default)]
pub struct ReadCapability;

impl ReadCapability {
    pub async fn read(&self, path: &str) -> Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(format!("File not found: {path}")),
            Err(err) => Err(err).with_context(|| format!("failed to read {path}")),
        }
    }
}

#[async_trait]
impl Capability for ReadCapability {
    fn name(&self) -> &str {
        READ_TOOL
    }

    fn description(&self) -> &str {
        "Read a local UTF-8 text file by path."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: ReadArgs =
            serde_json::from_value(arguments).context("invalid local_read_text_file arguments")?;
        self.read(&args.path).await
    }
}
