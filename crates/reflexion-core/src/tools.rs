//! Tool Invoker: role-scoped dispatch of capabilities by name.
//!
//! Registries are resolved once when they are built. Each agent role gets its
//! own registry, so the researcher never sees the save capability and the
//! generator never sees search. Invocation never fails: unknown names and
//! capability errors come back as observations the reasoning engine can read
//! and correct.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::engine::ToolSpec;
use crate::metrics;
use crate::transcript::{Origin, ToolCall};

/// An external operation the reasoning engine may invoke.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Ok,
    UnknownTool,
    Failed,
}

impl ObservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationStatus::Ok => "ok",
            ObservationStatus::UnknownTool => "unknown_tool",
            ObservationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tool_call_id: String,
    pub tool: String,
    pub content: String,
    pub status: ObservationStatus,
}

pub struct ToolRegistry {
    role: Origin,
    tools: HashMap<String, Arc<dyn Capability>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new(role: Origin) -> Self {
        Self {
            role,
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a capability. A later registration with the same name
    /// replaces the earlier one but keeps its position.
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        let name = capability.name().to_string();
        if self.tools.insert(name.clone(), capability).is_none() {
            self.order.push(name);
        }
        self
    }

    pub fn role(&self) -> Origin {
        self.role
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas bound to the reasoning call, in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    #[instrument(name = "tool.invoke", skip(self, call), fields(role = self.role.as_str(), tool = %call.name))]
    pub async fn invoke(&self, call: &ToolCall) -> Observation {
        let (content, status) = match self.tools.get(&call.name) {
            None => {
                warn!(tool = %call.name, "reasoning engine requested unknown tool");
                (
                    format!("Unknown tool: {}", call.name),
                    ObservationStatus::UnknownTool,
                )
            }
            Some(tool) => match tool.call(call.arguments.clone()).await {
                Ok(output) => (output.trim().to_string(), ObservationStatus::Ok),
                Err(err) => {
                    warn!(tool = %call.name, error = %err, "capability failed");
                    (
                        format!("Tool {} failed: {err:#}", call.name),
                        ObservationStatus::Failed,
                    )
                }
            },
        };

        debug!(chars = content.len(), status = status.as_str(), "observation ready");
        metrics::record_tool_invocation(&call.name, status.as_str());

        Observation {
            tool_call_id: call.id.clone(),
            tool: call.name.clone(),
            content,
            status,
        }
    }
}
