//! Append-only conversation log for a single run.
//!
//! Every reasoning call reads the transcript; only the orchestrator appends to
//! it. `role` drives how the next reasoning call interprets a turn while
//! `origin` records which agent actually produced it, so a critique can be
//! routed back to the researcher as an instruction without losing provenance.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReflexionError;

/// How a turn is presented to the reasoning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolObservation,
    SystemDirective,
}

/// Logical agent (or caller) that produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// The caller that submitted the query.
    User,
    Researcher,
    Critic,
    Generator,
    System,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::User => "user",
            Origin::Researcher => "researcher",
            Origin::Critic => "critic",
            Origin::Generator => "generator",
            Origin::System => "system",
        }
    }
}

/// A single tool invocation requested by the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, alias = "args")]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub origin: Origin,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    pub fn new(role: Role, origin: Origin, content: impl Into<String>) -> Self {
        Self {
            role,
            origin,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// The caller's query.
    pub fn query(content: impl Into<String>) -> Self {
        Self::new(Role::User, Origin::User, content)
    }

    pub fn assistant(origin: Origin, content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, origin, content)
    }

    /// An instruction injected on behalf of `origin` that the next agent must
    /// act on, e.g. a critique routed back to the researcher.
    pub fn directive(origin: Origin, content: impl Into<String>) -> Self {
        Self::new(Role::User, origin, content)
    }

    pub fn observation(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::ToolObservation,
            origin: Origin::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Append a turn.
    ///
    /// Tool observations must answer the calls of the closest preceding
    /// assistant turn, one observation per call, in the order the calls were
    /// issued. Anything else is rejected with
    /// [`ReflexionError::InvariantViolation`].
    pub fn append(&mut self, turn: Turn) -> Result<(), ReflexionError> {
        if turn.role == Role::ToolObservation {
            self.check_observation(&turn)?;
        }
        self.turns.push(turn);
        Ok(())
    }

    fn check_observation(&self, turn: &Turn) -> Result<(), ReflexionError> {
        let id = turn
            .tool_call_id
            .as_deref()
            .ok_or_else(|| ReflexionError::invariant("tool observation without tool_call_id"))?;

        let answered = self
            .turns
            .iter()
            .rev()
            .take_while(|t| t.role == Role::ToolObservation)
            .count();
        let issuer = self
            .turns
            .len()
            .checked_sub(answered + 1)
            .and_then(|idx| self.turns.get(idx))
            .filter(|t| t.role == Role::Assistant && !t.tool_calls.is_empty())
            .ok_or_else(|| {
                ReflexionError::invariant(format!(
                    "observation {id} does not follow an assistant turn with tool calls"
                ))
            })?;

        match issuer.tool_calls.get(answered) {
            Some(call) if call.id == id => Ok(()),
            Some(call) => Err(ReflexionError::invariant(format!(
                "observation {id} out of order; expected {}",
                call.id
            ))),
            None => Err(ReflexionError::invariant(format!(
                "observation {id} has no pending tool call"
            ))),
        }
    }

    /// Ordered turns for the next reasoning call. No truncation happens here.
    pub fn snapshot_for_prompt(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calls() -> Vec<ToolCall> {
        vec![
            ToolCall::new("call_1", "web_search", json!({"query": "a"})),
            ToolCall::new("call_2", "save_markdown_file", json!({})),
        ]
    }

    #[test]
    fn observations_follow_call_order() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::query("find things")).unwrap();
        transcript
            .append(Turn::assistant(Origin::Researcher, "").with_tool_calls(calls()))
            .unwrap();
        transcript.append(Turn::observation("call_1", "hits")).unwrap();
        transcript.append(Turn::observation("call_2", "saved")).unwrap();

        let ids: Vec<_> = transcript
            .turns()
            .iter()
            .filter_map(|t| t.tool_call_id.clone())
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
    }

    #[test]
    fn out_of_order_observation_is_rejected() {
        let mut transcript = Transcript::new();
        transcript
            .append(Turn::assistant(Origin::Researcher, "").with_tool_calls(calls()))
            .unwrap();

        let err = transcript
            .append(Turn::observation("call_2", "saved"))
            .unwrap_err();
        assert!(matches!(err, ReflexionError::InvariantViolation(_)));
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn observation_without_issuing_turn_is_rejected() {
        let mut transcript = Transcript::new();
        transcript.append(Turn::query("hello")).unwrap();
        assert!(transcript.append(Turn::observation("call_1", "x")).is_err());

        transcript
            .append(Turn::assistant(Origin::Researcher, "").with_tool_calls(calls()))
            .unwrap();
        transcript.append(Turn::observation("call_1", "a")).unwrap();
        transcript.append(Turn::observation("call_2", "b")).unwrap();
        assert!(transcript.append(Turn::observation("call_3", "c")).is_err());
    }

    #[test]
    fn directive_keeps_origin_but_routes_as_user() {
        let turn = Turn::directive(Origin::Critic, "RETRY: No content found.");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.origin, Origin::Critic);
    }
}
