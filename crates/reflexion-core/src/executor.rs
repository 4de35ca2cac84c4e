//! Agent Turn Executor: one reasoning call per agent turn.

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::engine::{DynEngine, EngineReply, Prompt};
use crate::guardrails::RunClock;
use crate::tools::ToolRegistry;
use crate::transcript::{Origin, ToolCall, Transcript, Turn};

/// Forced-answer attempts before an empty reply is accepted.
pub const FORCED_ANSWER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnResult {
    /// The engine wants tools run first. `content` is any text sent alongside.
    ToolCalls { content: String, calls: Vec<ToolCall> },
    /// A candidate answer, possibly empty when every attempt came back blank.
    Draft(String),
}

pub struct AgentExecutor {
    engine: DynEngine,
    forced_directive: String,
}

impl AgentExecutor {
    pub fn new(engine: DynEngine, forced_directive: impl Into<String>) -> Self {
        Self {
            engine,
            forced_directive: forced_directive.into(),
        }
    }

    pub fn forced_directive(&self) -> &str {
        &self.forced_directive
    }

    #[instrument(name = "agent.act", skip_all, fields(role = allowed_tools.role().as_str(), turns = transcript.len()))]
    pub async fn act(
        &self,
        transcript: &Transcript,
        role_prompt: &str,
        allowed_tools: &ToolRegistry,
        clock: &RunClock,
    ) -> TurnResult {
        let prompt = Prompt::new(role_prompt, transcript.snapshot_for_prompt())
            .with_tools(allowed_tools.specs());

        let reply = match self.engine.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "reasoning engine call failed; treating as empty reply");
                EngineReply::default()
            }
        };

        let text = reply.content.flatten();
        let calls = normalize_calls(reply.tool_calls);
        if !calls.is_empty() {
            debug!(calls = calls.len(), "engine requested tools");
            return TurnResult::ToolCalls {
                content: text,
                calls,
            };
        }
        if !text.is_empty() {
            return TurnResult::Draft(text);
        }

        debug!("empty reply without tool calls; forcing an answer");
        TurnResult::Draft(
            self.force_answer(transcript, role_prompt, &self.forced_directive, clock)
                .await,
        )
    }

    /// Ask for the answer with no tools bound, up to
    /// [`FORCED_ANSWER_ATTEMPTS`] times. Returns empty text if every attempt is
    /// blank or the time budget runs out first.
    #[instrument(name = "agent.force_answer", skip_all)]
    pub async fn force_answer(
        &self,
        transcript: &Transcript,
        role_prompt: &str,
        directive: &str,
        clock: &RunClock,
    ) -> String {
        let mut turns = transcript.snapshot_for_prompt();
        turns.push(Turn::directive(Origin::System, directive));
        let prompt = Prompt::new(role_prompt, turns);

        for attempt in 1..=FORCED_ANSWER_ATTEMPTS {
            if clock.exhausted() {
                warn!(attempt, "time budget spent before forced answer");
                break;
            }
            match self.engine.complete(&prompt).await {
                Ok(reply) => {
                    let text = reply.content.flatten();
                    if !text.is_empty() {
                        return text;
                    }
                    debug!(attempt, "forced answer came back empty");
                }
                Err(err) => warn!(attempt, error = %err, "forced answer call failed"),
            }
        }

        String::new()
    }
}

fn normalize_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.trim().is_empty() {
                call.id = format!("call_{}", Uuid::new_v4().simple());
            }
            call
        })
        .collect()
}
