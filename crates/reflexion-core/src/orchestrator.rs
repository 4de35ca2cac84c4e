//! Core control loop: draft, run tools, reflect, then retry or finalize.
//!
//! Each run owns its transcript, counters, memory and trace; the
//! orchestrator itself only holds immutable configuration and shared
//! collaborators, so concurrent runs never share mutable state.
//!
//! Per step, in order of precedence:
//! 1. time budget or step budget exhausted: stop with the best draft;
//! 2. researcher turn, tool calls executed in request order, then a forced draft;
//! 3. a non-empty draft replaces the best draft;
//! 4. reflection passes: finalize (running the generator stage when configured);
//! 5. retry budget exhausted: stop with the best draft;
//! 6. otherwise inject the gate's directive, checkpoint the best draft and loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{DynArtifactStore, SAVE_TOOL};
use crate::engine::DynEngine;
use crate::error::ReflexionError;
use crate::executor::{AgentExecutor, TurnResult};
use crate::guardrails::{Guardrails, LimitKind, RunClock};
use crate::memory::{MemorySnapshot, WorkingMemory};
use crate::metrics;
use crate::prompts::{
    GENERATOR_FINAL_DIRECTIVE, GENERATOR_PROMPT, RESEARCHER_PROMPT, forced_answer_directive,
};
use crate::reflection::ReflectionGate;
use crate::tools::{Observation, ObservationStatus, ToolRegistry};
use crate::trace::{TraceCollector, TraceEvent};
use crate::transcript::{Origin, ToolCall, Transcript, Turn};

/// Final text when no step ever produced a draft.
pub const EMPTY_RESULT_MARKER: &str = "No answer was produced within the run's guardrails.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Drafting,
    ToolExecution,
    Reflecting,
    Retrying,
    Generating,
    Finalized,
    AbortedLimit,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Drafting => "drafting",
            RunState::ToolExecution => "tool_execution",
            RunState::Reflecting => "reflecting",
            RunState::Retrying => "retrying",
            RunState::Generating => "generating",
            RunState::Finalized => "finalized",
            RunState::AbortedLimit => "aborted_limit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "limit", rename_all = "snake_case")]
pub enum RunOutcome {
    Finalized,
    AbortedLimit(LimitKind),
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Finalized => RunState::Finalized,
            RunOutcome::AbortedLimit(_) => RunState::AbortedLimit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.state().as_str()
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Finalized => f.write_str("finalized"),
            RunOutcome::AbortedLimit(limit) => write!(f, "aborted ({limit})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub final_text: String,
    pub steps_taken: usize,
    pub retries_used: usize,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
    pub transcript: Transcript,
    pub trace: TraceCollector,
    pub memory: MemorySnapshot,
}

impl RunResult {
    /// False when the run ended with the empty-result marker.
    pub fn has_answer(&self) -> bool {
        self.final_text != EMPTY_RESULT_MARKER
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "Steps={}, Retries={}, Elapsed={}s",
            self.steps_taken,
            self.retries_used,
            self.elapsed.as_secs()
        )
    }
}

/// Writer agent that turns an approved draft into the final report.
pub struct GeneratorStage {
    engine: DynEngine,
    prompt: String,
    tools: ToolRegistry,
}

impl GeneratorStage {
    pub fn new(engine: DynEngine, tools: ToolRegistry) -> Self {
        Self {
            engine,
            prompt: GENERATOR_PROMPT.to_string(),
            tools,
        }
    }
}

struct Checkpoint {
    store: DynArtifactStore,
    name: String,
}

pub struct Orchestrator {
    guardrails: Guardrails,
    engine: DynEngine,
    gate: Arc<dyn ReflectionGate>,
    researcher_prompt: String,
    researcher_tools: ToolRegistry,
    generator: Option<GeneratorStage>,
    checkpoint: Option<Checkpoint>,
}

/// Mutable state of one run.
struct RunContext {
    transcript: Transcript,
    trace: TraceCollector,
    memory: WorkingMemory,
    steps_taken: usize,
    retries_used: usize,
    best_draft: String,
}

impl RunContext {
    fn enter(
        &mut self,
        state: RunState,
        clock: &RunClock,
        message: impl Into<String>,
    ) -> &mut TraceEvent {
        let message = message.into();
        info!(
            state = state.as_str(),
            step = self.steps_taken,
            retries = self.retries_used,
            "{message}"
        );
        self.trace.record(
            state,
            self.steps_taken,
            self.retries_used,
            clock.elapsed(),
            message,
        )
    }
}

impl Orchestrator {
    pub fn new(
        guardrails: Guardrails,
        engine: DynEngine,
        gate: Arc<dyn ReflectionGate>,
    ) -> Result<Self, ReflexionError> {
        guardrails.validate()?;
        Ok(Self {
            guardrails,
            engine,
            gate,
            researcher_prompt: RESEARCHER_PROMPT.to_string(),
            researcher_tools: ToolRegistry::new(Origin::Researcher),
            generator: None,
            checkpoint: None,
        })
    }

    pub fn with_researcher_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.researcher_prompt = prompt.into();
        self
    }

    pub fn with_researcher_tools(mut self, tools: ToolRegistry) -> Self {
        self.researcher_tools = tools;
        self
    }

    pub fn with_generator(mut self, generator: GeneratorStage) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Persist the best draft under `name` after every retry decision and
    /// once more at the end of the run.
    pub fn with_checkpoint(mut self, store: DynArtifactStore, name: impl Into<String>) -> Self {
        self.checkpoint = Some(Checkpoint {
            store,
            name: name.into(),
        });
        self
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    #[instrument(
        name = "orchestrator.run",
        skip(self),
        fields(
            max_steps = self.guardrails.max_steps,
            max_retries = self.guardrails.max_retries,
            max_total_seconds = self.guardrails.max_total_seconds
        )
    )]
    pub async fn run(&self, query: &str) -> Result<RunResult, ReflexionError> {
        let clock = RunClock::start(self.guardrails.time_budget());
        let executor = AgentExecutor::new(self.engine.clone(), forced_answer_directive(query));
        let mut run = RunContext {
            transcript: Transcript::new(),
            trace: TraceCollector::new(),
            memory: WorkingMemory::new(),
            steps_taken: 0,
            retries_used: 0,
            best_draft: String::new(),
        };
        run.transcript.append(Turn::query(query))?;

        let (outcome, approval) = loop {
            if clock.exhausted() {
                break (RunOutcome::AbortedLimit(LimitKind::Time), None);
            }
            if run.steps_taken >= self.guardrails.max_steps {
                break (RunOutcome::AbortedLimit(LimitKind::Steps), None);
            }

            run.steps_taken += 1;
            run.enter(RunState::Drafting, &clock, format!("step {}", run.steps_taken));

            let Some(draft) = self.research_step(&executor, &mut run, &clock).await? else {
                break (RunOutcome::AbortedLimit(LimitKind::Time), None);
            };
            if draft.is_empty() {
                warn!(step = run.steps_taken, "step produced no draft; keeping best draft");
            } else {
                run.best_draft = draft;
            }

            if clock.exhausted() {
                break (RunOutcome::AbortedLimit(LimitKind::Time), None);
            }

            run.enter(
                RunState::Reflecting,
                &clock,
                format!("evaluating {} chars", run.best_draft.len()),
            );
            let verdict = self.gate.evaluate(query, &run.best_draft).await;
            run.memory.add_note(format!(
                "step {}: sufficient={} next_action={:?} issues={:?}",
                run.steps_taken, verdict.sufficient, verdict.next_action, verdict.issues
            ));

            if verdict.passes() {
                break (RunOutcome::Finalized, verdict.rationale.clone());
            }
            if run.retries_used >= self.guardrails.max_retries {
                break (RunOutcome::AbortedLimit(LimitKind::Retries), None);
            }

            run.retries_used += 1;
            run.enter(
                RunState::Retrying,
                &clock,
                format!(
                    "retry {}/{} ({:?})",
                    run.retries_used, self.guardrails.max_retries, verdict.next_action
                ),
            );
            run.transcript.append(Turn::directive(
                Origin::Critic,
                self.gate.retry_directive(&verdict),
            ))?;
            self.save_checkpoint(&run.best_draft).await;
        };

        let mut report = None;
        if outcome == RunOutcome::Finalized {
            if let Some(stage) = &self.generator {
                if let Some(critique) = approval {
                    run.transcript
                        .append(Turn::assistant(Origin::Critic, critique))?;
                }
                if clock.exhausted() {
                    warn!("time budget spent before generator stage; keeping best draft");
                } else {
                    report = self.generate(stage, &mut run, &clock).await?;
                }
            }
        }

        let final_text = match report {
            Some(report) if !report.is_empty() => report,
            _ if !run.best_draft.is_empty() => run.best_draft.clone(),
            _ => EMPTY_RESULT_MARKER.to_string(),
        };

        run.enter(outcome.state(), &clock, outcome.to_string()).limit = match outcome {
            RunOutcome::AbortedLimit(limit) => Some(limit),
            RunOutcome::Finalized => None,
        };
        if final_text != EMPTY_RESULT_MARKER {
            self.save_checkpoint(&final_text).await;
        }

        let elapsed = clock.elapsed();
        metrics::record_run(
            outcome.as_str(),
            run.steps_taken,
            run.retries_used,
            elapsed.as_millis() as u64,
        );
        info!(
            outcome = %outcome,
            steps = run.steps_taken,
            retries = run.retries_used,
            elapsed_ms = elapsed.as_millis() as u64,
            "run complete"
        );

        Ok(RunResult {
            final_text,
            steps_taken: run.steps_taken,
            retries_used: run.retries_used,
            outcome,
            elapsed,
            memory: run.memory.snapshot(),
            trace: run.trace,
            transcript: run.transcript,
        })
    }

    /// One researcher turn. Returns `None` when the time budget ran out
    /// mid-step.
    async fn research_step(
        &self,
        executor: &AgentExecutor,
        run: &mut RunContext,
        clock: &RunClock,
    ) -> Result<Option<String>, ReflexionError> {
        let turn = executor
            .act(
                &run.transcript,
                &self.researcher_prompt,
                &self.researcher_tools,
                clock,
            )
            .await;

        let draft = match turn {
            TurnResult::Draft(text) => text,
            TurnResult::ToolCalls { content, calls } => {
                let executed = self
                    .execute_calls(&self.researcher_tools, content, calls, run, clock)
                    .await?;
                if executed.is_none() || clock.exhausted() {
                    return Ok(None);
                }
                executor
                    .force_answer(
                        &run.transcript,
                        &self.researcher_prompt,
                        executor.forced_directive(),
                        clock,
                    )
                    .await
            }
        };

        if !draft.is_empty() {
            run.transcript
                .append(Turn::assistant(Origin::Researcher, draft.clone()))?;
        }
        Ok(Some(draft))
    }

    /// Append the issuing turn, then run every call in request order and
    /// append its observation. Returns `None` if the time budget ran out
    /// before all calls were made.
    async fn execute_calls(
        &self,
        tools: &ToolRegistry,
        content: String,
        calls: Vec<ToolCall>,
        run: &mut RunContext,
        clock: &RunClock,
    ) -> Result<Option<Vec<Observation>>, ReflexionError> {
        run.enter(
            RunState::ToolExecution,
            clock,
            format!("{} tool call(s) for {}", calls.len(), tools.role().as_str()),
        );
        run.transcript
            .append(Turn::assistant(tools.role(), content).with_tool_calls(calls.clone()))?;

        let mut observations = Vec::with_capacity(calls.len());
        for call in &calls {
            if clock.exhausted() {
                warn!(tool = %call.name, "time budget spent before tool call");
                return Ok(None);
            }
            run.memory
                .add_source(format!("{}({})", call.name, call.arguments));
            let observation = tools.invoke(call).await;
            debug!(
                tool = %observation.tool,
                status = observation.status.as_str(),
                chars = observation.content.len(),
                "observation appended"
            );
            run.transcript.append(Turn::observation(
                observation.tool_call_id.clone(),
                observation.content.clone(),
            ))?;
            observations.push(observation);
        }
        Ok(Some(observations))
    }

    /// Generator turn. The report is the content of the last successful save
    /// call, or the generator's own text when it saved nothing.
    async fn generate(
        &self,
        stage: &GeneratorStage,
        run: &mut RunContext,
        clock: &RunClock,
    ) -> Result<Option<String>, ReflexionError> {
        run.enter(RunState::Generating, clock, "writing final report");
        let executor = AgentExecutor::new(stage.engine.clone(), GENERATOR_FINAL_DIRECTIVE);

        let report = match executor
            .act(&run.transcript, &stage.prompt, &stage.tools, clock)
            .await
        {
            TurnResult::Draft(text) => text,
            TurnResult::ToolCalls { content, calls } => {
                let Some(observations) = self
                    .execute_calls(&stage.tools, content, calls.clone(), run, clock)
                    .await?
                else {
                    return Ok(None);
                };
                match saved_content(&calls, &observations) {
                    Some(saved) => saved,
                    None => {
                        executor
                            .force_answer(
                                &run.transcript,
                                &stage.prompt,
                                GENERATOR_FINAL_DIRECTIVE,
                                clock,
                            )
                            .await
                    }
                }
            }
        };

        if !report.is_empty() {
            run.transcript
                .append(Turn::assistant(Origin::Generator, report.clone()))?;
        }
        Ok(Some(report))
    }

    async fn save_checkpoint(&self, content: &str) {
        let Some(checkpoint) = &self.checkpoint else {
            return;
        };
        if content.is_empty() {
            debug!("no draft yet; skipping checkpoint");
            return;
        }
        match checkpoint.store.save(&checkpoint.name, content).await {
            Ok(confirmation) => debug!(%confirmation, "checkpoint saved"),
            Err(err) => warn!(name = %checkpoint.name, error = %err, "checkpoint failed"),
        }
    }
}

fn saved_content(calls: &[ToolCall], observations: &[Observation]) -> Option<String> {
    calls
        .iter()
        .zip(observations)
        .filter(|(call, observation)| {
            call.name == SAVE_TOOL && observation.status == ObservationStatus::Ok
        })
        .filter_map(|(call, _)| call.arguments.get("content")?.as_str().map(str::to_string))
        .filter(|content| !content.trim().is_empty())
        .last()
}
