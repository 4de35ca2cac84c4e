//! Reflexion core: a bounded draft / reflect / retry loop for research agents.
//!
//! A run drives one researcher agent through a reasoning engine, executes the
//! tools it asks for, gates every draft through a reflection step and either
//! finalizes (optionally handing the approved draft to a generator agent) or
//! retries with a corrective directive until a guardrail trips.

pub mod capabilities;
mod config;
mod engine;
mod error;
mod eval;
mod executor;
mod guardrails;
mod logging;
mod memory;
mod metrics;
mod orchestrator;
pub mod prompts;
mod reflection;
mod tools;
mod trace;
mod transcript;

pub use config::{Config, ConfigLoader, LoggingConfig, OutputConfig, TraceConfig};
pub use engine::{
    Content, DynEngine, EngineReply, Fragment, Prompt, ReasoningEngine, ScriptedEngine, ToolSpec,
};
pub use error::ReflexionError;
pub use eval::{ComparisonRow, EvaluationHarness, RunMetrics, render_comparison_table};
pub use executor::{AgentExecutor, FORCED_ANSWER_ATTEMPTS, TurnResult};
pub use guardrails::{Guardrails, LimitKind, RunClock};
pub use logging::{RunLogInput, RunLogRecord, log_run_completion};
pub use memory::{MEMORY_WINDOW, MemorySnapshot, WorkingMemory};
pub use orchestrator::{
    EMPTY_RESULT_MARKER, GeneratorStage, Orchestrator, RunOutcome, RunResult, RunState,
};
pub use reflection::{
    APPROVAL_SENTINEL, JsonReflectionGate, NextAction, ReflectionGate, ReflectionVerdict,
    SentinelCritic, default_retry_directive, parse_verdict,
};
pub use tools::{Capability, Observation, ObservationStatus, ToolRegistry};
pub use trace::{TraceCollector, TraceEvent, TraceSummary, Transition, persist_trace};
pub use transcript::{Origin, Role, ToolCall, Transcript, Turn};
