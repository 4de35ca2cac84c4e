//! State-machine trace of one run.
//!
//! Every transition is stored with the counters as they stood when the state
//! was entered, so a persisted trace can be replayed against the guardrails.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::guardrails::LimitKind;
use crate::orchestrator::RunState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub state: RunState,
    pub step: usize,
    pub retries: usize,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<LimitKind>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        state: RunState,
        step: usize,
        retries: usize,
        elapsed: Duration,
        message: impl Into<String>,
    ) -> &mut TraceEvent {
        self.events.push(TraceEvent {
            state,
            step,
            retries,
            elapsed_ms: elapsed.as_millis() as u64,
            limit: None,
            message: message.into(),
        });
        let last = self.events.len() - 1;
        &mut self.events[last]
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn states(&self) -> Vec<RunState> {
        self.events.iter().map(|event| event.state).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

/// Distinct state-to-state edge with how often the run took it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Option<RunState>,
    pub to: RunState,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: usize,
    pub retries: usize,
    pub elapsed_ms: u64,
    pub terminal: Option<RunState>,
    pub limit: Option<LimitKind>,
    pub transitions: Vec<Transition>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let mut summary = Self::default();
        let mut previous = None;
        for event in events {
            match summary
                .transitions
                .iter_mut()
                .find(|edge| edge.from == previous && edge.to == event.state)
            {
                Some(edge) => edge.count += 1,
                None => summary.transitions.push(Transition {
                    from: previous,
                    to: event.state,
                    count: 1,
                }),
            }
            previous = Some(event.state);
        }

        if let Some(last) = events.last() {
            summary.steps = last.step;
            summary.retries = last.retries;
            summary.elapsed_ms = last.elapsed_ms;
            if matches!(last.state, RunState::Finalized | RunState::AbortedLimit) {
                summary.terminal = Some(last.state);
                summary.limit = last.limit;
            }
        }
        summary
    }

    pub fn render_markdown(&self) -> String {
        if self.transitions.is_empty() {
            return "No transitions recorded.".to_string();
        }
        let mut output = String::from("### Run Trace\n");
        let outcome = match (self.terminal, self.limit) {
            (Some(state), Some(limit)) => format!("{} ({limit})", state.as_str()),
            (Some(state), None) => state.as_str().to_string(),
            (None, _) => "incomplete".to_string(),
        };
        let _ = writeln!(
            output,
            "Outcome: {outcome} after {} step(s), {} retry(ies), {} ms\n",
            self.steps, self.retries, self.elapsed_ms
        );
        output.push_str("| from | to | count |\n|---|---|---:|\n");
        for edge in &self.transitions {
            let _ = writeln!(
                output,
                "| {} | {} | {} |",
                edge.from.map_or("start", |state| state.as_str()),
                edge.to.as_str(),
                edge.count
            );
        }
        output
    }

    pub fn render_mermaid(&self) -> String {
        let mut output = String::from("stateDiagram-v2\n");
        for edge in &self.transitions {
            let from = edge.from.map_or("[*]", |state| state.as_str());
            let _ = writeln!(output, "  {from} --> {}: x{}", edge.to.as_str(), edge.count);
        }
        if let Some(terminal) = self.terminal {
            let _ = writeln!(output, "  {} --> [*]", terminal.as_str());
        }
        output
    }
}

/// Write `<dir>/<run_id>.json` with the run's events.
pub fn persist_trace(
    dir: impl AsRef<Path>,
    run_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    std::fs::write(&path, serde_json::to_vec_pretty(events)?)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}
