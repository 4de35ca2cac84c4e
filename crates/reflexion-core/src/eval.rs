use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::logging::RunLogRecord;

#[derive(Debug, Default, Clone, Deserialize)]
struct LogEntry {
    run_id: Option<String>,
    outcome: String,
    steps_taken: usize,
    retries_used: usize,
}

/// Aggregates over a `runs.jsonl` file.
#[derive(Debug, Default, Clone)]
pub struct RunMetrics {
    pub total_runs: usize,
    pub finalized_runs: usize,
    pub average_steps: f32,
    pub average_retries: f32,
    pub aborted: Vec<String>,
}

impl RunMetrics {
    fn record(&mut self, entry: LogEntry) {
        self.total_runs += 1;
        let n = self.total_runs as f32;
        self.average_steps = (self.average_steps * (n - 1.0) + entry.steps_taken as f32) / n;
        self.average_retries = (self.average_retries * (n - 1.0) + entry.retries_used as f32) / n;
        if entry.outcome == "finalized" {
            self.finalized_runs += 1;
        } else if let Some(id) = entry.run_id {
            self.aborted.push(id);
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} run(s) • {} finalized • avg steps {:.2} • avg retries {:.2} • {} aborted",
            self.total_runs,
            self.finalized_runs,
            self.average_steps,
            self.average_retries,
            self.total_runs - self.finalized_runs
        )
    }
}

pub struct EvaluationHarness;

impl EvaluationHarness {
    pub fn analyze_log(path: impl AsRef<Path>) -> Result<RunMetrics> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open log file {}", path.as_ref().display()))?;
        let mut metrics = RunMetrics::default();

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => metrics.record(entry),
                Err(err) => {
                    tracing::debug!(%err, "skipping malformed run log entry");
                }
            }
        }

        Ok(metrics)
    }

    /// One comparison row per well-formed line of a `runs.jsonl` file.
    pub fn comparison_rows(path: impl AsRef<Path>) -> Result<Vec<ComparisonRow>> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open log file {}", path.as_ref().display()))?;
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(record) = serde_json::from_str::<RunLogRecord>(&line) {
                rows.push(ComparisonRow::from(&record));
            }
        }
        Ok(rows)
    }
}

/// One row of a side-by-side comparison of runs over a task set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub task: String,
    pub chars: usize,
    pub steps: usize,
    pub retries: usize,
    pub outcome: String,
}

impl From<&RunLogRecord> for ComparisonRow {
    fn from(record: &RunLogRecord) -> Self {
        Self {
            task: record.query.clone(),
            chars: record.final_chars,
            steps: record.steps_taken,
            retries: record.retries_used,
            outcome: record.outcome.clone(),
        }
    }
}

pub fn render_comparison_table(rows: &[ComparisonRow]) -> String {
    let mut output = String::from("| Task | chars | steps | retries | outcome |\n");
    output.push_str("|---|---:|---:|---:|---|\n");
    for row in rows {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} |",
            row.task.replace('|', "/"),
            row.chars,
            row.steps,
            row.retries,
            row.outcome
        );
    }
    output
}
