//! Append-only JSONL audit log of completed runs.

use std::collections::BTreeSet;
use std::fs::{OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capabilities::papers::truncate_chars;
use crate::orchestrator::RunResult;

const PREVIEW_CHARS: usize = 400;

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret",
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub run_id: String,
    pub query: String,
    pub output_name: Option<String>,
    pub outcome: String,
    pub steps_taken: usize,
    pub retries_used: usize,
    pub elapsed_ms: u64,
    pub final_text: String,
}

impl RunLogInput {
    pub fn from_result(
        run_id: impl Into<String>,
        query: impl Into<String>,
        output_name: Option<String>,
        result: &RunResult,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            query: query.into(),
            output_name,
            outcome: result.outcome.as_str().to_string(),
            steps_taken: result.steps_taken,
            retries_used: result.retries_used,
            elapsed_ms: result.elapsed.as_millis() as u64,
            final_text: result.final_text.clone(),
        }
    }
}

/// One line of `runs.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogRecord {
    pub timestamp: String,
    pub run_id: String,
    pub query: String,
    pub output_name: Option<String>,
    pub outcome: String,
    pub steps_taken: usize,
    pub retries_used: usize,
    pub elapsed_ms: u64,
    pub final_chars: usize,
    pub preview: String,
    #[serde(default)]
    pub redactions: Vec<String>,
}

#[derive(Serialize)]
struct AuditLogRecord {
    timestamp: String,
    run_id: String,
    redactions: Vec<String>,
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{}", line)
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn sanitize_text(input: &str, redactions: &mut BTreeSet<String>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name.to_string());
        }
    }
    output
}

/// Append a run record under `<base_dir>/<YYYY>/<MM>/runs.jsonl` and return
/// the log path. Secrets in the query or answer are redacted first.
pub fn log_run_completion(base_dir: &Path, input: RunLogInput) -> Result<PathBuf> {
    let timestamp = Utc::now();
    let mut redactions = BTreeSet::new();

    let query = sanitize_text(&input.query, &mut redactions);
    let preview = sanitize_text(
        &truncate_chars(&input.final_text, PREVIEW_CHARS),
        &mut redactions,
    );

    let record = RunLogRecord {
        timestamp: timestamp.to_rfc3339(),
        run_id: input.run_id.clone(),
        query,
        output_name: input.output_name,
        outcome: input.outcome,
        steps_taken: input.steps_taken,
        retries_used: input.retries_used,
        elapsed_ms: input.elapsed_ms,
        final_chars: input.final_text.chars().count(),
        preview,
        redactions: redactions.into_iter().collect(),
    };

    let month_dir = base_dir
        .join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()));
    let run_log_path = month_dir.join("runs.jsonl");
    append_json_line(&run_log_path, &record)?;

    if !record.redactions.is_empty() {
        let audit = AuditLogRecord {
            timestamp: record.timestamp.clone(),
            run_id: input.run_id.clone(),
            redactions: record.redactions.clone(),
        };
        append_json_line(&month_dir.join("audit.jsonl"), &audit)?;
        warn!(
            run_id = %input.run_id,
            fields = ?record.redactions,
            "redacted potential secrets from run log"
        );
    }

    Ok(run_log_path)
}
