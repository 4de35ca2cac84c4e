//! Reflection Gate: decides whether a draft is good enough to stop.
//!
//! Two wire conventions exist for the same decision. [`JsonReflectionGate`]
//! asks for a strict JSON record; [`SentinelCritic`] asks for free text and
//! looks for the `APPROVED` sentinel. Both are parsed into a
//! [`ReflectionVerdict`] at this boundary so the orchestrator only ever
//! branches on typed fields.
//!
//! `evaluate` is infallible. Whatever the engine returns (or fails to
//! return), the orchestrator receives a well-formed verdict.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::capabilities::papers::truncate_chars;
use crate::engine::{DynEngine, Prompt};
use crate::prompts::{critic_prompt, reflection_prompt};
use crate::transcript::{Origin, Turn};

pub const APPROVAL_SENTINEL: &str = "APPROVED";
const RAW_EXCERPT_CHARS: usize = 200;

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*```[a-z]*\s*").expect("invalid fence regex"));
static FENCE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*```\s*$").expect("invalid fence regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Finalize,
    SearchMore,
    /// Also used for any action string the gate does not recognise.
    #[default]
    #[serde(other)]
    Rewrite,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    #[serde(default)]
    pub sufficient: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub next_action: NextAction,
    #[serde(default)]
    pub suggested_queries: Vec<String>,
    /// Free-text critique, when the gate produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl ReflectionVerdict {
    pub fn approved() -> Self {
        Self {
            sufficient: true,
            next_action: NextAction::Finalize,
            ..Self::default()
        }
    }

    /// Conservative verdict used when the gate's output cannot be trusted.
    pub fn parse_failure(raw: &str) -> Self {
        Self {
            sufficient: false,
            issues: vec![
                "parse failure".to_string(),
                truncate_chars(raw, RAW_EXCERPT_CHARS),
            ],
            next_action: NextAction::Rewrite,
            suggested_queries: Vec::new(),
            rationale: None,
        }
    }

    pub fn passes(&self) -> bool {
        self.sufficient || self.next_action == NextAction::Finalize
    }
}

/// Strip optional code fences and parse a strict JSON verdict. Never fails.
pub fn parse_verdict(raw: &str) -> ReflectionVerdict {
    let unfenced = FENCE_OPEN.replace(raw.trim(), "");
    let unfenced = FENCE_CLOSE.replace(&unfenced, "");

    let parsed = serde_json::from_str::<Value>(&unfenced)
        .ok()
        .filter(Value::is_object)
        .and_then(|value| serde_json::from_value::<ReflectionVerdict>(value).ok());

    match parsed {
        Some(verdict) => verdict,
        None => {
            warn!(chars = raw.len(), "reflection output was not a valid verdict");
            ReflectionVerdict::parse_failure(raw)
        }
    }
}

/// Instruction injected into the transcript when a verdict asks for another pass.
pub fn default_retry_directive(verdict: &ReflectionVerdict) -> String {
    match verdict.next_action {
        NextAction::SearchMore => {
            let hint = if verdict.suggested_queries.is_empty() {
                String::new()
            } else {
                format!(" Suggested queries: {:?}.", verdict.suggested_queries)
            };
            format!("Do more research with search.{hint} Then answer with source URLs.")
        }
        _ => format!(
            "Rewrite and fix: {:?}. Include source URLs.",
            verdict.issues
        ),
    }
}

#[async_trait]
pub trait ReflectionGate: Send + Sync {
    async fn evaluate(&self, question: &str, draft: &str) -> ReflectionVerdict;

    fn retry_directive(&self, verdict: &ReflectionVerdict) -> String {
        default_retry_directive(verdict)
    }
}

/// Gate that requires a strict JSON verdict from the engine.
pub struct JsonReflectionGate {
    engine: DynEngine,
}

impl JsonReflectionGate {
    pub fn new(engine: DynEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ReflectionGate for JsonReflectionGate {
    #[instrument(name = "reflection.json", skip_all, fields(draft_chars = draft.len()))]
    async fn evaluate(&self, question: &str, draft: &str) -> ReflectionVerdict {
        let prompt = Prompt::new(
            "",
            vec![Turn::directive(
                Origin::Critic,
                reflection_prompt(question, draft),
            )],
        );

        match self.engine.complete(&prompt).await {
            Ok(reply) => {
                let verdict = parse_verdict(&reply.content.flatten());
                debug!(
                    sufficient = verdict.sufficient,
                    next_action = ?verdict.next_action,
                    issues = verdict.issues.len(),
                    "reflection verdict"
                );
                verdict
            }
            Err(err) => {
                warn!(error = %err, "reflection engine call failed");
                ReflectionVerdict::parse_failure(&err.to_string())
            }
        }
    }
}

/// Critic agent whose free-text reply passes when it contains `APPROVED`.
///
/// Rejections carry the critique as `rationale`; it is routed back to the
/// researcher verbatim as an instruction.
pub struct SentinelCritic {
    engine: DynEngine,
}

impl SentinelCritic {
    pub fn new(engine: DynEngine) -> Self {
        Self { engine }
    }

    pub fn classify(response: &str) -> ReflectionVerdict {
        if response.contains(APPROVAL_SENTINEL) {
            ReflectionVerdict {
                rationale: Some(response.to_string()),
                ..ReflectionVerdict::approved()
            }
        } else {
            ReflectionVerdict {
                sufficient: false,
                issues: vec![response.to_string()],
                next_action: NextAction::Rewrite,
                suggested_queries: Vec::new(),
                rationale: Some(response.to_string()),
            }
        }
    }
}

#[async_trait]
impl ReflectionGate for SentinelCritic {
    #[instrument(name = "reflection.critic", skip_all, fields(draft_chars = draft.len()))]
    async fn evaluate(&self, question: &str, draft: &str) -> ReflectionVerdict {
        let prompt = Prompt::new(
            "",
            vec![Turn::directive(Origin::Critic, critic_prompt(question, draft))],
        );

        match self.engine.complete(&prompt).await {
            Ok(reply) => {
                let verdict = Self::classify(&reply.content.flatten());
                debug!(approved = verdict.passes(), "critic verdict");
                verdict
            }
            Err(err) => {
                warn!(error = %err, "critic engine call failed");
                ReflectionVerdict {
                    issues: vec![format!("critic unavailable: {err}")],
                    ..ReflectionVerdict::default()
                }
            }
        }
    }

    fn retry_directive(&self, verdict: &ReflectionVerdict) -> String {
        match &verdict.rationale {
            Some(critique) if !critique.trim().is_empty() => critique.clone(),
            _ => "RETRY: No content found.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineReply, ScriptedEngine};
    use std::sync::Arc;

    #[test]
    fn fenced_json_is_parsed() {
        let raw = "```json\n{\"sufficient\": true, \"issues\": [], \"next_action\": \"finalize\", \"suggested_queries\": []}\n```";
        let verdict = parse_verdict(raw);
        assert!(verdict.sufficient);
        assert_eq!(verdict.next_action, NextAction::Finalize);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let verdict = parse_verdict(r#"{"issues": ["no links"]}"#);
        assert!(!verdict.sufficient);
        assert_eq!(verdict.next_action, NextAction::Rewrite);
        assert_eq!(verdict.issues, vec!["no links"]);
        assert!(verdict.suggested_queries.is_empty());
    }

    #[test]
    fn unknown_action_is_rewrite() {
        let verdict = parse_verdict(r#"{"sufficient": false, "next_action": "panic"}"#);
        assert_eq!(verdict.next_action, NextAction::Rewrite);
    }

    #[test]
    fn malformed_output_yields_conservative_verdict() {
        for raw in [
            "Looks great to me!",
            "",
            "[true]",
            r#"{"sufficient": "yes"}"#,
            "```\nnot json\n```",
        ] {
            let verdict = parse_verdict(raw);
            assert!(!verdict.sufficient, "{raw}");
            assert_eq!(verdict.next_action, NextAction::Rewrite, "{raw}");
            assert_eq!(verdict.issues[0], "parse failure", "{raw}");
        }
    }

    #[test]
    fn raw_excerpt_is_truncated() {
        let raw = "x".repeat(500);
        let verdict = parse_verdict(&raw);
        assert_eq!(verdict.issues[1].len(), RAW_EXCERPT_CHARS);
    }

    #[test]
    fn directives_follow_next_action() {
        let search = ReflectionVerdict {
            next_action: NextAction::SearchMore,
            suggested_queries: vec!["vision transformers 2024".to_string()],
            ..ReflectionVerdict::default()
        };
        let directive = default_retry_directive(&search);
        assert!(directive.starts_with("Do more research with search."));
        assert!(directive.contains("vision transformers 2024"));

        let rewrite = ReflectionVerdict {
            issues: vec!["missing authors".to_string()],
            ..ReflectionVerdict::default()
        };
        let directive = default_retry_directive(&rewrite);
        assert!(directive.starts_with("Rewrite and fix:"));
        assert!(directive.contains("missing authors"));
    }

    #[test]
    fn sentinel_is_case_sensitive_substring() {
        assert!(SentinelCritic::classify("Solid summary overall. APPROVED.").passes());
        assert!(!SentinelCritic::classify("approved").passes());

        let rejected = SentinelCritic::classify("RETRY: No content found.");
        assert_eq!(rejected.next_action, NextAction::Rewrite);
        assert_eq!(
            rejected.rationale.as_deref(),
            Some("RETRY: No content found.")
        );
    }

    #[tokio::test]
    async fn engine_failure_never_escapes_the_gate() {
        let gate = JsonReflectionGate::new(Arc::new(ScriptedEngine::new(Vec::new())));
        let verdict = gate.evaluate("q", "draft").await;
        assert!(!verdict.sufficient);
        assert_eq!(verdict.next_action, NextAction::Rewrite);
    }

    #[tokio::test]
    async fn critic_directive_is_the_critique() {
        let engine = Arc::new(ScriptedEngine::new(vec![EngineReply::text(
            "RETRY: cite at least two sources.",
        )]));
        let critic = SentinelCritic::new(engine);

        let verdict = critic.evaluate("q", "draft").await;
        assert!(!verdict.passes());
        assert_eq!(
            critic.retry_directive(&verdict),
            "RETRY: cite at least two sources."
        );
    }
}
