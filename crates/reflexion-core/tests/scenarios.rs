use std::sync::Arc;

use chrono::NaiveDate;
use reflexion_core::capabilities::{
    ArtifactStore, FileArtifactStore, MemoryArtifactStore, PAPER_SEARCH_TOOL, Paper, SAVE_TOOL,
    SearchHit, StaticSearch, WEB_SEARCH_TOOL, generator_tools, researcher_tools,
};
use reflexion_core::{
    EngineReply, GeneratorStage, Guardrails, JsonReflectionGate, LimitKind, Orchestrator, Origin,
    Role, RunOutcome, RunState, ScriptedEngine, SentinelCritic, ToolCall,
};
use serde_json::json;

fn verdict(sufficient: bool, next_action: &str) -> EngineReply {
    EngineReply::text(format!(
        r#"```json
{{"sufficient": {sufficient}, "issues": [], "next_action": "{next_action}", "suggested_queries": ["follow-up query"]}}
```"#
    ))
}

fn papers() -> Vec<Paper> {
    (1..=3)
        .map(|idx| Paper {
            title: format!("Diffusion Paper {idx}"),
            authors: vec!["A. Researcher".to_string()],
            published_date: NaiveDate::from_ymd_opt(2024, 5, idx),
            link: format!("https://arxiv.org/abs/2405.0000{idx}"),
            summary: "We study diffusion.".to_string(),
        })
        .collect()
}

#[tokio::test]
async fn paper_query_finalizes_on_first_sufficient_draft() {
    let query = "Find 3 recent papers on diffusion models";
    let search = Arc::new(StaticSearch::new().with_papers(papers()));
    let answer = papers()
        .iter()
        .map(|paper| format!("- {} ({})", paper.title, paper.link))
        .collect::<Vec<_>>()
        .join("\n");

    let engine = Arc::new(ScriptedEngine::new(vec![
        EngineReply::tool_calls(vec![ToolCall::new(
            "call_1",
            PAPER_SEARCH_TOOL,
            json!({"query": "diffusion models", "max_results": 3, "sort": "submitted"}),
        )]),
        EngineReply::text(answer.clone()),
    ]));
    let gate = Arc::new(JsonReflectionGate::new(Arc::new(ScriptedEngine::new(vec![
        verdict(true, "finalize"),
    ]))));

    let orchestrator = Orchestrator::new(Guardrails::default(), engine.clone(), gate)
        .expect("valid guardrails")
        .with_researcher_tools(researcher_tools(query, search.clone(), search));
    let result = orchestrator.run(query).await.expect("run succeeds");

    assert_eq!(result.outcome, RunOutcome::Finalized);
    assert_eq!(result.steps_taken, 1);
    assert_eq!(result.retries_used, 0);
    assert_eq!(result.final_text, answer);
    for paper in papers() {
        assert!(result.final_text.contains(&paper.title));
        assert!(result.final_text.contains(&paper.link));
    }

    let observation = result
        .transcript
        .turns()
        .iter()
        .find(|turn| turn.role == Role::ToolObservation)
        .expect("observation turn");
    assert_eq!(observation.tool_call_id.as_deref(), Some("call_1"));
    assert!(observation.content.contains("Diffusion Paper 3"));
}

#[tokio::test]
async fn search_more_twice_then_sufficient_uses_two_retries() {
    let engine = Arc::new(ScriptedEngine::new(vec![
        EngineReply::text("draft one"),
        EngineReply::text("draft two"),
        EngineReply::text("draft three https://example.com"),
    ]));
    let gate = Arc::new(JsonReflectionGate::new(Arc::new(ScriptedEngine::new(vec![
        verdict(false, "search_more"),
        verdict(false, "search_more"),
        verdict(true, "finalize"),
    ]))));

    let orchestrator =
        Orchestrator::new(Guardrails::default(), engine.clone(), gate).expect("valid guardrails");
    let result = orchestrator.run("solid state battery outlook").await.expect("run succeeds");

    assert_eq!(result.outcome, RunOutcome::Finalized);
    assert_eq!(result.retries_used, 2);
    assert_eq!(result.steps_taken, 3);
    assert_eq!(engine.calls(), 3);
    assert_eq!(result.final_text, "draft three https://example.com");

    let directives: Vec<_> = result
        .transcript
        .turns()
        .iter()
        .filter(|turn| turn.origin == Origin::Critic)
        .collect();
    assert_eq!(directives.len(), 2);
    assert!(directives.iter().all(|turn| turn.role == Role::User));
    assert!(directives[0].content.contains("follow-up query"));
}

#[tokio::test]
async fn single_step_budget_returns_the_only_draft() {
    let engine = Arc::new(ScriptedEngine::new(vec![EngineReply::text("partial draft")]));
    let gate = Arc::new(JsonReflectionGate::new(Arc::new(ScriptedEngine::new(vec![
        verdict(false, "rewrite"),
    ]))));

    let orchestrator = Orchestrator::new(Guardrails::new(1, 2, 60).expect("valid"), engine, gate)
        .expect("valid guardrails");
    let result = orchestrator.run("battery outlook").await.expect("run succeeds");

    assert_eq!(result.outcome, RunOutcome::AbortedLimit(LimitKind::Steps));
    assert_eq!(result.steps_taken, 1);
    assert_eq!(result.retries_used, 1);
    assert_eq!(result.final_text, "partial draft");
}

#[tokio::test]
async fn approved_critique_hands_off_to_generator() {
    let researcher = Arc::new(ScriptedEngine::new(vec![EngineReply::text(
        "Researched notes with https://example.com/source",
    )]));
    let critic = Arc::new(SentinelCritic::new(Arc::new(ScriptedEngine::new(vec![
        EngineReply::text("Sources are cited and claims hold. APPROVED"),
    ]))));
    let report = "# Report\n\nFindings with https://example.com/source";
    let writer = Arc::new(ScriptedEngine::new(vec![EngineReply::tool_calls(vec![
        ToolCall::new(
            "save_1",
            SAVE_TOOL,
            json!({"content": report, "filename": "report.md"}),
        ),
    ])]));
    let store = Arc::new(MemoryArtifactStore::new());

    let orchestrator = Orchestrator::new(Guardrails::default(), researcher.clone(), critic)
        .expect("valid guardrails")
        .with_generator(GeneratorStage::new(
            writer.clone(),
            generator_tools(store.clone()),
        ));
    let result = orchestrator.run("battery outlook").await.expect("run succeeds");

    assert_eq!(result.outcome, RunOutcome::Finalized);
    assert_eq!(researcher.calls(), 1);
    assert_eq!(writer.calls(), 1);
    assert_eq!(result.final_text, report);
    assert_eq!(store.get("report.md").as_deref(), Some(report));

    let writer_prompt = &writer.prompts()[0];
    assert!(
        writer_prompt
            .turns
            .iter()
            .any(|turn| turn.origin == Origin::Critic && turn.content.contains("APPROVED"))
    );
    assert_eq!(writer_prompt.tools.len(), 1);
    assert_eq!(writer_prompt.tools[0].name, SAVE_TOOL);
}

#[tokio::test]
async fn unknown_tool_becomes_an_observation() {
    let engine = Arc::new(ScriptedEngine::new(vec![
        EngineReply::tool_calls(vec![ToolCall::new("c1", "do_magic", json!({}))]),
        EngineReply::text("answer despite the missing tool"),
    ]));
    let gate = Arc::new(JsonReflectionGate::new(Arc::new(ScriptedEngine::new(vec![
        verdict(true, "finalize"),
    ]))));

    let orchestrator =
        Orchestrator::new(Guardrails::default(), engine, gate).expect("valid guardrails");
    let result = orchestrator.run("battery outlook").await.expect("run succeeds");

    assert_eq!(result.outcome, RunOutcome::Finalized);
    assert_eq!(result.final_text, "answer despite the missing tool");
    assert!(result.transcript.turns().iter().any(|turn| {
        turn.role == Role::ToolObservation && turn.content.contains("Unknown tool: do_magic")
    }));
}

#[tokio::test]
async fn observations_follow_request_order() {
    let query = "battery market drivers";
    let search = Arc::new(StaticSearch::new().with_hits(vec![SearchHit {
        title: "Battery market".to_string(),
        snippet: "Demand grows".to_string(),
        url: "https://example.com/battery".to_string(),
    }]));
    let engine = Arc::new(ScriptedEngine::new(vec![
        EngineReply::tool_calls(vec![
            ToolCall::new("first", WEB_SEARCH_TOOL, json!({"query": "battery demand"})),
            ToolCall::new("second", "do_magic", json!({})),
            ToolCall::new("third", WEB_SEARCH_TOOL, json!({"query": "battery supply"})),
        ]),
        EngineReply::text("answer https://example.com/battery"),
    ]));
    let gate = Arc::new(JsonReflectionGate::new(Arc::new(ScriptedEngine::new(vec![
        verdict(true, "finalize"),
    ]))));

    let orchestrator = Orchestrator::new(Guardrails::default(), engine, gate)
        .expect("valid guardrails")
        .with_researcher_tools(researcher_tools(query, search.clone(), search));
    let result = orchestrator.run(query).await.expect("run succeeds");

    let ids: Vec<_> = result
        .transcript
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::ToolObservation)
        .filter_map(|turn| turn.tool_call_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
    assert_eq!(result.memory.sources.len(), 3);
}

#[tokio::test]
async fn checkpointing_identical_content_is_idempotent() {
    let temp = tempfile::TempDir::new().expect("temp dir");
    let store = Arc::new(FileArtifactStore::new(temp.path()));

    let engine = Arc::new(ScriptedEngine::new(vec![
        EngineReply::text("same draft"),
        EngineReply::text("same draft"),
    ]));
    let gate = Arc::new(JsonReflectionGate::new(Arc::new(ScriptedEngine::new(vec![
        verdict(false, "rewrite"),
        verdict(true, "finalize"),
    ]))));

    let orchestrator = Orchestrator::new(Guardrails::default(), engine, gate)
        .expect("valid guardrails")
        .with_checkpoint(store.clone(), "report.md");
    let result = orchestrator.run("battery outlook").await.expect("run succeeds");
    assert_eq!(result.outcome, RunOutcome::Finalized);

    store
        .save("report.md", "same draft")
        .await
        .expect("second save");
    let entries: Vec<_> = std::fs::read_dir(temp.path())
        .expect("read dir")
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        std::fs::read_to_string(temp.path().join("report.md")).expect("artifact"),
        "same draft"
    );
}

#[tokio::test]
async fn counters_stay_within_guardrails() {
    let drafts = (0..10).map(|idx| EngineReply::text(format!("draft {idx}")));
    let verdicts = (0..10).map(|_| verdict(false, "rewrite"));
    let engine = Arc::new(ScriptedEngine::new(drafts));
    let gate = Arc::new(JsonReflectionGate::new(Arc::new(ScriptedEngine::new(
        verdicts,
    ))));
    let guardrails = Guardrails::new(4, 3, 60).expect("valid");

    let orchestrator =
        Orchestrator::new(guardrails, engine, gate).expect("valid guardrails");
    let result = orchestrator.run("battery outlook").await.expect("run succeeds");

    assert!(result.steps_taken <= guardrails.max_steps);
    assert!(result.retries_used <= guardrails.max_retries);
    assert_eq!(result.outcome, RunOutcome::AbortedLimit(LimitKind::Retries));
    assert_eq!(result.final_text, "draft 3");
    assert_eq!(
        result.trace.states().last().copied(),
        Some(RunState::AbortedLimit)
    );
}
