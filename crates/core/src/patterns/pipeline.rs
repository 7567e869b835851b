//! # Pipeline Pattern
//!
//! Stages run in order; each stage's output is persisted as an artifact
//! and injected into every later stage. A stage that declares mandatory
//! upstream is held when the trail is empty, and a stage that finishes
//! without producing anything is called out at its own SubagentStop.

use anyhow::Result;

use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::state::artifacts::{ArtifactStore, PipelineArtifact};

/// An artifact extracted from a stage agent's structured output.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub artifact_type: String,
    pub path: Option<String>,
    pub content: Option<String>,
}

/// Pull a produced artifact out of the agent's structured output. Hosts
/// surface it under an `artifact` key with a type plus a path or literal
/// content.
pub fn extract_stage_output(tool_response: Option<&serde_json::Value>) -> Option<StageOutput> {
    let artifact = tool_response?.get("artifact")?;

    let artifact_type = artifact
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("output")
        .to_string();
    let path = artifact
        .get("path")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let content = artifact
        .get("content")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if path.is_none() && content.is_none() {
        return None;
    }

    Some(StageOutput {
        artifact_type,
        path,
        content,
    })
}

/// Render upstream artifacts as injectable context for the current stage.
fn format_upstream(artifacts: &[PipelineArtifact]) -> String {
    let mut lines = vec![format!(
        "Upstream pipeline output ({} artifact(s)):",
        artifacts.len()
    )];

    for a in artifacts {
        let body = match (&a.artifact_path, &a.artifact_content) {
            (Some(path), _) => format!("at {path}"),
            (None, Some(content)) => content.clone(),
            (None, None) => String::new(),
        };
        lines.push(format!(
            "- stage {} [{}]: {}",
            a.stage_index, a.artifact_type, body
        ));
    }

    lines.join("\n")
}

/// The stages before `stage` that never produced anything.
fn missing_stages(produced: &[i64], stage: i64) -> Vec<i64> {
    (0..stage).filter(|i| !produced.contains(i)).collect()
}

pub struct PipelineEngine;

impl PipelineEngine {
    fn on_subagent_start(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let (pipeline_id, stage) = match (cx.env.pipeline_id.as_deref(), cx.env.stage_index) {
            (Some(id), Some(stage)) => (id, stage),
            _ => return Ok(Decision::NoOp),
        };

        let store = ArtifactStore::new(cx.db);
        let upstream = store.upstream_of(pipeline_id, stage)?;

        if upstream.is_empty() {
            if stage == 0 {
                return Ok(Decision::NoOp);
            }

            let missing = missing_stages(&store.stages_with_output(pipeline_id)?, stage);
            let message = format!(
                "No upstream artifacts for pipeline '{}' stage {}; stage(s) {} produced nothing.",
                pipeline_id,
                stage,
                missing
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            // A stage that requires upstream cannot usefully start
            if cx.env.mandatory_upstream {
                return Ok(Decision::block(message));
            }
            return Ok(Decision::say(message));
        }

        Ok(Decision::inject(format_upstream(&upstream)))
    }

    fn on_subagent_stop(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let (pipeline_id, stage) = match (cx.env.pipeline_id.as_deref(), cx.env.stage_index) {
            (Some(id), Some(stage)) => (id, stage),
            _ => return Ok(Decision::NoOp),
        };

        let store = ArtifactStore::new(cx.db);

        match extract_stage_output(event.tool_response.as_ref()) {
            Some(output) => {
                store.record(
                    pipeline_id,
                    stage,
                    &output.artifact_type,
                    output.path.as_deref(),
                    output.content.as_deref(),
                )?;
                Ok(Decision::NoOp)
            }
            None if cx.env.mandatory_upstream => Ok(Decision::block(format!(
                "Pipeline '{pipeline_id}' stage {stage} finished without an artifact; \
                 downstream stages depend on its output. Emit an artifact (path or content) before stopping."
            ))),
            None => Ok(Decision::NoOp),
        }
    }
}

impl PatternEngine for PipelineEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::Pipeline
    }

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        match event.hook_event_name {
            HookEventName::SubagentStart => self.on_subagent_start(cx, event),
            HookEventName::SubagentStop => self.on_subagent_stop(cx, event),
            _ => Ok(Decision::NoOp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::envctx::EnvContext;
    use crate::state::db::CoordDb;
    use std::fs;

    fn open_db(path: &str) -> CoordDb {
        let _ = fs::remove_file(path);
        CoordDb::open_at(path).unwrap()
    }

    fn env_for(pipeline: &str, stage: i64, mandatory: bool) -> EnvContext {
        EnvContext {
            pattern: Some(PatternKind::Pipeline),
            pipeline_id: Some(pipeline.to_string()),
            stage_index: Some(stage),
            mandatory_upstream: mandatory,
            ..Default::default()
        }
    }

    fn event(name: HookEventName) -> HookEvent {
        serde_json::from_value(serde_json::json!({
            "hook_event_name": name,
            "session_id": "sess1",
        }))
        .unwrap()
    }

    #[test]
    fn test_extract_stage_output() {
        let with_path = serde_json::json!({"artifact": {"type": "plan", "path": "plan.md"}});
        let out = extract_stage_output(Some(&with_path)).unwrap();
        assert_eq!(out.artifact_type, "plan");
        assert_eq!(out.path.as_deref(), Some("plan.md"));

        // An artifact with neither path nor content is not an artifact
        let hollow = serde_json::json!({"artifact": {"type": "plan"}});
        assert!(extract_stage_output(Some(&hollow)).is_none());
        assert!(extract_stage_output(None).is_none());
    }

    #[test]
    fn test_stage_reads_upstream_artifacts() {
        let path = ".waggle/test_pipeline_upstream.db";
        let db = open_db(path);
        let engine = PipelineEngine;

        // Stage 0 produces
        let env0 = env_for("p1", 0, false);
        let cx0 = PatternContext { db: &db, env: &env0 };
        let mut stop = event(HookEventName::SubagentStop);
        stop.tool_response = Some(serde_json::json!({
            "artifact": {"type": "plan", "content": "three step plan"}
        }));
        engine.on(&cx0, &stop).unwrap();

        // Stage 1 sees it injected
        let env1 = env_for("p1", 1, false);
        let cx1 = PatternContext { db: &db, env: &env1 };
        let decision = engine.on(&cx1, &event(HookEventName::SubagentStart)).unwrap();
        match decision {
            Decision::Continue { context, .. } => {
                let context = context.unwrap();
                assert!(context.contains("stage 0"));
                assert!(context.contains("three step plan"));
            }
            other => panic!("expected injected context, got {other:?}"),
        }

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_mandatory_upstream_blocks_start() {
        let path = ".waggle/test_pipeline_missing.db";
        let db = open_db(path);
        let engine = PipelineEngine;

        let env = env_for("p1", 2, true);
        let cx = PatternContext { db: &db, env: &env };
        let decision = engine.on(&cx, &event(HookEventName::SubagentStart)).unwrap();

        match decision {
            Decision::Block { message } => {
                assert!(message.contains("stage 2"));
                assert!(message.contains("0, 1"));
            }
            other => panic!("expected block, got {other:?}"),
        }

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_upstream_is_advisory_when_not_mandatory() {
        let path = ".waggle/test_pipeline_advisory.db";
        let db = open_db(path);
        let engine = PipelineEngine;

        let env = env_for("p1", 1, false);
        let cx = PatternContext { db: &db, env: &env };
        let decision = engine.on(&cx, &event(HookEventName::SubagentStart)).unwrap();

        assert!(matches!(decision, Decision::Continue { .. }));

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_mandatory_stage_without_artifact_blocks_stop() {
        let path = ".waggle/test_pipeline_noartifact.db";
        let db = open_db(path);
        let engine = PipelineEngine;

        let env = env_for("p1", 0, true);
        let cx = PatternContext { db: &db, env: &env };
        let decision = engine.on(&cx, &event(HookEventName::SubagentStop)).unwrap();

        match decision {
            Decision::Block { message } => assert!(message.contains("without an artifact")),
            other => panic!("expected block, got {other:?}"),
        }

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_stage_zero_start_is_quiet() {
        let path = ".waggle/test_pipeline_zero.db";
        let db = open_db(path);
        let engine = PipelineEngine;

        let env = env_for("p1", 0, true);
        let cx = PatternContext { db: &db, env: &env };
        let decision = engine.on(&cx, &event(HookEventName::SubagentStart)).unwrap();
        assert_eq!(decision, Decision::NoOp);

        drop(db);
        let _ = fs::remove_file(path);
    }
}
