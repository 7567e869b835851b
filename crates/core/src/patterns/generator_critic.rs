//! # Generator / Critic Pattern
//!
//! A two-agent loop: the generator drafts, the critic reviews. The critic's
//! latest critique gates the loop: the coordinator cannot stop until the
//! critic has approved a draft.

use anyhow::Result;
use serde_json::json;

use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::ident::{sanitize_sender, UNKNOWN_SENDER};
use crate::state::blackboard::{tag, Blackboard};

const DRAFT: &str = "draft";

/// Which side of the loop an agent is on, from its declared type.
fn role_of(event: &HookEvent) -> Option<&str> {
    match event.agent_type.as_deref() {
        Some("critic") => Some("critic"),
        Some("generator") => Some("generator"),
        _ => None,
    }
}

fn verdict_of(event: &HookEvent) -> String {
    event
        .tool_response
        .as_ref()
        .and_then(|r| r.get("verdict"))
        .and_then(|v| v.as_str())
        .unwrap_or("revise")
        .to_string()
}

pub struct GeneratorCriticEngine;

impl GeneratorCriticEngine {
    fn on_subagent_start(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);
        match role_of(event) {
            // The generator resumes with the critic's latest feedback
            Some("generator") => match blackboard.latest_of_type(swarm_id, tag::CRITIQUE)? {
                Some(critique) => Ok(Decision::inject(format!(
                    "Latest critique from {}: {}",
                    critique.sender_agent,
                    serde_json::to_string(&critique.payload).unwrap_or_default()
                ))),
                None => Ok(Decision::NoOp),
            },
            // The critic reviews the latest draft
            Some("critic") => match blackboard.latest_of_type(swarm_id, DRAFT)? {
                Some(draft) => Ok(Decision::inject(format!(
                    "Draft under review from {}: {}",
                    draft.sender_agent,
                    serde_json::to_string(&draft.payload).unwrap_or_default()
                ))),
                None => Ok(Decision::say(
                    "No draft exists yet; the generator has not produced one.",
                )),
            },
            Some(_) | None => Ok(Decision::NoOp),
        }
    }

    fn on_subagent_stop(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let sender = event
            .agent_id
            .as_deref()
            .map(sanitize_sender)
            .unwrap_or(UNKNOWN_SENDER)
            .to_string();
        let blackboard = Blackboard::new(cx.db);

        match role_of(event) {
            Some("generator") => {
                let summary = event
                    .tool_response
                    .as_ref()
                    .and_then(|r| r.get("summary"))
                    .cloned()
                    .unwrap_or(json!(null));
                blackboard.post(swarm_id, &sender, DRAFT, &json!({ "summary": summary }))?;
                Ok(Decision::NoOp)
            }
            Some("critic") => {
                let verdict = verdict_of(event);
                blackboard.post(swarm_id, &sender, tag::CRITIQUE, &json!({ "verdict": verdict }))?;
                blackboard.post(swarm_id, &sender, tag::DONE, &json!({ "auto": true }))?;

                if verdict == "approved" {
                    Ok(Decision::say("Critic approved the draft; the loop is complete."))
                } else {
                    Ok(Decision::say(format!(
                        "Critic verdict: {verdict}. Run the generator again with the critique."
                    )))
                }
            }
            Some(_) | None => Ok(Decision::NoOp),
        }
    }

    fn on_stop(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);
        match blackboard.latest_of_type(swarm_id, tag::CRITIQUE)? {
            Some(critique)
                if critique.payload.get("verdict").and_then(|v| v.as_str()) == Some("approved") =>
            {
                Ok(Decision::say("Generator/critic loop converged: draft approved."))
            }
            Some(_) => Ok(Decision::block(
                "The critic has not approved the latest draft; continue the loop.",
            )),
            None => Ok(Decision::block(
                "No critique recorded yet; the generator/critic loop has not run.",
            )),
        }
    }
}

impl PatternEngine for GeneratorCriticEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::GeneratorCritic
    }

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        match event.hook_event_name {
            HookEventName::SubagentStart => self.on_subagent_start(cx, event),
            HookEventName::SubagentStop => self.on_subagent_stop(cx, event),
            HookEventName::Stop => self.on_stop(cx, event),
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

    fn env_for(swarm: &str) -> EnvContext {
        EnvContext {
            pattern: Some(PatternKind::GeneratorCritic),
            swarm_id: Some(swarm.to_string()),
            ..Default::default()
        }
    }

    fn stop_event(agent: &str, agent_type: &str, response: serde_json::Value) -> HookEvent {
        serde_json::from_value(serde_json::json!({
            "hook_event_name": "SubagentStop",
            "session_id": "sess1",
            "agent_id": agent,
            "agent_type": agent_type,
            "tool_response": response,
        }))
        .unwrap()
    }

    #[test]
    fn test_critic_gates_the_loop() {
        let path = ".waggle/test_gc_loop.db";
        let _ = fs::remove_file(path);
        let db = CoordDb::open_at(path).unwrap();
        let env = env_for("gc1");
        let cx = PatternContext { db: &db, env: &env };
        let engine = GeneratorCriticEngine;

        let coordinator_stop: HookEvent = serde_json::from_value(serde_json::json!({
            "hook_event_name": "Stop",
            "session_id": "sess1",
        }))
        .unwrap();

        // Nothing reviewed yet: held
        assert!(matches!(
            engine.on(&cx, &coordinator_stop).unwrap(),
            Decision::Block { .. }
        ));

        // Draft, then a rejection: still held
        engine
            .on(&cx, &stop_event("gen", "generator", serde_json::json!({"summary": "v1"})))
            .unwrap();
        engine
            .on(&cx, &stop_event("crit", "critic", serde_json::json!({"verdict": "revise"})))
            .unwrap();
        assert!(matches!(
            engine.on(&cx, &coordinator_stop).unwrap(),
            Decision::Block { .. }
        ));

        // Approval releases the loop
        engine
            .on(&cx, &stop_event("crit", "critic", serde_json::json!({"verdict": "approved"})))
            .unwrap();
        assert!(matches!(
            engine.on(&cx, &coordinator_stop).unwrap(),
            Decision::Continue { .. }
        ));

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_generator_resumes_with_critique() {
        let path = ".waggle/test_gc_resume.db";
        let _ = fs::remove_file(path);
        let db = CoordDb::open_at(path).unwrap();
        let env = env_for("gc1");
        let cx = PatternContext { db: &db, env: &env };
        let engine = GeneratorCriticEngine;

        engine
            .on(&cx, &stop_event("crit", "critic", serde_json::json!({"verdict": "revise"})))
            .unwrap();

        let start: HookEvent = serde_json::from_value(serde_json::json!({
            "hook_event_name": "SubagentStart",
            "session_id": "sess1",
            "agent_id": "gen",
            "agent_type": "generator",
        }))
        .unwrap();

        match engine.on(&cx, &start).unwrap() {
            Decision::Continue { context, .. } => {
                assert!(context.unwrap().contains("revise"));
            }
            other => panic!("expected critique injection, got {other:?}"),
        }

        drop(db);
        let _ = fs::remove_file(path);
    }
}
