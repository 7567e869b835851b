//! # Swarm Pattern
//!
//! Peers coordinate through the blackboard alone: every spawn is announced
//! with a `started` broadcast, every finished agent posts `done`, and the
//! swarm is in progress while fewer distinct senders have posted `done`
//! than have posted anything. The coordinator's Stop is held open until
//! the counts meet.

use anyhow::Result;
use serde_json::json;

use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::ident::{sanitize_sender, valid_id, UNKNOWN_SENDER};
use crate::state::agents::{AgentRegistry, AgentSpawn};
use crate::state::blackboard::{tag, Blackboard, Broadcast};
use crate::transfer::{self, AgentState};

/// Completion math for one swarm.
#[derive(Debug, Clone, Copy)]
pub struct SwarmProgress {
    pub participants: i64,
    pub done: i64,
}

impl SwarmProgress {
    pub fn missing(&self) -> i64 {
        (self.participants - self.done).max(0)
    }

    pub fn is_complete(&self) -> bool {
        self.participants > 0 && self.done >= self.participants
    }
}

/// Current progress of a swarm, folded through distinct senders so
/// duplicate deliveries never double-count.
pub fn progress(blackboard: &Blackboard, swarm_id: &str) -> Result<SwarmProgress> {
    Ok(SwarmProgress {
        participants: blackboard.count_participants(swarm_id)?,
        done: blackboard.count_distinct_senders(swarm_id, tag::DONE)?,
    })
}

/// Render recent broadcasts from other senders as injectable context.
pub fn format_peer_context(broadcasts: &[Broadcast]) -> Option<String> {
    if broadcasts.is_empty() {
        return None;
    }

    let mut lines = vec![format!(
        "Recent activity from {} other swarm member(s):",
        broadcasts
            .iter()
            .map(|b| b.sender_agent.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len()
    )];

    for b in broadcasts {
        let payload = serde_json::to_string(&b.payload).unwrap_or_default();
        let payload = if payload == "{}" || payload == "null" {
            String::new()
        } else {
            format!(" {payload}")
        };
        lines.push(format!("- [{}] {}:{}", b.broadcast_type, b.sender_agent, payload));
    }

    Some(lines.join("\n"))
}

/// Extract the id of an agent spawned by a `Task` call from the tool
/// response. Falls back to `unknown` when absent or invalid.
pub fn spawned_agent_id(tool_response: Option<&serde_json::Value>) -> String {
    let candidate = tool_response.and_then(|r| {
        r.get("agent_id")
            .or_else(|| r.get("agentId"))
            .or_else(|| r.get("id"))
            .and_then(|v| v.as_str())
    });

    match candidate {
        Some(id) if valid_id(id) => id.to_string(),
        Some(other) => {
            tracing::warn!("spawned agent id {:?} fails the id grammar", other);
            UNKNOWN_SENDER.to_string()
        }
        None => UNKNOWN_SENDER.to_string(),
    }
}

/// The agent state to hand off at SubagentStop: the agent's structured
/// output if it surfaced one, otherwise a minimal trail of where it left
/// off.
fn handoff_state(event: &HookEvent) -> AgentState {
    if let Some(output) = event.tool_response.as_ref() {
        if let Some(state) = AgentState::from_structured_output(output) {
            return state;
        }
    }

    AgentState {
        context: json!({
            "session_id": event.session_id,
            "transcript_path": event.transcript_path,
            "agent_type": event.agent_type,
        }),
        memory: json!({}),
        progress: 100,
        pending_tasks: Vec::new(),
    }
}

pub struct SwarmEngine;

impl SwarmEngine {
    fn on_subagent_start(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        if !cx.env.state_transfer {
            return Ok(Decision::NoOp);
        }

        let dst = match event.agent_id.as_deref().filter(|id| valid_id(id)) {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);
        match transfer::restore(&blackboard, swarm_id, dst)? {
            Some(restored) => Ok(Decision::say(format!(
                "Restored state from {}: progress {}%, {} pending task(s).",
                restored.from,
                restored.state.progress,
                restored.state.pending_tasks.len()
            ))),
            None => Ok(Decision::NoOp),
        }
    }

    fn on_post_tool_use(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        if event.tool_name.as_deref() != Some("Task") {
            return Ok(Decision::NoOp);
        }
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let spawned = spawned_agent_id(event.tool_response.as_ref());
        let blackboard = Blackboard::new(cx.db);
        blackboard.post(
            swarm_id,
            &spawned,
            tag::STARTED,
            &json!({ "spawned_by": cx.env.agent_id }),
        )?;

        let registry = AgentRegistry::new(cx.db);
        if spawned != UNKNOWN_SENDER {
            registry.register(
                &spawned,
                &event.session_id,
                AgentSpawn {
                    pattern: Some(PatternKind::Swarm.as_str()),
                    parent_agent_id: cx.env.agent_id.as_deref(),
                    ..Default::default()
                },
            )?;
        }

        // Admission is advisory: the runtime reports pressure, the host
        // decides whether to keep spawning.
        if let Some(cap) = cx.env.max_agents {
            let running = registry.count_running()?;
            if running > cap {
                return Ok(Decision::say(format!(
                    "{running} agent(s) running exceeds the advisory cap of {cap}; consider waiting for completions before spawning more."
                )));
            }
        }

        Ok(Decision::NoOp)
    }

    fn on_pre_tool_use(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);
        let others = blackboard.read(swarm_id, None, cx.env.agent_id.as_deref(), None)?;

        match format_peer_context(&others) {
            Some(context) => Ok(Decision::inject(context)),
            None => Ok(Decision::NoOp),
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
            .or(cx.env.agent_id.as_deref())
            .map(sanitize_sender)
            .unwrap_or(UNKNOWN_SENDER)
            .to_string();

        let blackboard = Blackboard::new(cx.db);
        blackboard.post(swarm_id, &sender, tag::DONE, &json!({ "auto": true }))?;

        if let Some(target) = cx.env.handoff_target.as_deref() {
            let state = handoff_state(event);
            // A state that fails validation skips the publish; the done
            // broadcast above already stands.
            if let Err(e) = transfer::publish(&blackboard, swarm_id, &sender, target, &state) {
                tracing::warn!("skipping state handoff {} -> {}: {}", sender, target, e);
            }
        }

        let progress = progress(&blackboard, swarm_id)?;
        if progress.is_complete() {
            return Ok(Decision::say(format!(
                "All {} swarm agent(s) have reported done. Synthesize their broadcasts into a final answer.",
                progress.participants
            )));
        }

        Ok(Decision::NoOp)
    }

    fn on_stop(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);
        let progress = progress(&blackboard, swarm_id)?;

        if progress.participants == 0 {
            return Ok(Decision::ok());
        }

        if !progress.is_complete() {
            return Ok(Decision::block(format!(
                "Waiting for {} agent(s) to complete.",
                progress.missing()
            )));
        }

        Ok(Decision::say(format!(
            "Swarm complete: {} agent(s) reported done. Synthesize their broadcasts into a final answer.",
            progress.done
        )))
    }
}

impl PatternEngine for SwarmEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::Swarm
    }

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        match event.hook_event_name {
            HookEventName::SubagentStart => self.on_subagent_start(cx, event),
            HookEventName::PostToolUse => self.on_post_tool_use(cx, event),
            HookEventName::PreToolUse => self.on_pre_tool_use(cx, event),
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

    fn open_db(path: &str) -> CoordDb {
        let _ = fs::remove_file(path);
        CoordDb::open_at(path).unwrap()
    }

    fn env_for(swarm: &str) -> EnvContext {
        EnvContext {
            pattern: Some(PatternKind::Swarm),
            swarm_id: Some(swarm.to_string()),
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
    fn test_spawned_agent_id_validation() {
        let ok = serde_json::json!({"agent_id": "a1"});
        assert_eq!(spawned_agent_id(Some(&ok)), "a1");

        let bad = serde_json::json!({"agent_id": "no spaces allowed"});
        assert_eq!(spawned_agent_id(Some(&bad)), UNKNOWN_SENDER);

        assert_eq!(spawned_agent_id(None), UNKNOWN_SENDER);
    }

    #[test]
    fn test_swarm_completion_scenario() {
        let path = ".waggle/test_swarm_scenario.db";
        let db = open_db(path);
        let env = env_for("s1");
        let cx = PatternContext { db: &db, env: &env };
        let engine = SwarmEngine;

        // Three Task completions announce a1, a2, a3
        for id in ["a1", "a2", "a3"] {
            let mut ev = event(HookEventName::PostToolUse);
            ev.tool_name = Some("Task".to_string());
            ev.tool_response = Some(serde_json::json!({"agent_id": id}));
            engine.on(&cx, &ev).unwrap();
        }

        // a1 finishes
        let mut stop_a1 = event(HookEventName::SubagentStop);
        stop_a1.agent_id = Some("a1".to_string());
        engine.on(&cx, &stop_a1).unwrap();

        // Coordinator Stop is held with the exact missing count
        let decision = engine.on(&cx, &event(HookEventName::Stop)).unwrap();
        assert_eq!(
            decision,
            Decision::block("Waiting for 2 agent(s) to complete.")
        );

        // a2 and a3 finish
        for id in ["a2", "a3"] {
            let mut ev = event(HookEventName::SubagentStop);
            ev.agent_id = Some(id.to_string());
            engine.on(&cx, &ev).unwrap();
        }

        // Stop now passes with a synthesis hint
        let decision = engine.on(&cx, &event(HookEventName::Stop)).unwrap();
        match decision {
            Decision::Continue { message, .. } => {
                assert!(message.unwrap().contains("Synthesize"));
            }
            other => panic!("expected continue, got {other:?}"),
        }

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_duplicate_done_does_not_complete_early() {
        let path = ".waggle/test_swarm_dupdone.db";
        let db = open_db(path);
        let env = env_for("s1");
        let cx = PatternContext { db: &db, env: &env };
        let engine = SwarmEngine;

        for id in ["a1", "a2"] {
            let mut ev = event(HookEventName::PostToolUse);
            ev.tool_name = Some("Task".to_string());
            ev.tool_response = Some(serde_json::json!({"agent_id": id}));
            engine.on(&cx, &ev).unwrap();
        }

        // a1 emits done twice (at-least-once delivery)
        for _ in 0..2 {
            let mut ev = event(HookEventName::SubagentStop);
            ev.agent_id = Some("a1".to_string());
            engine.on(&cx, &ev).unwrap();
        }

        let decision = engine.on(&cx, &event(HookEventName::Stop)).unwrap();
        assert_eq!(
            decision,
            Decision::block("Waiting for 1 agent(s) to complete.")
        );

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_pre_tool_use_injects_peer_context() {
        let path = ".waggle/test_swarm_context.db";
        let db = open_db(path);
        let mut env = env_for("s1");
        env.agent_id = Some("me".to_string());
        let cx = PatternContext { db: &db, env: &env };
        let engine = SwarmEngine;

        let bb = Blackboard::new(&db);
        bb.post("s1", "me", tag::FINDING, &serde_json::json!({"x": 1}))
            .unwrap();
        bb.post("s1", "peer", tag::FINDING, &serde_json::json!({"y": 2}))
            .unwrap();

        let decision = engine.on(&cx, &event(HookEventName::PreToolUse)).unwrap();
        match decision {
            Decision::Continue { context, .. } => {
                let context = context.unwrap();
                assert!(context.contains("peer"));
                assert!(!context.contains("\"me\""));
            }
            other => panic!("expected context injection, got {other:?}"),
        }

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_handoff_publishes_state_on_stop() {
        let path = ".waggle/test_swarm_handoff.db";
        let db = open_db(path);
        let mut env = env_for("s1");
        env.handoff_target = Some("a_next".to_string());
        env.state_transfer = true;
        let cx = PatternContext { db: &db, env: &env };
        let engine = SwarmEngine;

        let mut ev = event(HookEventName::SubagentStop);
        ev.agent_id = Some("a_old".to_string());
        ev.tool_response = Some(serde_json::json!({
            "state": {"context": {}, "memory": {}, "progress": 42, "pendingTasks": ["t1"]}
        }));
        engine.on(&cx, &ev).unwrap();

        // The successor restores it on SubagentStart
        let mut start = event(HookEventName::SubagentStart);
        start.agent_id = Some("a_next".to_string());
        let decision = engine.on(&cx, &start).unwrap();
        match decision {
            Decision::Continue { message, .. } => {
                let message = message.unwrap();
                assert!(message.contains("42%"));
                assert!(message.contains("a_old"));
            }
            other => panic!("expected restore message, got {other:?}"),
        }

        drop(db);
        let _ = fs::remove_file(path);
    }
}
