//! # Map-Reduce Pattern
//!
//! Mappers fan out with swarm semantics; a distinguished reducer closes
//! the group. The reducer's `done` terminates the run even if a straggling
//! mapper never reports.

use anyhow::Result;
use serde_json::json;

use super::swarm::{progress, spawned_agent_id};
use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::ident::{sanitize_sender, UNKNOWN_SENDER};
use crate::state::blackboard::{tag, Blackboard};

pub struct MapReduceEngine;

impl MapReduceEngine {
    fn on_post_tool_use(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        if event.tool_name.as_deref() != Some("Task") {
            return Ok(Decision::NoOp);
        }
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let spawned = spawned_agent_id(event.tool_response.as_ref());
        let role = if cx.env.reducer.as_deref() == Some(spawned.as_str()) {
            "reducer"
        } else {
            "mapper"
        };

        Blackboard::new(cx.db).post(swarm_id, &spawned, tag::STARTED, &json!({ "role": role }))?;
        Ok(Decision::NoOp)
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
        blackboard.post(swarm_id, &sender, tag::DONE, &json!({ "auto": true }))?;

        if cx.env.reducer.as_deref() == Some(sender.as_str()) {
            return Ok(Decision::say(
                "Reducer completed; the map-reduce group is finished.",
            ));
        }

        Ok(Decision::NoOp)
    }

    fn on_stop(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);

        // The reducer's completion terminates the group outright
        if let Some(reducer) = cx.env.reducer.as_deref() {
            let reduced = blackboard
                .list_of_type(swarm_id, tag::DONE)?
                .iter()
                .any(|b| b.sender_agent == reducer);

            if reduced {
                return Ok(Decision::say(
                    "Map-reduce complete: the reducer has produced the combined result.",
                ));
            }

            let progress = progress(&blackboard, swarm_id)?;
            return Ok(Decision::block(format!(
                "Reducer '{}' has not completed ({} of {} participant(s) done).",
                reducer, progress.done, progress.participants
            )));
        }

        // No distinguished reducer: fall back to plain swarm completion
        let progress = progress(&blackboard, swarm_id)?;
        if progress.participants > 0 && !progress.is_complete() {
            return Ok(Decision::block(format!(
                "Waiting for {} agent(s) to complete.",
                progress.missing()
            )));
        }
        Ok(Decision::ok())
    }
}

impl PatternEngine for MapReduceEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::MapReduce
    }

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        match event.hook_event_name {
            HookEventName::PostToolUse => self.on_post_tool_use(cx, event),
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

    fn env_for(swarm: &str, reducer: &str) -> EnvContext {
        EnvContext {
            pattern: Some(PatternKind::MapReduce),
            swarm_id: Some(swarm.to_string()),
            reducer: Some(reducer.to_string()),
            ..Default::default()
        }
    }

    fn stop_of(agent: &str) -> HookEvent {
        serde_json::from_value(serde_json::json!({
            "hook_event_name": "SubagentStop",
            "session_id": "sess1",
            "agent_id": agent,
        }))
        .unwrap()
    }

    #[test]
    fn test_reducer_completion_terminates_group() {
        let path = ".waggle/test_mr.db";
        let _ = fs::remove_file(path);
        let db = CoordDb::open_at(path).unwrap();
        let env = env_for("mr1", "reducer1");
        let cx = PatternContext { db: &db, env: &env };
        let engine = MapReduceEngine;

        let coordinator_stop: HookEvent = serde_json::from_value(serde_json::json!({
            "hook_event_name": "Stop",
            "session_id": "sess1",
        }))
        .unwrap();

        // Mappers done, reducer not: held
        engine.on(&cx, &stop_of("m1")).unwrap();
        engine.on(&cx, &stop_of("m2")).unwrap();
        match engine.on(&cx, &coordinator_stop).unwrap() {
            Decision::Block { message } => assert!(message.contains("reducer1")),
            other => panic!("expected block, got {other:?}"),
        }

        // Reducer done terminates even with a straggling mapper announced
        let bb = Blackboard::new(&db);
        bb.post("mr1", "m3", tag::STARTED, &serde_json::json!({}))
            .unwrap();
        engine.on(&cx, &stop_of("reducer1")).unwrap();
        assert!(matches!(
            engine.on(&cx, &coordinator_stop).unwrap(),
            Decision::Continue { .. }
        ));

        drop(db);
        let _ = fs::remove_file(path);
    }
}
