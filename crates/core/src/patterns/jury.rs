//! # Jury Pattern
//!
//! Independent jurors each broadcast one verdict; the coordinator is held
//! until a quorum of distinct voters exists, then the tally is reported.
//! Duplicate votes from one juror count once.

use anyhow::Result;
use serde_json::json;
use std::collections::BTreeMap;

use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::ident::{sanitize_sender, UNKNOWN_SENDER};
use crate::state::blackboard::{tag, Blackboard};

fn verdict_of(event: &HookEvent) -> Option<String> {
    event
        .tool_response
        .as_ref()
        .and_then(|r| r.get("verdict"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// One vote per juror: the latest verdict from each distinct sender.
fn tally(blackboard: &Blackboard, swarm_id: &str) -> Result<BTreeMap<String, String>> {
    let mut votes = BTreeMap::new();
    for b in blackboard.list_of_type(swarm_id, tag::VERDICT)? {
        if let Some(v) = b.payload.get("verdict").and_then(|v| v.as_str()) {
            votes.insert(b.sender_agent, v.to_string());
        }
    }
    Ok(votes)
}

pub struct JuryEngine;

impl JuryEngine {
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

        if let Some(verdict) = verdict_of(event) {
            blackboard.post(swarm_id, &sender, tag::VERDICT, &json!({ "verdict": verdict }))?;
        }
        blackboard.post(swarm_id, &sender, tag::DONE, &json!({ "auto": true }))?;

        Ok(Decision::NoOp)
    }

    fn on_stop(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);
        let voters = blackboard.count_distinct_senders(swarm_id, tag::VERDICT)?;

        // Quorum: configured, or a majority of announced participants
        let quorum = cx.env.jury_quorum.unwrap_or_else(|| {
            let participants = blackboard.count_participants(swarm_id).unwrap_or(0);
            participants / 2 + 1
        });

        if voters < quorum {
            return Ok(Decision::block(format!(
                "Jury has {voters} of {quorum} required verdict(s)."
            )));
        }

        let votes = tally(&blackboard, swarm_id)?;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for verdict in votes.values() {
            *counts.entry(verdict).or_default() += 1;
        }
        let summary = counts
            .iter()
            .map(|(v, n)| format!("{v}: {n}"))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Decision::say(format!(
            "Jury reached quorum with {voters} verdict(s) ({summary})."
        )))
    }
}

impl PatternEngine for JuryEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::Jury
    }

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        match event.hook_event_name {
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

    fn env_for(swarm: &str, quorum: i64) -> EnvContext {
        EnvContext {
            pattern: Some(PatternKind::Jury),
            swarm_id: Some(swarm.to_string()),
            jury_quorum: Some(quorum),
            ..Default::default()
        }
    }

    fn juror_stop(agent: &str, verdict: &str) -> HookEvent {
        serde_json::from_value(serde_json::json!({
            "hook_event_name": "SubagentStop",
            "session_id": "sess1",
            "agent_id": agent,
            "tool_response": {"verdict": verdict},
        }))
        .unwrap()
    }

    #[test]
    fn test_quorum_gates_then_tallies() {
        let path = ".waggle/test_jury.db";
        let _ = fs::remove_file(path);
        let db = CoordDb::open_at(path).unwrap();
        let env = env_for("j1", 3);
        let cx = PatternContext { db: &db, env: &env };
        let engine = JuryEngine;

        let coordinator_stop: HookEvent = serde_json::from_value(serde_json::json!({
            "hook_event_name": "Stop",
            "session_id": "sess1",
        }))
        .unwrap();

        engine.on(&cx, &juror_stop("j_a", "approve")).unwrap();
        engine.on(&cx, &juror_stop("j_b", "reject")).unwrap();

        match engine.on(&cx, &coordinator_stop).unwrap() {
            Decision::Block { message } => assert!(message.contains("2 of 3")),
            other => panic!("expected block, got {other:?}"),
        }

        // A duplicate vote from the same juror does not reach quorum
        engine.on(&cx, &juror_stop("j_a", "approve")).unwrap();
        assert!(matches!(
            engine.on(&cx, &coordinator_stop).unwrap(),
            Decision::Block { .. }
        ));

        engine.on(&cx, &juror_stop("j_c", "approve")).unwrap();
        match engine.on(&cx, &coordinator_stop).unwrap() {
            Decision::Continue { message, .. } => {
                let message = message.unwrap();
                assert!(message.contains("approve: 2"));
                assert!(message.contains("reject: 1"));
            }
            other => panic!("expected tally, got {other:?}"),
        }

        drop(db);
        let _ = fs::remove_file(path);
    }
}
