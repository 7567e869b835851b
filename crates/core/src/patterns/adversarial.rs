//! # Adversarial Pattern
//!
//! Attacker and defender agents trade `attack` and `defense` broadcasts;
//! each side sees the other's moves as injected context. Completion is
//! plain swarm completion.

use anyhow::Result;
use serde_json::json;

use super::swarm::progress;
use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::ident::{sanitize_sender, UNKNOWN_SENDER};
use crate::state::blackboard::{tag, Blackboard};

const ATTACK: &str = "attack";
const DEFENSE: &str = "defense";

fn side_of(event: &HookEvent) -> Option<&'static str> {
    match event.agent_type.as_deref() {
        Some("attacker") => Some(ATTACK),
        Some("defender") => Some(DEFENSE),
        _ => None,
    }
}

pub struct AdversarialEngine;

impl AdversarialEngine {
    fn on_pre_tool_use(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        // Each side is briefed with the opponent's recorded moves
        let opposing = match side_of(event) {
            Some(ATTACK) => DEFENSE,
            Some(DEFENSE) => ATTACK,
            _ => return Ok(Decision::NoOp),
        };

        let moves = Blackboard::new(cx.db).list_of_type(swarm_id, opposing)?;
        if moves.is_empty() {
            return Ok(Decision::NoOp);
        }

        let lines: Vec<String> = moves
            .iter()
            .map(|b| {
                format!(
                    "- {}: {}",
                    b.sender_agent,
                    serde_json::to_string(&b.payload).unwrap_or_default()
                )
            })
            .collect();

        Ok(Decision::inject(format!(
            "Opposing side has made {} move(s):\n{}",
            moves.len(),
            lines.join("\n")
        )))
    }

    fn on_post_tool_use(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };
        let side = match side_of(event) {
            Some(side) => side,
            None => return Ok(Decision::NoOp),
        };

        // A move is whatever the agent surfaced under a matching key
        if let Some(body) = event.tool_response.as_ref().and_then(|r| r.get(side)) {
            let sender = cx
                .env
                .agent_id
                .as_deref()
                .map(sanitize_sender)
                .unwrap_or(UNKNOWN_SENDER);
            Blackboard::new(cx.db).post(swarm_id, sender, side, body)?;
        }

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
        Blackboard::new(cx.db).post(swarm_id, &sender, tag::DONE, &json!({ "auto": true }))?;
        Ok(Decision::NoOp)
    }

    fn on_stop(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);
        let progress = progress(&blackboard, swarm_id)?;
        if progress.participants > 0 && !progress.is_complete() {
            return Ok(Decision::block(format!(
                "Waiting for {} agent(s) to complete.",
                progress.missing()
            )));
        }

        let attacks = blackboard.count_any_of_type(swarm_id, ATTACK)?;
        let defenses = blackboard.count_any_of_type(swarm_id, DEFENSE)?;
        Ok(Decision::say(format!(
            "Adversarial round complete: {attacks} attack(s), {defenses} defense(s) recorded."
        )))
    }
}

impl PatternEngine for AdversarialEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::Adversarial
    }

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        match event.hook_event_name {
            HookEventName::PreToolUse => self.on_pre_tool_use(cx, event),
            HookEventName::PostToolUse => self.on_post_tool_use(cx, event),
            HookEventName::SubagentStop => self.on_subagent_stop(cx, event),
            HookEventName::Stop => self.on_stop(cx, event),
            _ => Ok(Decision::NoOp),
        }
    }
}
