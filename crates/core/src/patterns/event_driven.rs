//! # Event-Driven Pattern
//!
//! Agents publish domain events under their own tags and react to what
//! others published. The runtime adds no blocking beyond ordinary swarm
//! completion.

use anyhow::Result;
use serde_json::json;

use super::swarm::{format_peer_context, progress};
use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::ident::{sanitize_sender, valid_id, UNKNOWN_SENDER};
use crate::state::blackboard::{tag, Blackboard};

/// A domain event surfaced in a tool response: `{"event": {"type": …, …}}`.
fn domain_event(event: &HookEvent) -> Option<(String, serde_json::Value)> {
    let body = event.tool_response.as_ref()?.get("event")?;
    let event_type = body.get("type").and_then(|v| v.as_str())?;

    if !valid_id(event_type) {
        tracing::warn!("domain event type {:?} fails the id grammar", event_type);
        return None;
    }

    Some((event_type.to_string(), body.clone()))
}

pub struct EventDrivenEngine;

impl EventDrivenEngine {
    fn on_post_tool_use(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        if let Some((event_type, body)) = domain_event(event) {
            let sender = cx
                .env
                .agent_id
                .as_deref()
                .map(sanitize_sender)
                .unwrap_or(UNKNOWN_SENDER);
            Blackboard::new(cx.db).post(swarm_id, sender, &event_type, &body)?;
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

        let progress = progress(&Blackboard::new(cx.db), swarm_id)?;
        if progress.participants > 0 && !progress.is_complete() {
            return Ok(Decision::block(format!(
                "Waiting for {} agent(s) to complete.",
                progress.missing()
            )));
        }
        Ok(Decision::ok())
    }
}

impl PatternEngine for EventDrivenEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::EventDriven
    }

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        match event.hook_event_name {
            HookEventName::PostToolUse => self.on_post_tool_use(cx, event),
            HookEventName::PreToolUse => self.on_pre_tool_use(cx, event),
            HookEventName::SubagentStop => self.on_subagent_stop(cx, event),
            HookEventName::Stop => self.on_stop(cx, event),
            _ => Ok(Decision::NoOp),
        }
    }
}
