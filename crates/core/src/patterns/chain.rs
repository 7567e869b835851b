//! # Chain-of-Responsibility Pattern
//!
//! Handlers are consulted in a configured order; each either resolves the
//! request (a terminal `done`) or posts a `pass` advancing to the next.
//! The coordinator is held while the request is neither resolved nor
//! exhausted.

use anyhow::Result;
use serde_json::json;

use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::ident::{sanitize_sender, UNKNOWN_SENDER};
use crate::state::blackboard::{tag, Blackboard};

fn resolved(event: &HookEvent) -> bool {
    event
        .tool_response
        .as_ref()
        .and_then(|r| r.get("resolved"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub struct ChainEngine;

impl ChainEngine {
    fn next_after<'a>(&self, chain: &'a [String], current: &str) -> Option<&'a str> {
        chain
            .iter()
            .position(|a| a == current)
            .and_then(|i| chain.get(i + 1))
            .map(String::as_str)
    }

    fn on_subagent_start(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        // Brief each handler with what upstream handlers already declined
        let blackboard = Blackboard::new(cx.db);
        let passes = blackboard.list_of_type(swarm_id, tag::PASS)?;
        if passes.is_empty() {
            return Ok(Decision::NoOp);
        }

        let declined: Vec<&str> = passes.iter().map(|b| b.sender_agent.as_str()).collect();
        Ok(Decision::inject(format!(
            "{} earlier handler(s) passed on this request: {}.",
            declined.len(),
            declined.join(", ")
        )))
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

        if resolved(event) {
            blackboard.post(swarm_id, &sender, tag::DONE, &json!({ "terminal": true }))?;
            return Ok(Decision::say(format!("Handler {sender} resolved the request.")));
        }

        let next = self.next_after(&cx.env.chain_agents, &sender);
        blackboard.post(swarm_id, &sender, tag::PASS, &json!({ "next": next }))?;

        match next {
            Some(next) => Ok(Decision::say(format!(
                "Handler {sender} passed; continue with {next}."
            ))),
            None => Ok(Decision::say(format!(
                "Handler {sender} passed and the chain is exhausted."
            ))),
        }
    }

    fn on_stop(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let swarm_id = match cx.env.swarm_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        let blackboard = Blackboard::new(cx.db);

        if blackboard.count_distinct_senders(swarm_id, tag::DONE)? > 0 {
            return Ok(Decision::say("Chain complete: the request was resolved."));
        }

        let passed = blackboard.count_distinct_senders(swarm_id, tag::PASS)?;
        let chain_len = cx.env.chain_agents.len() as i64;

        if chain_len > 0 && passed >= chain_len {
            return Ok(Decision::say(format!(
                "Chain exhausted: all {chain_len} handler(s) passed without resolving the request."
            )));
        }

        Ok(Decision::block(format!(
            "Chain still open: {passed} of {chain_len} handler(s) have passed and none resolved."
        )))
    }
}

impl PatternEngine for ChainEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::ChainOfResponsibility
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
