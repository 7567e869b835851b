//! # Circuit Breaker Pattern
//!
//! A primary agent's tool outcomes feed the adaptive breaker; a fallback
//! agent is briefed as the degraded path. The engine classifies outcomes,
//! applies them transactionally and reports the breaker's posture. It
//! never blocks, only informs.

use anyhow::Result;

use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::envctx::AgentRole;
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::state::circuit::{CircuitPhase, CircuitStore, Outcome};

/// Classify a tool result. A failure is a Bash call with a non-zero exit
/// code or any response carrying an error marker; everything else counts
/// as success.
pub fn classify(event: &HookEvent) -> Outcome {
    let bash_failed =
        event.tool_name.as_deref() == Some("Bash") && event.bash_exit_code().unwrap_or(0) != 0;

    if bash_failed || event.tool_errored() {
        Outcome::Failure
    } else {
        Outcome::Success
    }
}

/// Role- and state-specific briefing for a starting agent.
fn briefing(role: AgentRole, phase: CircuitPhase) -> String {
    match (role, phase) {
        (AgentRole::Primary, CircuitPhase::Closed) => {
            "Circuit closed: normal operation, outcomes are monitored.".to_string()
        }
        (AgentRole::Primary, CircuitPhase::HalfOpen) => {
            "Circuit half-open: you are the recovery probe, a single failure reopens the circuit."
                .to_string()
        }
        (AgentRole::Primary, CircuitPhase::Open) => {
            "Circuit open: failures exceeded the threshold, prefer minimal safe operations."
                .to_string()
        }
        (AgentRole::Fallback, _) => {
            "You are the fallback: a degraded, safer backup path. Keep changes conservative."
                .to_string()
        }
    }
}

pub struct CircuitBreakerEngine;

impl CircuitBreakerEngine {
    fn on_subagent_start(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let cb_id = match cx.env.cb_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };
        let role = match cx.env.agent_role {
            Some(role) => role,
            None => return Ok(Decision::NoOp),
        };

        let store = CircuitStore::new(cx.db);
        let phase = store
            .get(cb_id)?
            .map(|s| s.state)
            .unwrap_or(CircuitPhase::Closed);

        Ok(Decision::say(briefing(role, phase)))
    }

    fn on_post_tool_use(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let cb_id = match cx.env.cb_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        // Only the primary's outcomes drive the breaker
        if cx.env.agent_role != Some(AgentRole::Primary) {
            return Ok(Decision::NoOp);
        }

        let outcome = classify(event);
        let store = CircuitStore::new(cx.db);
        // A breaker with no row yet is in its initial closed state, so a
        // first event never reads as a transition
        let before = store
            .get(cb_id)?
            .map(|s| s.state)
            .unwrap_or(CircuitPhase::Closed);
        let updated = store.apply(cb_id, outcome, &cx.env.breaker)?;

        // Surface transitions; stay quiet on steady state
        if before != updated.state {
            return Ok(Decision::say(match updated.state {
                CircuitPhase::Open => format!(
                    "Circuit '{}' opened: {} failure(s) reached the adaptive threshold of {}. Route work to the fallback.",
                    cb_id, updated.failure_count, updated.current_threshold
                ),
                CircuitPhase::HalfOpen => format!(
                    "Circuit '{}' is half-open after a success; the next outcome decides recovery.",
                    cb_id
                ),
                CircuitPhase::Closed => {
                    format!("Circuit '{}' closed: recovery confirmed.", cb_id)
                }
            }));
        }

        Ok(Decision::NoOp)
    }

    fn on_subagent_stop(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let cb_id = match cx.env.cb_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        if let Some(state) = CircuitStore::new(cx.db).get(cb_id)? {
            tracing::info!("{}", state.summary());
        }
        Ok(Decision::NoOp)
    }

    fn on_stop(&self, cx: &PatternContext<'_>, _event: &HookEvent) -> Result<Decision> {
        let cb_id = match cx.env.cb_id.as_deref() {
            Some(id) => id,
            None => return Ok(Decision::NoOp),
        };

        match CircuitStore::new(cx.db).get(cb_id)? {
            Some(state) => Ok(Decision::say(state.summary())),
            None => Ok(Decision::NoOp),
        }
    }
}

impl PatternEngine for CircuitBreakerEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::CircuitBreaker
    }

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        match event.hook_event_name {
            HookEventName::SubagentStart => self.on_subagent_start(cx, event),
            HookEventName::PostToolUse => self.on_post_tool_use(cx, event),
            HookEventName::SubagentStop => self.on_subagent_stop(cx, event),
            HookEventName::Stop => self.on_stop(cx, event),
            _ => Ok(Decision::NoOp),
        }
    }
}
