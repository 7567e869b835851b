//! # Hierarchical Pattern
//!
//! Parent/child coordination through the registry's `parent_agent_id`
//! chain: the parent's Stop is held until every descendant has completed.
//! Spawns are announced on the blackboard so siblings can see the tree
//! grow.

use anyhow::Result;
use serde_json::json;

use super::swarm::spawned_agent_id;
use super::{PatternContext, PatternEngine, PatternKind};
use crate::hooks::event::{Decision, HookEvent, HookEventName};
use crate::ident::UNKNOWN_SENDER;
use crate::state::agents::{AgentRegistry, AgentSpawn, AgentStatus};
use crate::state::blackboard::{tag, Blackboard};

pub struct HierarchicalEngine;

impl HierarchicalEngine {
    fn on_post_tool_use(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        if event.tool_name.as_deref() != Some("Task") {
            return Ok(Decision::NoOp);
        }

        let spawned = spawned_agent_id(event.tool_response.as_ref());
        if spawned == UNKNOWN_SENDER {
            return Ok(Decision::NoOp);
        }

        let registry = AgentRegistry::new(cx.db);
        registry.register(
            &spawned,
            &event.session_id,
            AgentSpawn {
                pattern: Some(PatternKind::Hierarchical.as_str()),
                parent_agent_id: cx.env.agent_id.as_deref(),
                ..Default::default()
            },
        )?;

        if let Some(swarm_id) = cx.env.swarm_id.as_deref() {
            Blackboard::new(cx.db).post(
                swarm_id,
                &spawned,
                tag::TASK_SPAWNED,
                &json!({ "parent": cx.env.agent_id }),
            )?;
        }

        Ok(Decision::NoOp)
    }

    fn on_subagent_stop(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        if let Some(id) = event.agent_id.as_deref() {
            AgentRegistry::new(cx.db).complete(id, AgentStatus::Completed, None)?;
        }
        Ok(Decision::NoOp)
    }

    fn on_stop(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision> {
        let registry = AgentRegistry::new(cx.db);

        // The parent's view: its own subtree if it has an id, otherwise
        // every running agent of the session.
        let pending = match cx.env.agent_id.as_deref() {
            Some(root) => registry.list_running_descendants(root)?,
            None => registry.list_running(Some(&event.session_id))?,
        };

        if pending.is_empty() {
            return Ok(Decision::say(
                "All descendant agents have completed; the hierarchy is drained.",
            ));
        }

        let names: Vec<&str> = pending.iter().map(|a| a.id.as_str()).take(5).collect();
        Ok(Decision::block(format!(
            "{} descendant agent(s) still running ({}{}).",
            pending.len(),
            names.join(", "),
            if pending.len() > names.len() { ", …" } else { "" }
        )))
    }
}

impl PatternEngine for HierarchicalEngine {
    fn kind(&self) -> PatternKind {
        PatternKind::Hierarchical
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
