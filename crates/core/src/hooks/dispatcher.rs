//! # Hook Dispatcher
//!
//! One entry point per hook event: decode, guard, heartbeat, route to the
//! active pattern engine, reply. The dispatcher never raises: any failure
//! on any path collapses into the empty reply so the host CLI is never
//! blocked by its own coordination layer.

use anyhow::Result;
use chrono::Duration;

use crate::compose::{self, ScopeOp, SeqOp};
use crate::hooks::envctx::EnvContext;
use crate::hooks::event::{Decision, HookEvent, HookEventName, HookOutput};
use crate::ident::valid_id;
use crate::learning::{LearningScorer, LearningSink};
use crate::patterns::{engine_for, PatternContext};
use crate::state::agents::{AgentRegistry, AgentSpawn, AgentStatus, LEAK_MAX_AGE_HOURS};
use crate::state::claims::FileClaimArbiter;
use crate::state::db::CoordDb;
use crate::state::findings::FindingStore;
use crate::state::sessions::{SessionSupervisor, SessionUpdate};
use crate::state::workspaces::WorkspaceStore;

/// Process one hook event. Infallible by contract: errors are logged to
/// stderr and become `{}`.
pub fn dispatch(db: &CoordDb, env: &EnvContext, event: &HookEvent) -> HookOutput {
    match try_dispatch(db, env, event) {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("hook dispatch failed: {:#}", e);
            HookOutput::empty()
        }
    }
}

fn try_dispatch(db: &CoordDb, env: &EnvContext, event: &HookEvent) -> Result<HookOutput> {
    // Stop-hook loop guard: reply continue with no side effects at all
    if event.hook_event_name == HookEventName::Stop && event.stop_hook_active() {
        return Ok(HookOutput::from_decision(Decision::ok(), HookEventName::Stop));
    }

    // An event with an invalid session id never reaches the store
    if !valid_id(&event.session_id) {
        tracing::warn!("dropping event with invalid session id");
        return Ok(HookOutput::empty());
    }

    heartbeat_and_track(db, env, event);

    let mut output = route_to_pattern(db, env, event)?;

    // Learnings and findings ride along on any event that surfaced one
    if let Some(learning) = harvest_learning(event) {
        output.learning = Some(learning);
    }
    harvest_finding(db, event);

    Ok(output)
}

/// Session heartbeats, registry bookkeeping and housekeeping sweeps.
/// All best-effort: failure here must not affect the reply.
fn heartbeat_and_track(db: &CoordDb, env: &EnvContext, event: &HookEvent) {
    let supervisor = SessionSupervisor::new(db);

    match event.hook_event_name {
        HookEventName::SessionStart
        | HookEventName::SubagentStart
        | HookEventName::SubagentStop => {
            if let Err(e) = supervisor.heartbeat(
                &event.session_id,
                SessionUpdate {
                    project: env.project.as_deref(),
                    ..Default::default()
                },
            ) {
                tracing::warn!("session heartbeat failed: {:#}", e);
            }
        }
        _ => {}
    }

    let registry = AgentRegistry::new(db);
    match event.hook_event_name {
        HookEventName::SubagentStart => {
            if let Some(id) = event.agent_id.as_deref().filter(|id| valid_id(id)) {
                let _ = registry.register(
                    id,
                    &event.session_id,
                    AgentSpawn {
                        pattern: env.pattern.map(|p| p.as_str()),
                        parent_agent_id: env.agent_id.as_deref(),
                        ..Default::default()
                    },
                );
            }
        }
        HookEventName::SubagentStop => {
            if let Some(id) = event.agent_id.as_deref().filter(|id| valid_id(id)) {
                let _ = registry.complete(id, AgentStatus::Completed, None);
            }
        }
        HookEventName::SessionStart => {
            // Cheap housekeeping piggybacks on the rarest event
            let _ = registry.sweep(Duration::hours(LEAK_MAX_AGE_HOURS));
            let _ = FileClaimArbiter::new(db).sweep_expired();
            let _ = supervisor.sweep_stale();

            // A session launched for a named feature claims its workspace
            if let (Some(feature), Some(project)) = (env.feature.as_deref(), env.project.as_deref())
            {
                let _ = WorkspaceStore::new(db).assign_feature(
                    feature,
                    project,
                    &event.session_id,
                    None,
                );
            }
        }
        HookEventName::PreCompact => {
            // Snapshot progress before the host compacts the transcript
            let state = serde_json::json!({
                "transcript_path": event.transcript_path,
                "trigger": event.trigger,
            });
            let _ = WorkspaceStore::new(db).save_checkpoint(
                &format!("cp-{}", event.session_id),
                &event.session_id,
                "pre-compact",
                &state,
            );
        }
        _ => {}
    }
}

fn route_to_pattern(db: &CoordDb, env: &EnvContext, event: &HookEvent) -> Result<HookOutput> {
    // Cross-session awareness greets a new session before any pattern runs
    if event.hook_event_name == HookEventName::SessionStart {
        if let Some(context) = awareness_context(db, env, event)? {
            return Ok(HookOutput::from_decision(
                Decision::inject(context),
                event.hook_event_name,
            ));
        }
    }

    let pattern = match env.pattern {
        Some(pattern) => pattern,
        // No coordination coordinates at all: stay silent
        None => return Ok(HookOutput::empty()),
    };

    // The composition gate is authoritative: a failed validation keeps the
    // composed pattern from running
    if let Some(second) = env.compose_with {
        let scope = env.compose_scope.unwrap_or(ScopeOp::Handoff);
        let seq = env.compose_seq.unwrap_or(SeqOp::Sequential);
        let report = compose::validate(pattern, second, scope, seq);

        if !report.valid {
            let message = format!(
                "Invalid pattern composition {} with {}: {}",
                pattern.as_str(),
                second.as_str(),
                report.errors.join("; ")
            );
            let decision = match event.hook_event_name {
                HookEventName::Stop | HookEventName::SubagentStop => Decision::block(message),
                _ => Decision::say(message),
            };
            return Ok(HookOutput::from_decision(decision, event.hook_event_name));
        }

        for warning in &report.warnings {
            tracing::warn!("composition warning: {}", warning);
        }
    }

    let cx = PatternContext { db, env };
    let decision = engine_for(pattern).on(&cx, event)?;
    Ok(HookOutput::from_decision(decision, event.hook_event_name))
}

/// Tell a new session who else is working and where claims might collide.
fn awareness_context(
    db: &CoordDb,
    env: &EnvContext,
    event: &HookEvent,
) -> Result<Option<String>> {
    let supervisor = SessionSupervisor::new(db);
    let others: Vec<_> = supervisor
        .list_active(env.project.as_deref())?
        .into_iter()
        .filter(|s| s.id != event.session_id)
        .collect();

    let mut lines = Vec::new();

    if !others.is_empty() {
        lines.push(format!("{} other active session(s):", others.len()));
        for s in &others {
            lines.push(format!(
                "- {} working on {}{}",
                s.id,
                s.working_on.as_deref().unwrap_or("(unspecified)"),
                s.current_phase
                    .as_deref()
                    .map(|p| format!(" ({p})"))
                    .unwrap_or_default(),
            ));
        }
    }

    if let Some(project) = env.project.as_deref() {
        let contended =
            FileClaimArbiter::new(db).list_live_by_others(project, &event.session_id)?;
        if !contended.is_empty() {
            lines.push(format!(
                "Files currently claimed by other sessions: {}.",
                contended
                    .iter()
                    .map(|c| format!("{} ({})", c.file_path, c.session_id))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        let features: Vec<_> = WorkspaceStore::new(db)
            .active_features(project)?
            .into_iter()
            .filter(|w| w.session_id != event.session_id)
            .collect();
        if !features.is_empty() {
            lines.push(format!(
                "Features in flight: {}.",
                features
                    .iter()
                    .map(|w| format!("{} ({})", w.feature, w.session_id))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }

    // A resuming session gets its own latest checkpoint back
    if let Some(cp) = WorkspaceStore::new(db).latest_checkpoint(&event.session_id)? {
        lines.push(format!(
            "Checkpoint '{}' from {} is available to resume from.",
            cp.label,
            cp.created_at.to_rfc3339()
        ));
    }

    if lines.is_empty() {
        return Ok(None);
    }
    Ok(Some(lines.join("\n")))
}

/// A research note surfaced in structured output is persisted for later
/// sessions. Best-effort.
fn harvest_finding(db: &CoordDb, event: &HookEvent) {
    let body = match event.tool_response.as_ref().and_then(|r| r.get("finding")) {
        Some(body) => body,
        None => return,
    };

    let (topic, finding) = match (
        body.get("topic").and_then(|v| v.as_str()),
        body.get("finding").and_then(|v| v.as_str()),
    ) {
        (Some(topic), Some(finding)) => (topic, finding),
        _ => return,
    };

    let relevant_to: Vec<String> = body
        .get("relevant_to")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if let Err(e) = FindingStore::new(db).record(&event.session_id, topic, finding, &relevant_to) {
        tracing::warn!("failed to record finding: {:#}", e);
    }
}

/// A learning surfaced in the agent's structured output is scored and,
/// if it clears the gate, spooled for the external service.
fn harvest_learning(event: &HookEvent) -> Option<serde_json::Value> {
    let body = event.tool_response.as_ref()?.get("learning")?;
    let content = body.get("content").and_then(|v| v.as_str())?;
    let context = body.get("context").and_then(|v| v.as_str()).unwrap_or("");

    let score = LearningScorer::new().score(content);
    if !score.should_store() {
        tracing::debug!(
            "learning below storage gate ({:.2}): {:?}",
            score.confidence,
            score.quality_signals
        );
        return None;
    }

    let kind = score
        .suggested_type
        .unwrap_or(crate::learning::LearningKind::CodebasePattern);
    let id = LearningSink::new().store(
        &event.session_id,
        kind,
        content,
        context,
        score.confidence_level,
    )?;

    Some(serde_json::json!({
        "id": id,
        "kind": kind.as_str(),
        "confidence": score.confidence_level,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternKind;
    use crate::state::blackboard::{tag, Blackboard};
    use std::fs;

    fn open_db(path: &str) -> CoordDb {
        let _ = fs::remove_file(path);
        CoordDb::open_at(path).unwrap()
    }

    fn event_json(value: serde_json::Value) -> HookEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_stop_hook_active_short_circuits() {
        let path = ".waggle/test_dispatch_guard.db";
        let db = open_db(path);

        // Even with an incomplete swarm, the guard wins and nothing is written
        let env = EnvContext {
            pattern: Some(PatternKind::Swarm),
            swarm_id: Some("s1".to_string()),
            ..Default::default()
        };
        Blackboard::new(&db)
            .post("s1", "a1", tag::STARTED, &serde_json::json!({}))
            .unwrap();

        let event = event_json(serde_json::json!({
            "hook_event_name": "Stop",
            "session_id": "sess1",
            "stop_hook_active": true,
        }));

        let output = dispatch(&db, &env, &event);
        assert_eq!(output.result, Some("continue"));
        assert!(output.message.is_none());
        // No side effects: the swarm log is untouched
        assert_eq!(Blackboard::new(&db).count_any("s1").unwrap(), 1);

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_invalid_session_id_is_a_noop() {
        let path = ".waggle/test_dispatch_badid.db";
        let db = open_db(path);
        let env = EnvContext::default();

        let event = event_json(serde_json::json!({
            "hook_event_name": "SessionStart",
            "session_id": "rm -rf /; --",
        }));

        let output = dispatch(&db, &env, &event);
        assert_eq!(output.to_json(), "{}");

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_unaddressed_event_is_a_noop() {
        let path = ".waggle/test_dispatch_unaddressed.db";
        let db = open_db(path);
        let env = EnvContext::default();

        let event = event_json(serde_json::json!({
            "hook_event_name": "PreToolUse",
            "session_id": "sess1",
            "tool_name": "Read",
        }));

        assert_eq!(dispatch(&db, &env, &event).to_json(), "{}");

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_swarm_stop_blocks_through_dispatcher() {
        let path = ".waggle/test_dispatch_swarm.db";
        let db = open_db(path);
        let env = EnvContext {
            pattern: Some(PatternKind::Swarm),
            swarm_id: Some("s1".to_string()),
            ..Default::default()
        };

        let bb = Blackboard::new(&db);
        for id in ["a1", "a2", "a3"] {
            bb.post("s1", id, tag::STARTED, &serde_json::json!({}))
                .unwrap();
        }
        bb.post("s1", "a1", tag::DONE, &serde_json::json!({"auto": true}))
            .unwrap();

        let event = event_json(serde_json::json!({
            "hook_event_name": "Stop",
            "session_id": "sess1",
        }));

        let output = dispatch(&db, &env, &event);
        assert_eq!(output.result, Some("block"));
        assert_eq!(
            output.message.as_deref(),
            Some("Waiting for 2 agent(s) to complete.")
        );

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_invalid_composition_is_refused() {
        let path = ".waggle/test_dispatch_compose.db";
        let db = open_db(path);
        let env = EnvContext {
            pattern: Some(PatternKind::Hierarchical),
            compose_with: Some(PatternKind::Hierarchical),
            ..Default::default()
        };

        let event = event_json(serde_json::json!({
            "hook_event_name": "Stop",
            "session_id": "sess1",
        }));

        let output = dispatch(&db, &env, &event);
        assert_eq!(output.result, Some("block"));
        assert!(output.message.unwrap().contains("Invalid pattern composition"));

        // Advisory on events where the host ignores block
        let event = event_json(serde_json::json!({
            "hook_event_name": "PreToolUse",
            "session_id": "sess1",
        }));
        let output = dispatch(&db, &env, &event);
        assert_eq!(output.result, Some("continue"));

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_session_start_reports_other_sessions() {
        let path = ".waggle/test_dispatch_awareness.db";
        let db = open_db(path);
        let env = EnvContext {
            project: Some("p".to_string()),
            ..Default::default()
        };

        // A concurrent session with a live claim
        SessionSupervisor::new(&db)
            .heartbeat(
                "other",
                SessionUpdate {
                    project: Some("p"),
                    working_on: Some("payments"),
                    ..Default::default()
                },
            )
            .unwrap();
        FileClaimArbiter::new(&db)
            .claim("src/pay.rs", "p", "other", None)
            .unwrap();

        let event = event_json(serde_json::json!({
            "hook_event_name": "SessionStart",
            "session_id": "me",
        }));

        let output = dispatch(&db, &env, &event);
        let context = output
            .hook_specific_output
            .unwrap()["additionalContext"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(context.contains("payments"));
        assert!(context.contains("src/pay.rs"));

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_findings_are_harvested_from_structured_output() {
        let path = ".waggle/test_dispatch_finding.db";
        let db = open_db(path);
        let env = EnvContext::default();

        let event = event_json(serde_json::json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess1",
            "tool_name": "Task",
            "tool_response": {
                "finding": {
                    "topic": "auth",
                    "finding": "token refresh races with logout",
                    "relevant_to": ["src/auth.rs"],
                }
            },
        }));
        dispatch(&db, &env, &event);

        let found = FindingStore::new(&db).by_topic("auth", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relevant_to, vec!["src/auth.rs"]);

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_pre_compact_saves_a_checkpoint() {
        let path = ".waggle/test_dispatch_precompact.db";
        let db = open_db(path);
        let env = EnvContext::default();

        let event = event_json(serde_json::json!({
            "hook_event_name": "PreCompact",
            "session_id": "sess1",
            "trigger": "auto",
            "transcript_path": "/tmp/transcript.jsonl",
        }));
        assert_eq!(dispatch(&db, &env, &event).to_json(), "{}");

        let cp = WorkspaceStore::new(&db)
            .latest_checkpoint("sess1")
            .unwrap()
            .unwrap();
        assert_eq!(cp.label, "pre-compact");
        assert_eq!(cp.state["trigger"], "auto");

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_registry_tracks_subagent_lifecycle() {
        let path = ".waggle/test_dispatch_registry.db";
        let db = open_db(path);
        let env = EnvContext {
            pattern: Some(PatternKind::Swarm),
            swarm_id: Some("s1".to_string()),
            ..Default::default()
        };

        let start = event_json(serde_json::json!({
            "hook_event_name": "SubagentStart",
            "session_id": "sess1",
            "agent_id": "a1",
        }));
        dispatch(&db, &env, &start);

        let registry = AgentRegistry::new(&db);
        assert_eq!(registry.count_running().unwrap(), 1);

        let stop = event_json(serde_json::json!({
            "hook_event_name": "SubagentStop",
            "session_id": "sess1",
            "agent_id": "a1",
        }));
        dispatch(&db, &env, &stop);
        assert_eq!(registry.count_running().unwrap(), 0);

        drop(db);
        let _ = fs::remove_file(path);
    }
}
