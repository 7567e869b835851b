//! # Environment Contract
//!
//! The host CLI configures each hook invocation through environment
//! variables. One snapshot is taken at dispatch time so every handler sees
//! a consistent view; tests build the snapshot from a map instead.

use std::collections::HashMap;

use crate::compose::{ScopeOp, SeqOp};
use crate::ident::valid_id;
use crate::patterns::PatternKind;
use crate::state::circuit::BreakerParams;

/// Role of the current agent under a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Primary,
    Fallback,
}

impl AgentRole {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

/// Snapshot of the hook environment contract.
#[derive(Debug, Clone, Default)]
pub struct EnvContext {
    pub pattern: Option<PatternKind>,
    pub project: Option<String>,
    pub feature: Option<String>,
    pub swarm_id: Option<String>,
    pub cb_id: Option<String>,
    pub agent_role: Option<AgentRole>,
    pub agent_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub stage_index: Option<i64>,
    pub mandatory_upstream: bool,
    pub state_transfer: bool,
    pub handoff_target: Option<String>,
    pub reducer: Option<String>,
    pub jury_quorum: Option<i64>,
    pub chain_agents: Vec<String>,
    pub max_agents: Option<i64>,
    pub compose_with: Option<PatternKind>,
    pub compose_scope: Option<ScopeOp>,
    pub compose_seq: Option<SeqOp>,
    pub breaker: BreakerParams,
}

impl EnvContext {
    /// Snapshot the process environment.
    pub fn capture() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    /// Build a snapshot from an explicit map (test seam).
    pub fn from_map(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|s| s.trim()).filter(|s| !s.is_empty());
        let get_id = |key: &str| {
            get(key)
                .filter(|s| valid_id(s))
                .map(|s| s.to_string())
        };

        let mut breaker = BreakerParams::default();
        if let Some(v) = get("CB_INITIAL_THRESHOLD").and_then(|s| s.parse().ok()) {
            breaker.initial_threshold = v;
        }
        if let Some(v) = get("CB_MIN_THRESHOLD").and_then(|s| s.parse().ok()) {
            breaker.min_threshold = v;
        }
        if let Some(v) = get("CB_MAX_THRESHOLD").and_then(|s| s.parse().ok()) {
            breaker.max_threshold = v;
        }
        if let Some(v) = get("CB_ADAPTATION_RATE").and_then(|s| s.parse().ok()) {
            breaker.adaptation_rate = v;
        }
        if let Some(v) = get("CB_WINDOW_SECS").and_then(|s| s.parse().ok()) {
            breaker.window_secs = v;
        }

        let truthy = |key: &str| {
            get(key)
                .map(|s| matches!(s, "true" | "1" | "yes"))
                .unwrap_or(false)
        };

        // Project scoping: explicit override, else the host CLI's project dir
        let project = get("WAGGLE_PROJECT").map(str::to_string).or_else(|| {
            get("CLAUDE_PROJECT_DIR").map(|dir| {
                std::path::Path::new(dir)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| dir.to_string())
            })
        });

        Self {
            pattern: get("PATTERN_TYPE").and_then(PatternKind::parse),
            project,
            feature: get_id("WAGGLE_FEATURE"),
            swarm_id: get_id("SWARM_ID"),
            cb_id: get_id("CB_ID"),
            agent_role: get("AGENT_ROLE").and_then(AgentRole::parse),
            agent_id: get_id("AGENT_ID"),
            pipeline_id: get_id("PIPELINE_ID"),
            stage_index: get("STAGE_INDEX").and_then(|s| s.parse().ok()),
            mandatory_upstream: truthy("PIPELINE_MANDATORY_UPSTREAM"),
            state_transfer: truthy("SWARM_STATE_TRANSFER"),
            handoff_target: get_id("SWARM_HANDOFF_TARGET"),
            reducer: get_id("SWARM_REDUCER"),
            jury_quorum: get("JURY_QUORUM").and_then(|s| s.parse().ok()),
            chain_agents: get("CHAIN_AGENTS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|a| valid_id(a))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            max_agents: get("WAGGLE_MAX_AGENTS").and_then(|s| s.parse().ok()),
            compose_with: get("PATTERN_COMPOSE_WITH").and_then(PatternKind::parse),
            compose_scope: get("COMPOSE_SCOPE").and_then(ScopeOp::parse),
            compose_seq: get("COMPOSE_SEQ").and_then(SeqOp::parse),
            breaker,
        }
    }

    /// An event with no coordination coordinates at all is a no-op.
    pub fn is_addressed(&self) -> bool {
        self.pattern.is_some()
            || self.swarm_id.is_some()
            || self.cb_id.is_some()
            || self.pipeline_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_capture_pattern_and_ids() {
        let env = EnvContext::from_map(&map(&[
            ("PATTERN_TYPE", "swarm"),
            ("SWARM_ID", "s1"),
            ("AGENT_ID", "a1"),
            ("SWARM_STATE_TRANSFER", "true"),
            ("SWARM_HANDOFF_TARGET", "a2"),
        ]));

        assert_eq!(env.pattern, Some(PatternKind::Swarm));
        assert_eq!(env.swarm_id.as_deref(), Some("s1"));
        assert!(env.state_transfer);
        assert_eq!(env.handoff_target.as_deref(), Some("a2"));
        assert!(env.is_addressed());
    }

    #[test]
    fn test_invalid_ids_are_dropped() {
        let env = EnvContext::from_map(&map(&[
            ("SWARM_ID", "not a valid id!"),
            ("CB_ID", "cb1"),
        ]));
        assert!(env.swarm_id.is_none());
        assert_eq!(env.cb_id.as_deref(), Some("cb1"));
    }

    #[test]
    fn test_breaker_overrides() {
        let env = EnvContext::from_map(&map(&[
            ("CB_INITIAL_THRESHOLD", "5"),
            ("CB_ADAPTATION_RATE", "0.5"),
            ("CB_WINDOW_SECS", "120"),
        ]));
        assert_eq!(env.breaker.initial_threshold, 5);
        assert!((env.breaker.adaptation_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(env.breaker.window_secs, 120);
        // Untouched knobs keep defaults
        assert_eq!(env.breaker.min_threshold, 1);
    }

    #[test]
    fn test_unaddressed_event() {
        let env = EnvContext::from_map(&map(&[("AGENT_ROLE", "primary")]));
        assert!(!env.is_addressed());
    }

    #[test]
    fn test_chain_agents_parsing() {
        let env = EnvContext::from_map(&map(&[("CHAIN_AGENTS", "a1, a2,bad id,a3")]));
        assert_eq!(env.chain_agents, vec!["a1", "a2", "a3"]);
    }
}
