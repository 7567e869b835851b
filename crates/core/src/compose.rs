//! # Composition Gate
//!
//! Validates that two patterns can be composed under a scope operator
//! before the dispatcher enters either. The gate is authoritative: a failed
//! validation keeps the composed pattern from running at all.

use serde::{Deserialize, Serialize};

use crate::patterns::PatternKind;

/// How state flows between the composed patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeOp {
    /// The first pattern's output state is handed to the second.
    Handoff,
    /// Both patterns read and write the same coordination scope.
    Shared,
}

impl ScopeOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "handoff" => Some(Self::Handoff),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handoff => "handoff",
            Self::Shared => "shared",
        }
    }
}

/// How the composed patterns are sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeqOp {
    /// `;`: the second starts after the first finishes.
    Sequential,
    /// `||`: both run at once.
    Parallel,
}

impl SeqOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ";" | "seq" | "sequential" => Some(Self::Sequential),
            "||" | "par" | "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => ";",
            Self::Parallel => "||",
        }
    }
}

/// Outcome of validating a composition.
#[derive(Debug, Clone, Serialize)]
pub struct CompositionReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub scope_trace: Vec<String>,
}

/// Validate composing `a` then/with `b` under the given operators.
pub fn validate(a: PatternKind, b: PatternKind, scope: ScopeOp, seq: SeqOp) -> CompositionReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut scope_trace = vec![format!(
        "{} {} {} under {}",
        a.as_str(),
        seq.as_str(),
        b.as_str(),
        scope.as_str()
    )];

    // Handoff needs a finished producer; running both at once leaves
    // nothing to hand off.
    if scope == ScopeOp::Handoff && seq == SeqOp::Parallel {
        errors.push("handoff scope requires sequential composition: nothing is finished to hand off under '||'".to_string());
    }

    // Nesting a hierarchy inside a hierarchy re-parents the same agents:
    // the parent chain becomes cyclic.
    if a == PatternKind::Hierarchical && b == PatternKind::Hierarchical {
        errors.push("cyclic hierarchical nesting: both sides claim the parent chain".to_string());
    }

    // Two swarms at once drain the agent pool.
    if a == PatternKind::Swarm && b == PatternKind::Swarm && seq == SeqOp::Parallel {
        warnings.push(
            "two concurrent swarms share one agent pool; expect admission pressure".to_string(),
        );
    }

    // Parallel circuit breakers double-count the same tool outcomes when
    // they share scope.
    if scope == ScopeOp::Shared
        && seq == SeqOp::Parallel
        && (a == PatternKind::CircuitBreaker || b == PatternKind::CircuitBreaker)
    {
        warnings.push(
            "a breaker sharing scope with a parallel pattern classifies outcomes it does not own"
                .to_string(),
        );
    }

    // Pipelines chain cleanly under handoff: downstream stages read the
    // artifact trail.
    if a == PatternKind::Pipeline && b == PatternKind::Pipeline {
        if scope == ScopeOp::Handoff && seq == SeqOp::Sequential {
            scope_trace.push("pipeline stages continue numbering across the boundary".to_string());
        } else if scope == ScopeOp::Shared {
            warnings.push(
                "two pipelines sharing one artifact trail must not reuse stage indexes".to_string(),
            );
        }
    }

    // A breaker in front of anything is the supported degradation shape.
    if a == PatternKind::CircuitBreaker && seq == SeqOp::Sequential {
        scope_trace.push(format!(
            "breaker guards the downstream {} pattern",
            b.as_str()
        ));
    }

    CompositionReport {
        valid: errors.is_empty(),
        errors,
        warnings,
        scope_trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_then_pipeline_under_handoff_is_valid() {
        let report = validate(
            PatternKind::Pipeline,
            PatternKind::Pipeline,
            ScopeOp::Handoff,
            SeqOp::Sequential,
        );
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_parallel_swarms_are_warned_not_rejected() {
        let report = validate(
            PatternKind::Swarm,
            PatternKind::Swarm,
            ScopeOp::Shared,
            SeqOp::Parallel,
        );
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_breaker_guards_anything_sequential() {
        for downstream in [
            PatternKind::Swarm,
            PatternKind::Pipeline,
            PatternKind::Jury,
            PatternKind::MapReduce,
        ] {
            let report = validate(
                PatternKind::CircuitBreaker,
                downstream,
                ScopeOp::Handoff,
                SeqOp::Sequential,
            );
            assert!(report.valid, "breaker ; {} should pass", downstream.as_str());
        }
    }

    #[test]
    fn test_cyclic_hierarchy_is_invalid() {
        let report = validate(
            PatternKind::Hierarchical,
            PatternKind::Hierarchical,
            ScopeOp::Shared,
            SeqOp::Sequential,
        );
        assert!(!report.valid);
        assert!(report.errors[0].contains("cyclic"));
    }

    #[test]
    fn test_parallel_handoff_is_contradictory() {
        let report = validate(
            PatternKind::Swarm,
            PatternKind::Pipeline,
            ScopeOp::Handoff,
            SeqOp::Parallel,
        );
        assert!(!report.valid);
    }

    #[test]
    fn test_trace_always_names_the_composition() {
        let report = validate(
            PatternKind::Jury,
            PatternKind::EventDriven,
            ScopeOp::Shared,
            SeqOp::Sequential,
        );
        assert!(report.scope_trace[0].contains("jury"));
        assert!(report.scope_trace[0].contains("event_driven"));
    }
}
