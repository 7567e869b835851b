//! # Pattern Engines
//!
//! Each coordination pattern is a state machine over the hook events,
//! expressed as one engine implementing [`PatternEngine`]. Selection is a
//! lookup keyed by `PATTERN_TYPE`; engines are stateless; all pattern
//! state lives in the coordination database.

pub mod adversarial;
pub mod chain;
pub mod circuit_breaker;
pub mod event_driven;
pub mod generator_critic;
pub mod hierarchical;
pub mod jury;
pub mod map_reduce;
pub mod pipeline;
pub mod swarm;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::hooks::envctx::EnvContext;
use crate::hooks::event::{Decision, HookEvent};
use crate::state::db::CoordDb;

/// Named coordination strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Swarm,
    Pipeline,
    CircuitBreaker,
    GeneratorCritic,
    Hierarchical,
    MapReduce,
    Jury,
    ChainOfResponsibility,
    EventDriven,
    Adversarial,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swarm => "swarm",
            Self::Pipeline => "pipeline",
            Self::CircuitBreaker => "circuit_breaker",
            Self::GeneratorCritic => "generator_critic",
            Self::Hierarchical => "hierarchical",
            Self::MapReduce => "map_reduce",
            Self::Jury => "jury",
            Self::ChainOfResponsibility => "chain_of_responsibility",
            Self::EventDriven => "event_driven",
            Self::Adversarial => "adversarial",
        }
    }

    /// Parse a `PATTERN_TYPE` value. Unknown names select nothing.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "swarm" => Some(Self::Swarm),
            "pipeline" => Some(Self::Pipeline),
            "circuit_breaker" => Some(Self::CircuitBreaker),
            "generator_critic" => Some(Self::GeneratorCritic),
            "hierarchical" => Some(Self::Hierarchical),
            "map_reduce" => Some(Self::MapReduce),
            "jury" => Some(Self::Jury),
            "chain_of_responsibility" => Some(Self::ChainOfResponsibility),
            "event_driven" => Some(Self::EventDriven),
            "adversarial" => Some(Self::Adversarial),
            _ => None,
        }
    }
}

/// Everything an engine sees for one event: the store handle and the
/// environment snapshot taken at dispatch.
pub struct PatternContext<'a> {
    pub db: &'a CoordDb,
    pub env: &'a EnvContext,
}

/// A pattern's handler set over the hook events.
///
/// Engines return a [`Decision`]; they never write to stdout and never
/// panic on malformed input; anything unhandled becomes `NoOp` upstream.
pub trait PatternEngine: Send + Sync {
    fn kind(&self) -> PatternKind;

    fn on(&self, cx: &PatternContext<'_>, event: &HookEvent) -> Result<Decision>;
}

/// Lookup table keyed by `PATTERN_TYPE`.
pub fn engine_for(kind: PatternKind) -> &'static dyn PatternEngine {
    match kind {
        PatternKind::Swarm => &swarm::SwarmEngine,
        PatternKind::Pipeline => &pipeline::PipelineEngine,
        PatternKind::CircuitBreaker => &circuit_breaker::CircuitBreakerEngine,
        PatternKind::GeneratorCritic => &generator_critic::GeneratorCriticEngine,
        PatternKind::Hierarchical => &hierarchical::HierarchicalEngine,
        PatternKind::MapReduce => &map_reduce::MapReduceEngine,
        PatternKind::Jury => &jury::JuryEngine,
        PatternKind::ChainOfResponsibility => &chain::ChainEngine,
        PatternKind::EventDriven => &event_driven::EventDrivenEngine,
        PatternKind::Adversarial => &adversarial::AdversarialEngine,
    }
}
