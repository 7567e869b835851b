pub mod agents;
pub mod artifacts;
pub mod blackboard;
pub mod circuit;
pub mod claims;
pub mod db;
pub mod findings;
pub mod sessions;
pub mod workspaces;

pub use db::CoordDb;

pub use agents::{Agent, AgentRegistry, AgentSource, AgentSpawn, AgentStatus};
pub use artifacts::{ArtifactStore, PipelineArtifact};
pub use blackboard::{Blackboard, Broadcast};
pub use circuit::{BreakerParams, CircuitPhase, CircuitState, CircuitStore, Outcome};
pub use claims::{ClaimOutcome, ClaimStatus, FileClaim, FileClaimArbiter};
pub use findings::{Finding, FindingStore};
pub use sessions::{Session, SessionSupervisor, SessionUpdate};
pub use workspaces::{Checkpoint, FeatureWorkspace, WorkspaceStore};
