//! # Waggle Core
//!
//! The coordination runtime behind the waggle hook executable: concurrent
//! agents registered in SQLite, broadcasts over a shared blackboard,
//! pattern state machines (swarm, pipeline, adaptive circuit breaker and
//! friends), exclusive file claims across sessions, and checksummed state
//! handoff between agents.
//!
//! ## Architecture
//!
//! - `state/` - the coordination database and its managers (agents,
//!   sessions, blackboard, claims, artifacts, circuit state)
//! - `patterns/` - one engine per coordination pattern, keyed by
//!   `PATTERN_TYPE`
//! - `hooks/` - the stdin/stdout protocol, the environment contract and
//!   the dispatcher
//! - `transfer` - serialize/restore of agent state with integrity checks
//! - `compose` - validation of pattern compositions
//! - `learning/` - best-effort contracts toward the external learning
//!   service
//!
//! ## Usage
//!
//! ```rust,ignore
//! use waggle_core::hooks::{dispatch, EnvContext, HookEvent};
//! use waggle_core::state::CoordDb;
//!
//! let db = CoordDb::open()?;
//! let env = EnvContext::capture();
//! let event = HookEvent::from_json(&line)?;
//! println!("{}", dispatch(&db, &env, &event).to_json());
//! ```

pub mod compose;
pub mod error;
pub mod hooks;
pub mod ident;
pub mod learning;
pub mod patterns;
pub mod state;
pub mod transfer;

pub use error::RuntimeError;
