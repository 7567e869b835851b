pub mod dispatcher;
pub mod envctx;
pub mod event;

pub use dispatcher::dispatch;
pub use envctx::{AgentRole, EnvContext};
pub use event::{Decision, HookEvent, HookEventName, HookOutput};
