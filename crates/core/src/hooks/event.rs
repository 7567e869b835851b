//! # Hook Protocol
//!
//! The wire format between the host CLI and the runtime: one JSON object in
//! on stdin, one JSON object out on stdout. Unknown fields are tolerated on
//! input; the reply is either `{}` or a `result`/`message` decision.

use serde::{Deserialize, Serialize};

/// Cap on any user-visible message.
pub const MAX_MESSAGE_BYTES: usize = 2048;

/// Lifecycle events emitted by the host CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookEventName {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    SubagentStart,
    SubagentStop,
    Stop,
    PreCompact,
    SessionEnd,
    #[serde(other)]
    Unknown,
}

/// One decoded hook event.
#[derive(Debug, Clone, Deserialize)]
pub struct HookEvent {
    pub hook_event_name: HookEventName,
    pub session_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_response: Option<serde_json::Value>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub stop_hook_active: Option<bool>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
}

impl HookEvent {
    /// Parse one event from its wire form.
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// True when the host signalled this Stop was produced by a hook
    /// decision already; replying `block` again would loop.
    pub fn stop_hook_active(&self) -> bool {
        self.stop_hook_active.unwrap_or(false)
    }

    /// The exit code of a Bash tool call, from input or response.
    pub fn bash_exit_code(&self) -> Option<i64> {
        self.tool_response
            .as_ref()
            .and_then(|r| r.get("exit_code"))
            .or_else(|| self.tool_input.as_ref().and_then(|i| i.get("exit_code")))
            .and_then(|v| v.as_i64())
    }

    /// Whether the tool response carries an error marker.
    pub fn tool_errored(&self) -> bool {
        self.tool_response
            .as_ref()
            .and_then(|r| r.get("error"))
            .map(|e| !e.is_null())
            .unwrap_or(false)
    }
}

/// What a pattern engine decided about an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Nothing to say; reply `{}`.
    NoOp,
    /// Let the host proceed, optionally with a message and injected context.
    Continue {
        message: Option<String>,
        context: Option<String>,
    },
    /// Hold the host with a user-visible reason. Only honored on `Stop` and
    /// `SubagentStop`; advisory elsewhere.
    Block { message: String },
}

impl Decision {
    pub fn ok() -> Self {
        Self::Continue {
            message: None,
            context: None,
        }
    }

    pub fn say(message: impl Into<String>) -> Self {
        Self::Continue {
            message: Some(message.into()),
            context: None,
        }
    }

    pub fn inject(context: impl Into<String>) -> Self {
        Self::Continue {
            message: None,
            context: Some(context.into()),
        }
    }

    pub fn block(message: impl Into<String>) -> Self {
        Self::Block {
            message: message.into(),
        }
    }
}

/// The single JSON object written to stdout.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HookOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "hookSpecificOutput", skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning: Option<serde_json::Value>,
}

impl HookOutput {
    /// The empty reply: no opinion, host proceeds.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Render a decision into the wire form for a given event.
    pub fn from_decision(decision: Decision, event_name: HookEventName) -> Self {
        match decision {
            Decision::NoOp => Self::empty(),
            Decision::Continue { message, context } => Self {
                result: Some("continue"),
                message: message.map(truncate_message),
                hook_specific_output: context.map(|c| {
                    serde_json::json!({
                        "hookEventName": event_name,
                        "additionalContext": truncate_message(c),
                    })
                }),
                learning: None,
            },
            Decision::Block { message } => Self {
                result: Some("block"),
                message: Some(truncate_message(message)),
                hook_specific_output: None,
                learning: None,
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Clip a user-visible string to the message cap at a char boundary.
pub fn truncate_message(s: impl Into<String>) -> String {
    let s = s.into();
    if s.len() <= MAX_MESSAGE_BYTES {
        return s;
    }
    let mut cut = MAX_MESSAGE_BYTES;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = s[..cut].to_string();
    out.push('…');
    out
}
