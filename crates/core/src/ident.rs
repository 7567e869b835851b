//! # Identifier Grammar
//!
//! Every id-bearing field (sessions, agents, swarms, breakers, pipelines)
//! is validated against `^[A-Za-z0-9_-]{1,64}$` before it is allowed near
//! a query. Invalid ids degrade to `unknown` senders or no-op events
//! rather than errors.

/// Maximum identifier length.
pub const MAX_ID_LEN: usize = 64;

/// Placeholder sender recorded when an extracted id fails validation.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Check an identifier against the grammar.
pub fn valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Return the id unchanged if valid, otherwise [`UNKNOWN_SENDER`].
pub fn sanitize_sender(s: &str) -> &str {
    if valid_id(s) {
        s
    } else {
        UNKNOWN_SENDER
    }
}

/// Validate an optional id, treating invalid values as absent.
pub fn checked_id(s: Option<&str>) -> Option<&str> {
    s.filter(|v| valid_id(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(valid_id("a1"));
        assert!(valid_id("swarm_7-b"));
        assert!(valid_id(&"x".repeat(64)));
    }

    #[test]
    fn test_invalid_ids() {
        assert!(!valid_id(""));
        assert!(!valid_id(&"x".repeat(65)));
        assert!(!valid_id("has space"));
        assert!(!valid_id("path/../etc"));
        assert!(!valid_id("quote'drop"));
    }

    #[test]
    fn test_sanitize_sender() {
        assert_eq!(sanitize_sender("agent-3"), "agent-3");
        assert_eq!(sanitize_sender("not ok"), UNKNOWN_SENDER);
    }
}
