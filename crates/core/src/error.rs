//! # Runtime Error Kinds
//!
//! The contract-level failures the coordination runtime distinguishes.
//! Everything else travels as `anyhow::Error` with context and is folded
//! into an empty hook reply by the dispatcher.

use thiserror::Error;

/// Failures with contract-defined behavior.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The store did not yield a connection within the wait budget.
    #[error("coordination store unavailable after {waited_ms}ms")]
    StoreUnavailable { waited_ms: u64 },

    /// A serialized agent state exceeded the transfer cap.
    #[error("serialized state is {size} bytes (max {max})")]
    StateTooLarge { size: usize, max: usize },

    /// An identifier failed the grammar check before reaching SQL.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A state-transfer payload failed integrity verification.
    #[error("state checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_terse() {
        let err = RuntimeError::StateTooLarge {
            size: 2_000_000,
            max: 1_048_576,
        };
        let msg = err.to_string();
        assert!(msg.contains("2000000"));
        assert!(!msg.contains('\n'));
    }
}
