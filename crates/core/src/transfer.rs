//! # State Transfer
//!
//! Serializes an agent's working state (context bag, memory, progress,
//! pending tasks), stamps it with an FNV-1a integrity checksum and ships it
//! over the blackboard as a `state_transfer` broadcast addressed to a named
//! successor. The successor's `SubagentStart` re-verifies the checksum and
//! restores; a mismatch discards the transfer with a warning and nothing
//! else. A corrupted handoff must never block the host.

use crate::state::blackboard::{tag, Blackboard};
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Serialized states above this size are refused.
pub const MAX_STATE_BYTES: usize = 1024 * 1024;

/// An agent's transferable working state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentState {
    /// Free-form context bag (notes, partial results, tool summaries)
    #[serde(default)]
    pub context: serde_json::Value,
    /// Accumulated memory the successor should keep
    #[serde(default)]
    pub memory: serde_json::Value,
    /// Progress through the task, 0..=100
    #[serde(default)]
    pub progress: u8,
    /// Work items the successor should pick up
    #[serde(default, rename = "pendingTasks")]
    pub pending_tasks: Vec<String>,
}

impl AgentState {
    /// Pull a transferable state out of an agent's structured output, if the
    /// host surfaced one under a `state` key.
    pub fn from_structured_output(output: &serde_json::Value) -> Option<Self> {
        let state = output.get("state")?;
        serde_json::from_value(state.clone()).ok()
    }
}

/// FNV-1a over the serialized state. Deterministic across builds, which is
/// all an integrity stamp needs.
pub fn checksum(bytes: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x01000193;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Serialize a state and compute its checksum.
///
/// serde_json orders map keys deterministically, so the checksum of a
/// re-serialization always matches.
pub fn serialize(state: &AgentState) -> Result<(String, u32)> {
    let json = serde_json::to_string(state)?;
    if json.len() > MAX_STATE_BYTES {
        return Err(RuntimeError::StateTooLarge {
            size: json.len(),
            max: MAX_STATE_BYTES,
        }
        .into());
    }
    let sum = checksum(json.as_bytes());
    Ok((json, sum))
}

/// Parse a serialized state back.
pub fn deserialize(json: &str) -> Result<AgentState> {
    Ok(serde_json::from_str(json)?)
}

/// Publish a state-transfer broadcast addressed to `dst`.
pub fn publish(
    blackboard: &Blackboard,
    swarm_id: &str,
    src: &str,
    dst: &str,
    state: &AgentState,
) -> Result<i64> {
    let (json, sum) = serialize(state)?;

    let payload = serde_json::json!({
        "to": dst,
        "state": serde_json::from_str::<serde_json::Value>(&json)?,
        "checksum": sum,
    });

    let id = blackboard.post(swarm_id, src, tag::STATE_TRANSFER, &payload)?;
    tracing::info!(
        "published state transfer {} -> {} ({} bytes, checksum {:#010x})",
        src,
        dst,
        json.len(),
        sum
    );
    Ok(id)
}

/// A restored handoff: who sent it and what they left behind.
#[derive(Debug, Clone)]
pub struct RestoredState {
    pub from: String,
    pub state: AgentState,
}

/// Find the latest transfer addressed to `dst`, verify its checksum and
/// restore it. Returns `None` when no transfer targets this agent or the
/// payload fails verification (logged, never an error).
pub fn restore(blackboard: &Blackboard, swarm_id: &str, dst: &str) -> Result<Option<RestoredState>> {
    let transfers = blackboard.list_of_type(swarm_id, tag::STATE_TRANSFER)?;

    // Newest transfer addressed to us wins
    let broadcast = match transfers
        .into_iter()
        .rev()
        .find(|b| b.payload.get("to").and_then(|v| v.as_str()) == Some(dst))
    {
        Some(b) => b,
        None => return Ok(None),
    };

    let stored_sum = match broadcast.payload.get("checksum").and_then(|v| v.as_u64()) {
        Some(sum) => sum as u32,
        None => {
            tracing::warn!("state transfer for {} carries no checksum, discarding", dst);
            return Ok(None);
        }
    };

    let state_value = match broadcast.payload.get("state") {
        Some(v) => v,
        None => {
            tracing::warn!("state transfer for {} carries no state, discarding", dst);
            return Ok(None);
        }
    };

    let state: AgentState = match serde_json::from_value(state_value.clone()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("state transfer for {} is malformed ({}), discarding", dst, e);
            return Ok(None);
        }
    };

    // Verify against the canonical re-serialization
    let (json, computed) = serialize(&state)?;
    if computed != stored_sum {
        let err = RuntimeError::ChecksumMismatch {
            stored: stored_sum,
            computed,
        };
        tracing::warn!("discarding state transfer for {}: {}", dst, err);
        return Ok(None);
    }

    tracing::info!(
        "restored state from {} for {} ({} bytes)",
        broadcast.sender_agent,
        dst,
        json.len()
    );

    Ok(Some(RestoredState {
        from: broadcast.sender_agent,
        state,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::db::CoordDb;
    use serde_json::json;
    use std::fs;

    fn sample_state() -> AgentState {
        AgentState {
            context: json!({"branch": "feat/search", "last_file": "src/query.rs"}),
            memory: json!({"decisions": ["use tantivy"]}),
            progress: 42,
            pending_tasks: vec!["t1".to_string()],
        }
    }

    #[test]
    fn test_roundtrip_is_bit_equal() {
        let state = sample_state();
        let (json, sum) = serialize(&state).unwrap();
        let restored = deserialize(&json).unwrap();
        assert_eq!(restored, state);

        // Checksum of the re-serialization matches
        let (json2, sum2) = serialize(&restored).unwrap();
        assert_eq!(json, json2);
        assert_eq!(sum, sum2);
    }

    #[test]
    fn test_oversized_state_is_refused() {
        let state = AgentState {
            context: json!("x".repeat(MAX_STATE_BYTES + 1)),
            ..Default::default()
        };
        let err = serialize(&state).unwrap_err();
        assert!(err.to_string().contains("max"));
    }

    #[test]
    fn test_publish_and_restore() {
        let path = ".waggle/test_transfer.db";
        let _ = fs::remove_file(path);
        let db = CoordDb::open_at(path).unwrap();
        let bb = Blackboard::new(&db);

        let state = sample_state();
        publish(&bb, "s1", "a_old", "a_new", &state).unwrap();

        let restored = restore(&bb, "s1", "a_new").unwrap().unwrap();
        assert_eq!(restored.from, "a_old");
        assert_eq!(restored.state, state);

        // Not addressed to anyone else
        assert!(restore(&bb, "s1", "a_other").unwrap().is_none());

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_corrupted_checksum_is_discarded_silently() {
        let path = ".waggle/test_transfer_corrupt.db";
        let _ = fs::remove_file(path);
        let db = CoordDb::open_at(path).unwrap();
        let bb = Blackboard::new(&db);

        let state = sample_state();
        let (json, sum) = serialize(&state).unwrap();
        let payload = json!({
            "to": "a_new",
            "state": serde_json::from_str::<serde_json::Value>(&json).unwrap(),
            "checksum": sum.wrapping_add(1),
        });
        bb.post("s1", "a_old", tag::STATE_TRANSFER, &payload)
            .unwrap();

        // Discarded, not an error
        assert!(restore(&bb, "s1", "a_new").unwrap().is_none());

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_latest_transfer_wins() {
        let path = ".waggle/test_transfer_latest.db";
        let _ = fs::remove_file(path);
        let db = CoordDb::open_at(path).unwrap();
        let bb = Blackboard::new(&db);

        let mut first = sample_state();
        first.progress = 10;
        let mut second = sample_state();
        second.progress = 90;

        publish(&bb, "s1", "a_old", "a_new", &first).unwrap();
        publish(&bb, "s1", "a_old", "a_new", &second).unwrap();

        let restored = restore(&bb, "s1", "a_new").unwrap().unwrap();
        assert_eq!(restored.state.progress, 90);

        drop(db);
        let _ = fs::remove_file(path);
    }
}
