//! # Learning Sink
//!
//! Best-effort spool for cross-session learnings. Entries are appended as
//! JSON lines under `.waggle/` where the external persistence service picks
//! them up for embedding and semantic recall. Failures log and return
//! `None`; they never surface to the host.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

use crate::ident::valid_id;

/// What kind of learning is being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningKind {
    WorkingSolution,
    FailedApproach,
    ArchitecturalDecision,
    CodebasePattern,
    ErrorFix,
}

impl LearningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkingSolution => "WORKING_SOLUTION",
            Self::FailedApproach => "FAILED_APPROACH",
            Self::ArchitecturalDecision => "ARCHITECTURAL_DECISION",
            Self::CodebasePattern => "CODEBASE_PATTERN",
            Self::ErrorFix => "ERROR_FIX",
        }
    }
}

/// How confident the recorder is that the learning holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Serialize)]
struct LearningRecord<'a> {
    id: String,
    session_id: &'a str,
    kind: LearningKind,
    content: &'a str,
    context: &'a str,
    confidence: Confidence,
    created_at: String,
}

/// Append-only spool toward the external learning service.
pub struct LearningSink {
    spool_path: PathBuf,
}

impl Default for LearningSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LearningSink {
    pub fn new() -> Self {
        Self {
            spool_path: PathBuf::from(".waggle/learnings.jsonl"),
        }
    }

    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            spool_path: path.into(),
        }
    }

    /// Record a learning. Returns the record id, or `None` on any failure.
    pub fn store(
        &self,
        session_id: &str,
        kind: LearningKind,
        content: &str,
        context: &str,
        confidence: Confidence,
    ) -> Option<String> {
        if !valid_id(session_id) || content.trim().is_empty() {
            return None;
        }

        let id = format!("l-{}", Utc::now().format("%Y%m%d-%H%M%S%.6f"));
        let record = LearningRecord {
            id: id.clone(),
            session_id,
            kind,
            content,
            context,
            confidence,
            created_at: Utc::now().to_rfc3339(),
        };

        match self.append(&record) {
            Ok(()) => Some(id),
            Err(e) => {
                tracing::warn!("learning sink unavailable, dropping record: {}", e);
                None
            }
        }
    }

    fn append(&self, record: &LearningRecord<'_>) -> std::io::Result<()> {
        if let Some(parent) = self.spool_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.spool_path)?;
        writeln!(file, "{line}")
    }
}
