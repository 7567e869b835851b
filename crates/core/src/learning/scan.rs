//! # Codebase-Scan Ingest
//!
//! Contract adapter for scan results produced by the host's analysis
//! tooling. Validates and spools; the external service does the embedding.

use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use crate::ident::valid_id;

/// Accepted scan types.
pub const SCAN_TYPES: &[&str] = &[
    "structure",
    "arch",
    "diagnostics",
    "dead",
    "imports",
    "impact",
    "full",
];

/// Content cap: 10 MiB.
pub const MAX_SCAN_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct ScanRecord<'a> {
    id: String,
    session_id: &'a str,
    project: &'a str,
    scan_type: &'a str,
    content: &'a str,
    metadata: &'a serde_json::Value,
    created_at: String,
}

/// Append-only spool for codebase scans.
pub struct ScanIngest {
    spool_path: PathBuf,
}

impl Default for ScanIngest {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanIngest {
    pub fn new() -> Self {
        Self {
            spool_path: PathBuf::from(".waggle/scans.jsonl"),
        }
    }

    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            spool_path: path.into(),
        }
    }

    /// Ingest one scan result. Returns the record id, or `None` when the
    /// input fails validation or the spool is unavailable.
    pub fn ingest(
        &self,
        session_id: &str,
        project: &str,
        scan_type: &str,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Option<String> {
        if !valid_id(session_id) {
            tracing::warn!("scan ingest rejected: bad session id");
            return None;
        }
        if !SCAN_TYPES.contains(&scan_type) {
            tracing::warn!("scan ingest rejected: unknown scan_type {:?}", scan_type);
            return None;
        }
        if content.trim().is_empty() || content.len() > MAX_SCAN_BYTES {
            tracing::warn!("scan ingest rejected: content size {}", content.len());
            return None;
        }

        let id = format!("scan-{}", Utc::now().format("%Y%m%d-%H%M%S%.6f"));
        let record = ScanRecord {
            id: id.clone(),
            session_id,
            project,
            scan_type,
            content,
            metadata,
            created_at: Utc::now().to_rfc3339(),
        };

        match self.append(&record) {
            Ok(()) => Some(id),
            Err(e) => {
                tracing::warn!("scan spool unavailable, dropping record: {}", e);
                None
            }
        }
    }

    fn append(&self, record: &ScanRecord<'_>) -> std::io::Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_ingest_validates_then_spools() {
        let path = ".waggle/test_scans.jsonl";
        let _ = fs::remove_file(path);
        let ingest = ScanIngest::at(path);

        let id = ingest
            .ingest(
                "s1",
                "waggle",
                "structure",
                "crates/core: 28 modules",
                &json!({"files": 28}),
            )
            .unwrap();
        assert!(id.starts_with("scan-"));

        // Unknown scan types and bad ids degrade to None
        assert!(ingest.ingest("s1", "p", "vibes", "x", &json!({})).is_none());
        assert!(ingest
            .ingest("bad id!", "p", "structure", "x", &json!({}))
            .is_none());

        let _ = fs::remove_file(path);
    }
}
